//! Query job model and lifecycle states.

use crate::engine::ExecutionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a submitted query.
///
/// `Queued` and `Running` are transient; the other three are terminal
/// and immutable once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}

/// One submitted SQL statement together with its bookkeeping.
///
/// Created at submission; mutated only by the scheduler loop and the
/// executor task it dispatches. Once a terminal state is reached the
/// job is snapshotted into history and never touched again.
#[derive(Debug, Clone)]
pub struct QueryJob {
    pub job_id: String,
    pub sql: String,
    pub engine: String,
    /// 1 = highest .. 5 = lowest
    pub priority: u8,
    pub estimated_slots: usize,
    pub actual_slots_used: usize,
    pub max_execution_time: std::time::Duration,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub memory_used_mb: f64,
    pub rows_processed: u64,
    pub result: Option<ExecutionResult>,
    pub error: Option<String>,
}

impl QueryJob {
    /// Create a freshly queued job with a short unique id.
    pub fn new(
        sql: String,
        engine: String,
        priority: u8,
        estimated_slots: usize,
        max_execution_time: std::time::Duration,
    ) -> Self {
        Self {
            job_id: short_id(),
            sql,
            engine,
            priority,
            estimated_slots,
            actual_slots_used: 0,
            max_execution_time,
            state: JobState::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            memory_used_mb: 0.0,
            rows_processed: 0,
            result: None,
            error: None,
        }
    }

    /// Wall-clock execution time in seconds, if the job has started.
    ///
    /// Running jobs report elapsed-so-far; terminal jobs report the
    /// final started→completed span.
    pub fn execution_time(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - started).num_milliseconds() as f64 / 1000.0)
    }
}

/// External view of a job, safe to hand to any caller.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub sql: String,
    pub engine: String,
    pub state: JobState,
    pub priority: u8,
    pub estimated_slots: usize,
    pub actual_slots_used: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time: Option<f64>,
    pub memory_used_mb: f64,
    pub rows_processed: u64,
    pub error: Option<String>,
}

impl From<&QueryJob> for JobView {
    fn from(job: &QueryJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            sql: job.sql.clone(),
            engine: job.engine.clone(),
            state: job.state,
            priority: job.priority,
            estimated_slots: job.estimated_slots,
            actual_slots_used: job.actual_slots_used,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            execution_time: job.execution_time(),
            memory_used_mb: job.memory_used_mb,
            rows_processed: job.rows_processed,
            error: job.error.clone(),
        }
    }
}

/// Result payload of a terminal job plus its execution stats.
#[derive(Debug, Clone, Serialize)]
pub struct ResultView {
    pub job_id: String,
    pub state: JobState,
    pub result: Option<ExecutionResult>,
    pub error: Option<String>,
    pub execution_stats: ExecutionStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStats {
    pub execution_time: Option<f64>,
    pub memory_used_mb: f64,
    pub rows_processed: u64,
    pub slots_used: usize,
    pub engine: String,
}

/// Generate a short unique job id (8 hex chars of a fresh UUID).
fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_ids_are_unique_and_short() {
        let a = short_id();
        let b = short_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn terminal_states() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn state_round_trips_through_str() {
        for state in [
            JobState::Queued,
            JobState::Running,
            JobState::Completed,
            JobState::Failed,
            JobState::Cancelled,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
    }
}
