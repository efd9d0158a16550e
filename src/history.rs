//! Durable append-only record of terminal jobs.

use crate::engine::ExecutionResult;
use crate::error::Result;
use crate::jobs::{ExecutionStats, JobState, JobView, QueryJob, ResultView};
use crate::storage::sqlite_pool;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

/// Append-only store of jobs that reached a terminal state.
///
/// Rows are inserted exactly once, when the scheduler finalizes a job;
/// a job id appearing here never changes state afterwards. The full
/// execution result is kept as JSON so results survive alongside the
/// job's bookkeeping.
#[derive(Clone)]
pub struct JobHistory {
    pool: SqlitePool,
}

impl JobHistory {
    /// Open (and if needed create) the history store at `db_path`.
    pub async fn open(db_path: &str) -> Result<Self> {
        let pool = sqlite_pool(db_path).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS job_history (
                job_id TEXT PRIMARY KEY,
                sql TEXT NOT NULL,
                engine TEXT NOT NULL,
                state TEXT NOT NULL,
                priority INTEGER NOT NULL,
                estimated_slots INTEGER NOT NULL,
                actual_slots_used INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                execution_time REAL,
                memory_used_mb REAL NOT NULL,
                rows_processed INTEGER NOT NULL,
                error TEXT,
                result_summary TEXT
            )",
        )
        .execute(&pool)
        .await?;
        debug!(db_path, "job history store ready");
        Ok(Self { pool })
    }

    /// Append one terminal job. Fails if the id was already recorded,
    /// which keeps the store append-only by construction.
    pub async fn append(&self, job: &QueryJob) -> Result<()> {
        debug_assert!(job.state.is_terminal());

        let result_summary = match &job.result {
            Some(result) => Some(serde_json::to_string(result)?),
            None => None,
        };

        sqlx::query(
            "INSERT INTO job_history (
                job_id, sql, engine, state, priority, estimated_slots,
                actual_slots_used, created_at, started_at, completed_at,
                execution_time, memory_used_mb, rows_processed, error, result_summary
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )
        .bind(&job.job_id)
        .bind(&job.sql)
        .bind(&job.engine)
        .bind(job.state.as_str())
        .bind(job.priority as i64)
        .bind(job.estimated_slots as i64)
        .bind(job.actual_slots_used as i64)
        .bind(job.created_at.to_rfc3339())
        .bind(job.started_at.map(|ts| ts.to_rfc3339()))
        .bind(job.completed_at.map(|ts| ts.to_rfc3339()))
        .bind(job.execution_time())
        .bind(job.memory_used_mb)
        .bind(job.rows_processed as i64)
        .bind(&job.error)
        .bind(result_summary)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Look up one terminal job.
    pub async fn get(&self, job_id: &str) -> Result<Option<JobView>> {
        let row = sqlx::query("SELECT * FROM job_history WHERE job_id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| view_from_row(&row)).transpose()
    }

    /// Fetch the stored result payload of a terminal job.
    pub async fn get_result(&self, job_id: &str) -> Result<Option<ResultView>> {
        let row = sqlx::query("SELECT * FROM job_history WHERE job_id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let view = view_from_row(&row)?;
        let result: Option<ExecutionResult> = row
            .try_get::<Option<String>, _>("result_summary")?
            .map(|json| serde_json::from_str(&json))
            .transpose()?;

        Ok(Some(ResultView {
            job_id: view.job_id.clone(),
            state: view.state,
            execution_stats: ExecutionStats {
                execution_time: view.execution_time,
                memory_used_mb: view.memory_used_mb,
                rows_processed: view.rows_processed,
                slots_used: view.actual_slots_used,
                engine: view.engine.clone(),
            },
            error: view.error.clone(),
            result,
        }))
    }

    /// Most recent terminal jobs, optionally filtered by state.
    pub async fn list(&self, state: Option<JobState>, limit: usize) -> Result<Vec<JobView>> {
        let rows = match state {
            Some(state) => {
                sqlx::query(
                    "SELECT * FROM job_history WHERE state = ?1 \
                     ORDER BY created_at DESC LIMIT ?2",
                )
                .bind(state.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM job_history ORDER BY created_at DESC LIMIT ?1")
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(view_from_row).collect()
    }

    /// Number of terminal jobs on record.
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

fn view_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<JobView> {
    let state: String = row.try_get("state")?;
    let state = state
        .parse::<JobState>()
        .map_err(|e| crate::error::ServiceError::InvalidInput(e))?;

    Ok(JobView {
        job_id: row.try_get("job_id")?,
        sql: row.try_get("sql")?,
        engine: row.try_get("engine")?,
        state,
        priority: row.try_get::<i64, _>("priority")? as u8,
        estimated_slots: row.try_get::<i64, _>("estimated_slots")? as usize,
        actual_slots_used: row.try_get::<i64, _>("actual_slots_used")? as usize,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        started_at: row
            .try_get::<Option<String>, _>("started_at")?
            .map(|ts| parse_ts(&ts))
            .transpose()?,
        completed_at: row
            .try_get::<Option<String>, _>("completed_at")?
            .map(|ts| parse_ts(&ts))
            .transpose()?,
        execution_time: row.try_get("execution_time")?,
        memory_used_mb: row.try_get("memory_used_mb")?,
        rows_processed: row.try_get::<i64, _>("rows_processed")?.max(0) as u64,
        error: row.try_get("error")?,
    })
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            crate::error::ServiceError::InvalidInput(format!("bad timestamp '{raw}': {e}"))
        })
}
