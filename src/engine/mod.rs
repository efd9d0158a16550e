//! Execution engine interface and shared result types.
//!
//! The scheduler, validator, and ingester all consume engines through
//! [`ExecutionEngine`]; the concrete adapters live in [`local`] and
//! [`cluster`]. Adapters are responsible for mapping engine-native
//! errors to a single error string and for sanitizing SQL into the
//! dialect they speak.

use crate::error::Result;
use crate::validate::ValidationReport;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub mod cluster;
pub mod local;

pub use cluster::ClusterEngine;
pub use local::LocalEngine;

/// Health of an engine as observed by its adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Available,
    Degraded,
    Unavailable,
    Uninitialized,
}

/// Simulated split of wall-clock time into cpu / io / network buckets.
///
/// Engines do not expose a uniform profiling interface, so adapters
/// apportion the measured wall-clock by a fixed per-engine ratio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub execution_time: f64,
    pub memory_used_mb: f64,
    pub rows_processed: u64,
    pub cpu_time: f64,
    pub io_wait: f64,
    pub network_time: f64,
}

/// Result of one executed SQL statement.
///
/// `data` is row-major: one name→value map per row. Values are plain
/// JSON scalars, arrays, or nested maps; timestamps are ISO-8601
/// strings. Nothing opaque leaks to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub data: Vec<serde_json::Map<String, serde_json::Value>>,
    pub rows: u64,
    pub execution_time: f64,
    pub engine: String,
    pub query_plan: String,
    pub performance_metrics: PerformanceMetrics,
}

/// One column of a described table.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// One table or view visible to an engine.
#[derive(Debug, Clone, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub kind: String,
    pub columns: Vec<ColumnInfo>,
}

/// Snapshot of an engine's visible schema.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaInfo {
    pub engine: String,
    pub database: String,
    pub tables: Vec<TableInfo>,
}

/// Narrow interface the rest of the system uses to talk to an engine.
///
/// Guarantees relied upon by the scheduler:
/// - `execute` never touches slot-pool state and is safe to call from
///   concurrent tasks.
/// - cancellation and `max_execution_time` are enforced by the
///   executor wrapping the call, so adapters only need their futures
///   to be droppable at statement boundaries.
#[async_trait::async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Stable identifier advertised to clients (e.g. "local").
    fn name(&self) -> &'static str;

    /// Prepare the engine for use. Idempotent; safe to call again
    /// after a transient failure.
    async fn initialize(&self) -> Result<()>;

    /// Run one SQL statement to completion.
    async fn execute(&self, sql: &str) -> Result<ExecutionResult>;

    /// Estimate a query without executing it.
    async fn validate(&self, sql: &str) -> Result<ValidationReport>;

    /// Report the tables and columns currently visible.
    async fn describe(&self) -> Result<SchemaInfo>;

    /// Current engine health.
    async fn status(&self) -> EngineStatus;

    /// Release engine resources.
    async fn close(&self);

    /// Average bytes per row assumed when the engine cannot supply a
    /// real size estimate.
    fn row_bytes_hint(&self) -> u64 {
        100
    }
}

/// The set of engines registered with the service, keyed by name.
#[derive(Clone, Default)]
pub struct EngineSet {
    engines: HashMap<String, Arc<dyn ExecutionEngine>>,
}

impl EngineSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine: Arc<dyn ExecutionEngine>) {
        self.engines.insert(engine.name().to_string(), engine);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExecutionEngine>> {
        self.engines.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.engines.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.engines.keys().cloned().collect();
        names.sort();
        names
    }

    /// Collect the status of every registered engine.
    pub async fn statuses(&self) -> HashMap<String, EngineStatus> {
        let mut out = HashMap::new();
        for (name, engine) in &self.engines {
            out.insert(name.clone(), engine.status().await);
        }
        out
    }
}

/// Build the metrics bag from a wall-clock measurement and an engine's
/// fixed (cpu, io, network) ratio.
pub(crate) fn split_metrics(
    execution_time: f64,
    memory_used_mb: f64,
    rows_processed: u64,
    ratio: (f64, f64, f64),
) -> PerformanceMetrics {
    PerformanceMetrics {
        execution_time,
        memory_used_mb,
        rows_processed,
        cpu_time: execution_time * ratio.0,
        io_wait: execution_time * ratio.1,
        network_time: execution_time * ratio.2,
    }
}
