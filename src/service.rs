//! Public service facade.
//!
//! The one type out-of-scope surfaces (HTTP, CLI, FFI) talk to. It
//! owns the engines, scheduler, schema registry, and ingester, and
//! enforces the numeric contract at the boundary before anything
//! reaches the inner layers.

use crate::config::Config;
use crate::engine::{
    ClusterEngine, EngineSet, EngineStatus, ExecutionEngine, LocalEngine, cluster::ClusterConfig,
};
use crate::error::{Result, ServiceError};
use crate::events::JobEvent;
use crate::history::JobHistory;
use crate::ingest::{IngestReport, IngestRequest, Ingester};
use crate::jobs::{JobState, JobView, QueryJob, ResultView};
use crate::proto::{ProtoCompiler, ProtocCompiler};
use crate::scheduler::{CancelOutcome, Scheduler};
use crate::schema::registry::{SchemaMetadata, SchemaRecord, SchemaRegistry};
use crate::schema::translate::{
    EngineDialect, create_database_sql, create_table_sql, flattened_view_sql,
};
use crate::validate::ValidationReport;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Maximum number of requests accepted in one batch submission.
pub const MAX_BATCH_SUBMIT: usize = 20;

static TABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// One query submission.
#[derive(Debug, Clone)]
pub struct QuerySubmission {
    pub sql: String,
    pub engine: String,
    /// 1 = highest .. 5 = lowest
    pub priority: u8,
    pub estimated_slots: usize,
    pub max_execution_s: u64,
}

impl Default for QuerySubmission {
    fn default() -> Self {
        Self {
            sql: String::new(),
            engine: "local".to_string(),
            priority: 1,
            estimated_slots: 1,
            max_execution_s: 300,
        }
    }
}

/// Per-request outcome of a batch submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub job_id: Option<String>,
    pub error: Option<String>,
    pub sql_preview: String,
}

/// Either the stored result of a terminal job, or the job's current
/// non-terminal state.
#[derive(Debug, Clone)]
pub enum ResultPoll {
    Ready(ResultView),
    Pending { job_id: String, state: JobState },
}

/// Aggregate view of the whole service.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub total_slots: usize,
    pub available_slots: usize,
    pub queued_jobs: usize,
    pub running_jobs: usize,
    pub completed_jobs: u64,
    pub engines: HashMap<String, EngineStatus>,
}

/// Per-engine outcome of a table creation request.
#[derive(Debug, Clone, Serialize)]
pub struct TableCreationResult {
    pub engine: String,
    pub created: bool,
    pub flattened_view_created: bool,
    pub error: Option<String>,
}

/// The analytical query service.
pub struct QueryService {
    engines: EngineSet,
    scheduler: Scheduler,
    registry: SchemaRegistry,
    ingester: Ingester,
    compiler: Arc<dyn ProtoCompiler>,
}

impl QueryService {
    /// Build the full service from configuration: both engines, the
    /// protoc-backed compiler, and the persistent stores.
    ///
    /// The cluster engine is allowed to be unreachable at startup; it
    /// reports `uninitialized` until its first successful use.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let mut engines = EngineSet::new();

        let local = LocalEngine::connect(&config.local_db_path).await?;
        local.initialize().await?;
        engines.register(Arc::new(local));

        let cluster = ClusterEngine::new(ClusterConfig {
            url: config.cluster_url.clone(),
            user: config.cluster_user.clone(),
            password: config.cluster_password.clone(),
            database: config.cluster_database.clone(),
        })?;
        if let Err(e) = cluster.initialize().await {
            warn!(error = %e, "cluster engine not available at startup");
        }
        engines.register(Arc::new(cluster));

        let compiler = Arc::new(ProtocCompiler::new(&config.protoc_path));
        compiler.check_installation().await;

        Self::build(config, engines, compiler).await
    }

    /// Build the service around an explicit engine set and compiler.
    pub async fn build(
        config: &Config,
        engines: EngineSet,
        compiler: Arc<dyn ProtoCompiler>,
    ) -> Result<Self> {
        let history = JobHistory::open(&config.history_db_path).await?;
        let registry = SchemaRegistry::open(&config.registry_db_path).await?;
        let scheduler = Scheduler::new(
            config.total_slots,
            config.scheduler_tick,
            engines.clone(),
            history,
        );
        let ingester = Ingester::new(registry.clone(), compiler.clone());

        info!(
            total_slots = config.total_slots,
            engines = ?engines.names(),
            "query service ready"
        );
        Ok(Self {
            engines,
            scheduler,
            registry,
            ingester,
            compiler,
        })
    }

    /// Handle to the scheduler, e.g. to drive its admission loop.
    pub fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }

    /// Subscribe to job lifecycle events.
    pub fn job_events(&self) -> broadcast::Receiver<JobEvent> {
        self.scheduler.subscribe()
    }

    // ── jobs ────────────────────────────────────────────────────────

    /// Submit a query for execution, returning its queued view.
    pub async fn submit_query(&self, request: QuerySubmission) -> Result<JobView> {
        self.validate_submission(&request)?;
        let job = QueryJob::new(
            request.sql,
            request.engine,
            request.priority,
            request.estimated_slots,
            Duration::from_secs(request.max_execution_s),
        );
        Ok(self.scheduler.submit(job))
    }

    /// Submit up to [`MAX_BATCH_SUBMIT`] queries at once. Individual
    /// failures do not abort the batch.
    pub async fn submit_batch(
        &self,
        requests: Vec<QuerySubmission>,
    ) -> Result<Vec<SubmissionOutcome>> {
        if requests.len() > MAX_BATCH_SUBMIT {
            return Err(ServiceError::InvalidInput(format!(
                "batch size limited to {MAX_BATCH_SUBMIT} queries"
            )));
        }

        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            let sql_preview = preview(&request.sql);
            match self.submit_query(request).await {
                Ok(view) => outcomes.push(SubmissionOutcome {
                    job_id: Some(view.job_id),
                    error: None,
                    sql_preview,
                }),
                Err(e) => outcomes.push(SubmissionOutcome {
                    job_id: None,
                    error: Some(e.to_string()),
                    sql_preview,
                }),
            }
        }
        Ok(outcomes)
    }

    /// Current view of a job, wherever it lives.
    pub async fn get_job(&self, job_id: &str) -> Result<JobView> {
        if let Some(view) = self.scheduler.get_active(job_id) {
            return Ok(view);
        }
        self.scheduler
            .history()
            .get(job_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("job '{job_id}'")))
    }

    /// Result of a terminal job, or its pending state.
    pub async fn get_job_result(&self, job_id: &str) -> Result<ResultPoll> {
        if let Some(view) = self.scheduler.get_active(job_id) {
            return Ok(ResultPoll::Pending {
                job_id: view.job_id,
                state: view.state,
            });
        }
        self.scheduler
            .history()
            .get_result(job_id)
            .await?
            .map(ResultPoll::Ready)
            .ok_or_else(|| ServiceError::NotFound(format!("job '{job_id}'")))
    }

    /// Jobs across queue, running set, and history, newest first.
    pub async fn list_jobs(&self, state: Option<JobState>, limit: usize) -> Result<Vec<JobView>> {
        let (queued, running) = self.scheduler.active_jobs();

        let mut jobs: Vec<JobView> = Vec::new();
        if state.is_none() || state == Some(JobState::Queued) {
            jobs.extend(queued);
        }
        if state.is_none() || state == Some(JobState::Running) {
            jobs.extend(running);
        }
        match state {
            None => jobs.extend(self.scheduler.history().list(None, limit).await?),
            Some(state) if state.is_terminal() => {
                jobs.extend(self.scheduler.history().list(Some(state), limit).await?)
            }
            _ => {}
        }

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    /// Cancel a queued or running job.
    pub async fn cancel(&self, job_id: &str) -> Result<CancelOutcome> {
        self.scheduler.cancel(job_id).await
    }

    /// Estimate a query without executing it.
    pub async fn validate(&self, sql: &str, engine: &str) -> Result<ValidationReport> {
        let engine = self.engine(engine)?;
        engine.validate(sql).await
    }

    /// Aggregate counters plus per-engine health.
    pub async fn system_status(&self) -> Result<SystemStatus> {
        let usage = self.scheduler.usage();
        Ok(SystemStatus {
            total_slots: usage.total_slots,
            available_slots: usage.available_slots,
            queued_jobs: usage.queued_jobs,
            running_jobs: usage.running_jobs,
            completed_jobs: self.scheduler.history().count().await?,
            engines: self.engines.statuses().await,
        })
    }

    // ── schemas ─────────────────────────────────────────────────────

    /// Register a schema from BigQuery-style schema JSON.
    pub async fn register_schema_from_json(
        &self,
        schema_json: &Value,
        table_name: &str,
        database_name: &str,
    ) -> Result<String> {
        validate_table_name(table_name)?;
        validate_table_name(database_name)?;
        self.registry
            .register_from_json(schema_json, table_name, database_name, None)
            .await
    }

    /// Register a schema from protobuf source, retaining the source
    /// for later ingestion.
    pub async fn register_schema_from_proto(
        &self,
        proto_source: &str,
        table_name: &str,
        database_name: &str,
    ) -> Result<String> {
        validate_table_name(table_name)?;
        validate_table_name(database_name)?;
        let schema_json = self.compiler.compile_schema_json(proto_source).await?;
        self.registry
            .register_from_json(&schema_json, table_name, database_name, Some(proto_source))
            .await
    }

    pub async fn list_schemas(&self) -> Result<Vec<SchemaMetadata>> {
        self.registry.list().await
    }

    pub async fn get_schema(&self, schema_id: &str) -> Result<SchemaRecord> {
        self.registry
            .get(schema_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("schema '{schema_id}'")))
    }

    /// Delete a schema with all versions and field rows. Engine-side
    /// tables are left alone.
    pub async fn delete_schema(&self, schema_id: &str) -> Result<()> {
        if self.registry.delete(schema_id).await? {
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!("schema '{schema_id}'")))
        }
    }

    /// Create the schema's table on each named engine.
    pub async fn create_tables(
        &self,
        schema_id: &str,
        engines: &[String],
        if_not_exists: bool,
        make_flattened_view: bool,
    ) -> Result<Vec<TableCreationResult>> {
        let record = self.get_schema(schema_id).await?;

        let mut results = Vec::with_capacity(engines.len());
        for engine_name in engines {
            results.push(
                self.create_table_on(&record, engine_name, if_not_exists, make_flattened_view)
                    .await,
            );
        }
        Ok(results)
    }

    async fn create_table_on(
        &self,
        record: &SchemaRecord,
        engine_name: &str,
        if_not_exists: bool,
        make_flattened_view: bool,
    ) -> TableCreationResult {
        let mut result = TableCreationResult {
            engine: engine_name.to_string(),
            created: false,
            flattened_view_created: false,
            error: None,
        };

        let (engine, dialect) = match (
            self.engines.get(engine_name),
            EngineDialect::for_engine(engine_name),
        ) {
            (Some(engine), Some(dialect)) => (engine, dialect),
            _ => {
                result.error = Some(format!("unknown engine '{engine_name}'"));
                return result;
            }
        };

        if let Some(db_sql) = create_database_sql(dialect, &record.database_name)
            && let Err(e) = engine.execute(&db_sql).await
        {
            result.error = Some(e.to_string());
            return result;
        }

        let ddl = create_table_sql(
            dialect,
            &record.database_name,
            &record.table_name,
            &record.fields,
            if_not_exists,
        );
        if let Err(e) = engine.execute(&ddl).await {
            result.error = Some(e.to_string());
            return result;
        }
        result.created = true;
        if let Err(e) = self
            .registry
            .mark_table_created(&record.schema_id, engine_name)
            .await
        {
            warn!(schema_id = record.schema_id, error = %e, "failed to record table creation");
        }

        if make_flattened_view
            && let Some(view_sql) = flattened_view_sql(
                dialect,
                &record.database_name,
                &record.table_name,
                &record.fields,
            )
        {
            match engine.execute(&view_sql).await {
                Ok(_) => result.flattened_view_created = true,
                Err(e) => result.error = Some(format!("flattened view: {e}")),
            }
        }

        result
    }

    /// SQL of the flattened view for a schema on one engine, or None
    /// when the schema has no nested fields.
    pub async fn get_flattened_view_sql(
        &self,
        schema_id: &str,
        engine: &str,
    ) -> Result<Option<String>> {
        let record = self.get_schema(schema_id).await?;
        let dialect = EngineDialect::for_engine(engine)
            .ok_or_else(|| ServiceError::InvalidInput(format!("unknown engine '{engine}'")))?;
        Ok(flattened_view_sql(
            dialect,
            &record.database_name,
            &record.table_name,
            &record.fields,
        ))
    }

    /// Bulk-load a protobuf blob into the schema's table on one engine.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReport> {
        if !(1..=10_000).contains(&request.batch_size) {
            return Err(ServiceError::InvalidInput(
                "batch_size must be between 1 and 10000".to_string(),
            ));
        }
        let engine = self.engine(&request.engine)?;
        self.ingester.ingest(engine, request).await
    }

    // ── internals ───────────────────────────────────────────────────

    fn engine(&self, name: &str) -> Result<Arc<dyn ExecutionEngine>> {
        self.engines.get(name).ok_or_else(|| {
            ServiceError::InvalidInput(format!(
                "engine '{}' not available; available engines: {:?}",
                name,
                self.engines.names()
            ))
        })
    }

    fn validate_submission(&self, request: &QuerySubmission) -> Result<()> {
        if request.sql.trim().is_empty() {
            return Err(ServiceError::InvalidInput("SQL must not be empty".to_string()));
        }
        if !self.engines.contains(&request.engine) {
            return Err(ServiceError::InvalidInput(format!(
                "engine '{}' not available; available engines: {:?}",
                request.engine,
                self.engines.names()
            )));
        }
        if !(1..=5).contains(&request.priority) {
            return Err(ServiceError::InvalidInput(
                "priority must be between 1 and 5".to_string(),
            ));
        }
        if !(1..=10).contains(&request.estimated_slots) {
            return Err(ServiceError::InvalidInput(
                "estimated_slots must be between 1 and 10".to_string(),
            ));
        }
        if !(1..=3600).contains(&request.max_execution_s) {
            return Err(ServiceError::InvalidInput(
                "max_execution_time must be between 1 and 3600 seconds".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_table_name(name: &str) -> Result<()> {
    if TABLE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ServiceError::InvalidInput(format!(
            "invalid table or database name '{name}'"
        )))
    }
}

fn preview(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((cut, _)) => format!("{}...", &sql[..cut]),
        None => sql.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_follow_the_identifier_contract() {
        assert!(validate_table_name("users").is_ok());
        assert!(validate_table_name("_private").is_ok());
        assert!(validate_table_name("t2_events").is_ok());
        assert!(validate_table_name("2fast").is_err());
        assert!(validate_table_name("bad-name").is_err());
        assert!(validate_table_name("drop table;").is_err());
        assert!(validate_table_name("").is_err());
    }

    #[test]
    fn long_sql_is_previewed() {
        let sql = "SELECT ".repeat(40);
        let p = preview(&sql);
        assert_eq!(p.len(), 103);
        assert!(p.ends_with("..."));
        assert_eq!(preview("SELECT 1"), "SELECT 1");
    }
}
