//! Remote columnar cluster adapter.
//!
//! Talks to the cluster's HTTP query endpoint with reqwest. The
//! cluster dialect tolerates neither SQL comments nor statement
//! terminators, so every statement is sanitized before dispatch.
//! Server-side errors arrive as plain-text bodies and are surfaced
//! verbatim as the engine error string.

use crate::engine::{
    ColumnInfo, EngineStatus, ExecutionEngine, ExecutionResult, SchemaInfo, TableInfo,
    split_metrics,
};
use crate::error::{Result, ServiceError};
use crate::validate::{self, CostModel, ValidationReport};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const COST_MODEL: CostModel = CostModel {
    base_ms: 20.0,
    per_row_ms: 0.0005,
    per_join_ms: 30.0,
    group_by_per_row_ms: 0.005,
    order_by_per_row_ms: 0.003,
    window_per_row_ms: 0.01,
    per_subquery_ms: 50.0,
};

/// Connection settings for the remote cluster.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

/// Adapter over the remote columnar cluster's HTTP interface.
pub struct ClusterEngine {
    client: Client,
    config: ClusterConfig,
    initialized: AtomicBool,
}

/// Shape of the cluster's JSON result format.
#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    data: Vec<serde_json::Map<String, Value>>,
}

impl ClusterEngine {
    pub fn new(config: ClusterConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            config,
            initialized: AtomicBool::new(false),
        })
    }

    /// Strip comments and statement terminators from a query.
    ///
    /// Line comments are removed per line, the remainder is collapsed
    /// onto one line, and all semicolons are dropped.
    fn sanitize_sql(sql: &str) -> String {
        let lines: Vec<&str> = sql
            .lines()
            .map(|line| line.split("--").next().unwrap_or("").trim())
            .filter(|line| !line.is_empty())
            .collect();
        lines.join(" ").replace(';', "").trim().to_string()
    }

    /// POST one statement to the cluster and return the raw body.
    async fn send(&self, sql: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.config.url)
            .query(&[("database", self.config.database.as_str())])
            .basic_auth(&self.config.user, Some(&self.config.password))
            .body(sql.to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ServiceError::engine("cluster", body.trim().to_string()));
        }
        Ok(body)
    }

    /// Run a statement that yields rows, requesting the JSON format.
    async fn query_json(&self, sql: &str) -> Result<Vec<serde_json::Map<String, Value>>> {
        let body = self.send(&format!("{sql} FORMAT JSON")).await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let parsed: WireResponse = serde_json::from_str(&body)?;
        Ok(parsed.data)
    }

    async fn query_plan(&self, sql: &str) -> String {
        match self.query_json(&format!("EXPLAIN {sql}")).await {
            Ok(rows) => {
                let lines: Vec<String> = rows
                    .iter()
                    .flat_map(|row| row.values())
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                if lines.is_empty() {
                    "Query plan not available".to_string()
                } else {
                    lines.join("\n")
                }
            }
            Err(_) => "Query plan not available".to_string(),
        }
    }

    /// Row/byte statistics for a table from the cluster's system tables.
    async fn table_stats(&self, table: &str) -> Result<Option<(u64, u64)>> {
        let sql = format!(
            "SELECT total_rows, total_bytes FROM system.tables \
             WHERE database = '{}' AND name = '{}'",
            self.config.database, table
        );
        let rows = self.query_json(&sql).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let total_rows = json_u64(row.get("total_rows")).unwrap_or(0);
        let total_bytes =
            json_u64(row.get("total_bytes")).unwrap_or(total_rows * self.row_bytes_hint());
        Ok(Some((total_rows, total_bytes)))
    }
}

#[async_trait::async_trait]
impl ExecutionEngine for ClusterEngine {
    fn name(&self) -> &'static str {
        "cluster"
    }

    async fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        self.send("SELECT 1").await?;
        self.send(&format!(
            "CREATE DATABASE IF NOT EXISTS {}",
            self.config.database
        ))
        .await?;
        self.initialized.store(true, Ordering::Release);
        debug!(url = %self.config.url, "cluster engine initialized");
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<ExecutionResult> {
        self.initialize().await?;
        let start = Instant::now();
        let clean_sql = Self::sanitize_sql(sql);

        let kind = validate::statement_kind(&clean_sql);
        let data = if matches!(kind, "SELECT" | "WITH") {
            self.query_json(&clean_sql).await?
        } else {
            self.send(&clean_sql).await?;
            Vec::new()
        };

        let execution_time = start.elapsed().as_secs_f64();
        let row_count = data.len() as u64;
        let query_plan = self.query_plan(&clean_sql).await;

        let memory_used_mb = (row_count as f64 * 0.002).max(0.5);
        Ok(ExecutionResult {
            rows: row_count,
            execution_time,
            engine: self.name().to_string(),
            query_plan,
            performance_metrics: split_metrics(
                execution_time,
                memory_used_mb,
                row_count,
                (0.6, 0.2, 0.1),
            ),
            data,
        })
    }

    async fn validate(&self, sql: &str) -> Result<ValidationReport> {
        if self.initialize().await.is_err() {
            return Ok(ValidationReport::engine_unavailable(
                "Cluster engine is not available",
                "Cluster connection failed. Please check the connection settings.",
            ));
        }
        let start = Instant::now();

        if sql.trim().is_empty() {
            return Ok(ValidationReport::empty_query());
        }
        let clean_sql = Self::sanitize_sql(sql);

        let query_type = validate::statement_kind(&clean_sql).to_string();
        let affected_tables = validate::extract_table_names(&clean_sql);
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let valid = match self.query_json(&format!("EXPLAIN {clean_sql}")).await {
            Ok(_) => true,
            Err(e) => {
                errors.push(e.to_string());
                false
            }
        };

        let mut estimated_rows: u64 = 0;
        let mut estimated_bytes: u64 = 0;
        if valid {
            for table in &affected_tables {
                match self.table_stats(table).await {
                    Ok(Some((rows, bytes))) => {
                        estimated_rows += rows;
                        estimated_bytes += bytes;
                    }
                    Ok(None) => warnings.push(format!(
                        "Table '{table}' not found or no statistics available"
                    )),
                    Err(e) => warnings.push(format!(
                        "Could not estimate size for table '{table}': {e}"
                    )),
                }
            }
        }

        warnings.extend(validate::scan_warnings(&clean_sql, &query_type, estimated_rows));
        let estimated_time_ms =
            validate::estimate_execution_time_ms(&clean_sql, estimated_rows, &COST_MODEL);

        let suggestion = if valid {
            validate::size_suggestion(estimated_bytes, estimated_rows)
        } else {
            "Query validation failed. Please check the syntax and try again.".to_string()
        };

        Ok(ValidationReport {
            valid,
            estimated_bytes_processed: estimated_bytes,
            estimated_rows_scanned: estimated_rows,
            estimated_execution_time_ms: estimated_time_ms,
            affected_tables,
            query_type,
            warnings,
            errors,
            suggestion,
            validation_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn describe(&self) -> Result<SchemaInfo> {
        self.initialize().await?;

        let tables_rows = self
            .query_json(&format!(
                "SELECT name, engine FROM system.tables WHERE database = '{}'",
                self.config.database
            ))
            .await?;

        let mut tables = Vec::with_capacity(tables_rows.len());
        for row in tables_rows {
            let Some(name) = row.get("name").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let kind = row
                .get("engine")
                .and_then(Value::as_str)
                .unwrap_or("table")
                .to_string();

            let columns = self
                .query_json(&format!(
                    "SELECT name, type FROM system.columns \
                     WHERE database = '{}' AND table = '{}'",
                    self.config.database, name
                ))
                .await?
                .iter()
                .filter_map(|col| {
                    Some(ColumnInfo {
                        name: col.get("name")?.as_str()?.to_string(),
                        data_type: col.get("type")?.as_str()?.to_string(),
                    })
                })
                .collect();

            tables.push(TableInfo {
                name,
                kind,
                columns,
            });
        }

        Ok(SchemaInfo {
            engine: self.name().to_string(),
            database: self.config.database.clone(),
            tables,
        })
    }

    async fn status(&self) -> EngineStatus {
        if !self.initialized.load(Ordering::Acquire) {
            return EngineStatus::Uninitialized;
        }
        match self.send("SELECT 1").await {
            Ok(_) => EngineStatus::Available,
            Err(e) => {
                warn!(error = %e, "cluster engine health probe failed");
                EngineStatus::Unavailable
            }
        }
    }

    async fn close(&self) {
        self.initialized.store(false, Ordering::Release);
    }
}

/// The cluster quotes 64-bit integers as strings in its JSON format;
/// accept either spelling.
fn json_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_comments_and_terminators() {
        let sql = "SELECT 1 -- trailing comment\nFROM t; -- another\n";
        assert_eq!(ClusterEngine::sanitize_sql(sql), "SELECT 1 FROM t");
    }

    #[test]
    fn sanitize_collapses_multiline_statements() {
        let sql = "SELECT\n    a,\n    b\nFROM t\nWHERE a > 1;";
        assert_eq!(
            ClusterEngine::sanitize_sql(sql),
            "SELECT a, b FROM t WHERE a > 1"
        );
    }

    #[test]
    fn quoted_integers_parse_from_the_wire() {
        assert_eq!(json_u64(Some(&serde_json::json!(42))), Some(42));
        assert_eq!(json_u64(Some(&serde_json::json!("42"))), Some(42));
        assert_eq!(json_u64(Some(&serde_json::json!(null))), None);
        assert_eq!(json_u64(None), None);
    }
}
