//! Embedded local engine adapter.
//!
//! Runs statements against an in-process SQLite database through a
//! sqlx pool. This is the zero-network engine of the pair: every query
//! executes in the calling task, which is why its simulated metric
//! split assigns no network time.

use crate::engine::{
    ColumnInfo, EngineStatus, ExecutionEngine, ExecutionResult, SchemaInfo, TableInfo,
    split_metrics,
};
use crate::error::{Result, ServiceError};
use crate::storage::sqlite_pool;
use crate::validate::{self, CostModel, ValidationReport};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

const COST_MODEL: CostModel = CostModel {
    base_ms: 10.0,
    per_row_ms: 0.001,
    per_join_ms: 50.0,
    group_by_per_row_ms: 0.01,
    order_by_per_row_ms: 0.005,
    window_per_row_ms: 0.02,
    per_subquery_ms: 100.0,
};

/// Adapter over the embedded SQL engine.
pub struct LocalEngine {
    pool: SqlitePool,
    initialized: AtomicBool,
}

impl LocalEngine {
    /// Open the engine's backing database. `:memory:` gives an
    /// ephemeral instance.
    pub async fn connect(db_path: &str) -> Result<Self> {
        let pool = sqlite_pool(db_path).await?;
        Ok(Self {
            pool,
            initialized: AtomicBool::new(false),
        })
    }

    async fn query_plan(&self, sql: &str) -> String {
        let plan_sql = format!("EXPLAIN QUERY PLAN {sql}");
        match sqlx::query(&plan_sql).fetch_all(&self.pool).await {
            Ok(rows) => {
                let lines: Vec<String> = rows
                    .iter()
                    .filter_map(|row| row.try_get::<String, _>("detail").ok())
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

    async fn table_row_count(&self, table: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait::async_trait]
impl ExecutionEngine for LocalEngine {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        self.initialized.store(true, Ordering::Release);
        debug!("local engine initialized");
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<ExecutionResult> {
        self.initialize().await?;
        let start = Instant::now();

        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ServiceError::engine("local", e.to_string()))?;

        let execution_time = start.elapsed().as_secs_f64();
        let data: Vec<serde_json::Map<String, Value>> = rows.iter().map(row_to_json).collect();
        let row_count = data.len() as u64;
        let query_plan = self.query_plan(sql).await;

        let memory_used_mb = (row_count as f64 * 0.001).max(0.1);
        Ok(ExecutionResult {
            rows: row_count,
            execution_time,
            engine: self.name().to_string(),
            query_plan,
            performance_metrics: split_metrics(
                execution_time,
                memory_used_mb,
                row_count,
                (0.8, 0.1, 0.0),
            ),
            data,
        })
    }

    async fn validate(&self, sql: &str) -> Result<ValidationReport> {
        self.initialize().await?;
        let start = Instant::now();

        let clean_sql = sql.trim();
        if clean_sql.is_empty() {
            return Ok(ValidationReport::empty_query());
        }

        let query_type = validate::statement_kind(clean_sql).to_string();
        let affected_tables = validate::extract_table_names(clean_sql);
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        // EXPLAIN parses and plans without touching any data.
        let valid = match sqlx::query(&format!("EXPLAIN {clean_sql}"))
            .fetch_all(&self.pool)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                errors.push(e.to_string());
                false
            }
        };

        let mut estimated_rows: u64 = 0;
        if valid {
            for table in &affected_tables {
                match self.table_row_count(table).await {
                    Ok(count) => estimated_rows += count,
                    Err(_) => warnings.push(format!("Could not estimate size for table: {table}")),
                }
            }
        }
        let estimated_bytes = estimated_rows * self.row_bytes_hint();

        warnings.extend(validate::scan_warnings(clean_sql, &query_type, estimated_rows));
        let estimated_time_ms =
            validate::estimate_execution_time_ms(clean_sql, estimated_rows, &COST_MODEL);

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

        let tables_rows = sqlx::query(
            "SELECT name, type FROM sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tables = Vec::with_capacity(tables_rows.len());
        for row in tables_rows {
            let name: String = row.try_get("name")?;
            let kind: String = row.try_get("type")?;

            let quoted = name.replace('"', "\"\"");
            let columns = sqlx::query(&format!("PRAGMA table_info(\"{quoted}\")"))
                .fetch_all(&self.pool)
                .await?
                .iter()
                .map(|col| {
                    Ok(ColumnInfo {
                        name: col.try_get("name")?,
                        data_type: col.try_get("type")?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            tables.push(TableInfo {
                name,
                kind,
                columns,
            });
        }

        Ok(SchemaInfo {
            engine: self.name().to_string(),
            database: "main".to_string(),
            tables,
        })
    }

    async fn status(&self) -> EngineStatus {
        if !self.initialized.load(Ordering::Acquire) {
            return EngineStatus::Uninitialized;
        }
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => EngineStatus::Available,
            Err(e) => {
                warn!(error = %e, "local engine health probe failed");
                EngineStatus::Unavailable
            }
        }
    }

    async fn close(&self) {
        self.pool.close().await;
        self.initialized.store(false, Ordering::Release);
    }

    fn row_bytes_hint(&self) -> u64 {
        150
    }
}

/// Convert one result row to a name→value JSON map.
fn row_to_json(row: &SqliteRow) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), decode_value(row, i));
    }
    map
}

/// Decode a single column into a serializable JSON value.
///
/// Timestamp-typed columns become ISO-8601 strings; non-finite floats
/// become null (JSON has no NaN); blobs are rendered lossily as text so
/// no raw bytes reach the caller.
fn decode_value(row: &SqliteRow, index: usize) -> Value {
    let Ok(raw) = row.try_get_raw(index) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }

    match raw.type_info().name() {
        "INTEGER" => row
            .try_get::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" | "NUMERIC" => row
            .try_get::<f64, _>(index)
            .ok()
            .and_then(|v| serde_json::Number::from_f64(v).map(Value::Number))
            .unwrap_or(Value::Null),
        "BOOLEAN" => row
            .try_get::<bool, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "DATETIME" | "DATE" | "TIME" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
            .map(|ts| Value::from(ts.to_rfc3339()))
            .or_else(|_| row.try_get::<String, _>(index).map(Value::from))
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|bytes| Value::from(String::from_utf8_lossy(&bytes).into_owned()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
    }
}
