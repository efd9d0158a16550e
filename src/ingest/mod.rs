//! Protobuf → table ingestion pipeline.
//!
//! Takes a blob of newline-delimited serialized messages, decodes them
//! against the registered schema's proto source, coerces each message
//! into a schema-shaped record, and drives batched inserts through the
//! target engine. The pipeline is lenient: per-line decode failures
//! and per-batch insert failures accumulate into the report instead of
//! aborting the run.

use crate::engine::ExecutionEngine;
use crate::error::{Result, ServiceError};
use crate::proto::{ProtoCompiler, top_level_message};
use crate::schema::registry::SchemaRegistry;
use crate::schema::translate::{
    EngineDialect, create_database_sql, create_table_sql, flattened_view_sql,
};
use crate::schema::SchemaField;
use chrono::Utc;
use prost_reflect::{DynamicMessage, SerializeOptions};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Parameters for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub schema_id: String,
    pub data: Vec<u8>,
    pub engine: String,
    pub batch_size: usize,
    pub create_table_if_missing: bool,
}

/// Terminal status of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IngestStatus {
    Completed,
    Partial,
    Failed,
}

/// Outcome of an ingestion run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestReport {
    pub schema_id: String,
    pub table_name: String,
    pub database_name: String,
    pub engine: String,
    pub status: IngestStatus,
    /// Records successfully decoded from the blob.
    pub records_processed: u64,
    /// Lines that failed to decode.
    pub records_failed: u64,
    /// Records that made it into the target table.
    pub records_inserted: u64,
    pub errors: Vec<String>,
    pub elapsed_ms: u64,
}

/// Decodes protobuf blobs and bulk-loads them into engine tables.
pub struct Ingester {
    registry: SchemaRegistry,
    compiler: Arc<dyn ProtoCompiler>,
}

impl Ingester {
    pub fn new(registry: SchemaRegistry, compiler: Arc<dyn ProtoCompiler>) -> Self {
        Self { registry, compiler }
    }

    pub async fn ingest(
        &self,
        engine: Arc<dyn ExecutionEngine>,
        request: IngestRequest,
    ) -> Result<IngestReport> {
        let start = Instant::now();

        let dialect = EngineDialect::for_engine(engine.name()).ok_or_else(|| {
            ServiceError::InvalidInput(format!("engine '{}' cannot be an ingestion target", engine.name()))
        })?;

        let record = self
            .registry
            .get(&request.schema_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("schema '{}'", request.schema_id)))?;
        let proto_source = record.proto_source.as_deref().ok_or_else(|| {
            ServiceError::Conflict(format!(
                "SCHEMA_NOT_INGESTIBLE: schema '{}' has no protobuf source",
                request.schema_id
            ))
        })?;

        let pool = self.compiler.compile_descriptors(proto_source).await?;
        let message_name = top_level_message(proto_source)?;
        let descriptor = pool
            .all_messages()
            .find(|m| m.name() == message_name)
            .ok_or_else(|| {
                ServiceError::ProtobufDecoding(format!(
                    "message '{message_name}' not found in compiled descriptors"
                ))
            })?;

        let mut errors: Vec<String> = Vec::new();
        let mut decoded: Vec<(u64, Value)> = Vec::new();
        let mut records_failed: u64 = 0;

        // The blob is newline-delimited: one serialized message per
        // line, empty fragments skipped but still counted for line
        // numbering.
        for (index, fragment) in request.data.split(|b| *b == b'\n').enumerate() {
            let line_number = (index + 1) as u64;
            let fragment = fragment.trim_ascii();
            if fragment.is_empty() {
                continue;
            }
            match DynamicMessage::decode(descriptor.clone(), fragment) {
                Ok(message) => match message_to_value(&message) {
                    Ok(value) => decoded.push((line_number, value)),
                    Err(e) => {
                        records_failed += 1;
                        errors.push(format!("Failed to decode message at line {line_number}: {e}"));
                    }
                },
                Err(e) => {
                    records_failed += 1;
                    errors.push(format!("Failed to decode message at line {line_number}: {e}"));
                }
            }
        }
        let records_processed = decoded.len() as u64;
        debug!(
            schema_id = request.schema_id,
            decoded = records_processed,
            failed = records_failed,
            "blob decoded"
        );

        let prepared: Vec<Vec<Value>> = decoded
            .iter()
            .map(|(line, value)| prepare_record(&record.fields, *line, value))
            .collect();

        if request.create_table_if_missing {
            self.ensure_table(&engine, dialect, &record, &mut errors).await;
        }

        let columns = column_list(&record.fields);
        let qualified = dialect.qualified_table(&record.database_name, &record.table_name);
        let column_sql: Vec<String> = columns.iter().map(|c| dialect.quote_ident(c)).collect();

        let mut records_inserted: u64 = 0;
        let batch_size = request.batch_size.max(1);
        for (batch_index, batch) in prepared.chunks(batch_size).enumerate() {
            let insert_sql = bulk_insert_sql(&qualified, &column_sql, batch, dialect);
            match engine.execute(&insert_sql).await {
                Ok(_) => {
                    records_inserted += batch.len() as u64;
                    debug!(batch = batch_index + 1, rows = batch.len(), "batch inserted");
                }
                Err(e) => {
                    errors.push(format!("Batch {}: {e}", batch_index + 1));
                    warn!(batch = batch_index + 1, error = %e, "batch insert failed");
                }
            }
        }

        let attempted = records_processed + records_failed;
        let status = if records_inserted == attempted {
            IngestStatus::Completed
        } else if records_inserted > 0 {
            IngestStatus::Partial
        } else {
            IngestStatus::Failed
        };

        info!(
            schema_id = request.schema_id,
            engine = engine.name(),
            ?status,
            inserted = records_inserted,
            "ingestion finished"
        );

        Ok(IngestReport {
            schema_id: request.schema_id,
            table_name: record.table_name,
            database_name: record.database_name,
            engine: engine.name().to_string(),
            status,
            records_processed,
            records_failed,
            records_inserted,
            errors,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Best-effort table creation ahead of the inserts. Failures are
    /// recorded but never abort the run.
    async fn ensure_table(
        &self,
        engine: &Arc<dyn ExecutionEngine>,
        dialect: EngineDialect,
        record: &crate::schema::SchemaRecord,
        errors: &mut Vec<String>,
    ) {
        let physical_name = match dialect {
            EngineDialect::Local => format!("{}.{}", record.database_name, record.table_name),
            EngineDialect::Cluster => record.table_name.clone(),
        };
        let exists = match engine.describe().await {
            Ok(info) => info.tables.iter().any(|t| t.name == physical_name),
            Err(e) => {
                warn!(error = %e, "could not check table existence");
                false
            }
        };
        if exists {
            return;
        }

        if let Some(db_sql) = create_database_sql(dialect, &record.database_name)
            && let Err(e) = engine.execute(&db_sql).await
        {
            warn!(error = %e, "database creation failed");
            errors.push(format!("Table creation: {e}"));
            return;
        }
        let ddl = create_table_sql(
            dialect,
            &record.database_name,
            &record.table_name,
            &record.fields,
            true,
        );
        match engine.execute(&ddl).await {
            Ok(_) => {
                info!(
                    schema_id = record.schema_id,
                    engine = engine.name(),
                    "created missing target table"
                );
                if let Err(e) = self
                    .registry
                    .mark_table_created(&record.schema_id, engine.name())
                    .await
                {
                    warn!(error = %e, "failed to record table creation");
                }
                if let Some(view_sql) = flattened_view_sql(
                    dialect,
                    &record.database_name,
                    &record.table_name,
                    &record.fields,
                ) && let Err(e) = engine.execute(&view_sql).await
                {
                    warn!(error = %e, "flattened view creation failed");
                }
            }
            Err(e) => {
                warn!(error = %e, "table creation failed");
                errors.push(format!("Table creation: {e}"));
            }
        }
    }
}

/// Column order used by every insert: schema fields first, then the
/// bookkeeping pair.
fn column_list(fields: &[SchemaField]) -> Vec<String> {
    let mut columns: Vec<String> = fields.iter().map(|f| f.name.clone()).collect();
    columns.push("_line_number".to_string());
    columns.push("_ingestion_timestamp".to_string());
    columns
}

/// Serialize a decoded message with proto field names preserved so the
/// keys line up with the registered schema, including fields at their
/// default values.
fn message_to_value(message: &DynamicMessage) -> Result<Value> {
    let options = SerializeOptions::new()
        .use_proto_field_name(true)
        .skip_default_fields(false);
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::new(&mut buf);
    message
        .serialize_with_options(&mut serializer, &options)
        .map_err(|e| ServiceError::ProtobufDecoding(e.to_string()))?;
    Ok(serde_json::from_slice(&buf)?)
}

/// Shape one decoded message into the insert column order, applying
/// the per-type coercions and attaching the bookkeeping values.
fn prepare_record(fields: &[SchemaField], line_number: u64, message: &Value) -> Vec<Value> {
    let mut values: Vec<Value> = fields
        .iter()
        .map(|field| match message.get(&field.name) {
            Some(value) if !value.is_null() => coerce_value(value, field),
            _ => default_value(field),
        })
        .collect();
    values.push(Value::from(line_number));
    values.push(Value::from(Utc::now().to_rfc3339()));
    values
}

/// Coerce a decoded field value to its database representation.
///
/// The proto3 JSON mapping spells 64-bit integers as strings, so
/// numeric coercions accept both forms. RECORD and REPEATED values are
/// stored as JSON-encoded strings.
fn coerce_value(value: &Value, field: &SchemaField) -> Value {
    if field.is_repeated() {
        return match value {
            Value::Array(_) => json_string(value),
            other => json_string(&Value::Array(vec![other.clone()])),
        };
    }
    if field.is_record() {
        return json_string(value);
    }

    match field.field_type.to_uppercase().as_str() {
        "STRING" => match value {
            Value::String(s) => Value::from(s.clone()),
            other => Value::from(other.to_string()),
        },
        "INTEGER" => match value {
            Value::Number(n) => n.as_i64().map(Value::from).unwrap_or_else(|| default_value(field)),
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or_else(|_| default_value(field)),
            _ => default_value(field),
        },
        "FLOAT" => match value {
            Value::Number(n) => n.as_f64().map(Value::from).unwrap_or_else(|| default_value(field)),
            Value::String(s) => s.parse::<f64>().map(Value::from).unwrap_or_else(|_| default_value(field)),
            _ => default_value(field),
        },
        "BOOLEAN" => match value {
            Value::Bool(b) => Value::from(*b),
            Value::String(s) => Value::from(s == "true"),
            _ => default_value(field),
        },
        "TIMESTAMP" => match value {
            Value::String(s) => Value::from(s.clone()),
            Value::Number(n) => n
                .as_i64()
                .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
                .map(|ts| Value::from(ts.to_rfc3339()))
                .unwrap_or_else(|| default_value(field)),
            other => Value::from(other.to_string()),
        },
        _ => match value {
            Value::String(s) => Value::from(s.clone()),
            other => Value::from(other.to_string()),
        },
    }
}

/// Default for a field the message did not carry.
fn default_value(field: &SchemaField) -> Value {
    if field.is_repeated() {
        return Value::from("[]");
    }
    match field.field_type.to_uppercase().as_str() {
        "STRING" => Value::from(""),
        "INTEGER" => Value::from(0),
        "FLOAT" => Value::from(0.0),
        "BOOLEAN" => Value::from(false),
        "TIMESTAMP" => Value::from(Utc::now().to_rfc3339()),
        "RECORD" => Value::from("{}"),
        _ => Value::Null,
    }
}

fn json_string(value: &Value) -> Value {
    Value::from(serde_json::to_string(value).unwrap_or_else(|_| "null".to_string()))
}

/// Build one multi-row INSERT statement with textually quoted values.
fn bulk_insert_sql(
    qualified_table: &str,
    columns: &[String],
    batch: &[Vec<Value>],
    dialect: EngineDialect,
) -> String {
    let rows: Vec<String> = batch
        .iter()
        .map(|record| {
            let rendered: Vec<String> =
                record.iter().map(|v| sql_literal(v, dialect)).collect();
            format!("({})", rendered.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified_table,
        columns.join(", "),
        rows.join(", ")
    )
}

/// Render one value as a SQL literal: strings escape single quotes by
/// doubling, null becomes the bare NULL token, booleans use the
/// engine's literals.
fn sql_literal(value: &Value, dialect: EngineDialect) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Bool(b) => dialect.bool_literal(*b).to_string(),
        Value::Number(n) => n.to_string(),
        other => format!(
            "'{}'",
            serde_json::to_string(other)
                .unwrap_or_else(|_| "null".to_string())
                .replace('\'', "''")
        ),
    }
}
