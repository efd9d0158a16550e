//! Versioned schema registry backed by SQLite.
//!
//! Schemas are keyed `{database}.{table}` and versioned by a content
//! hash of their canonical JSON. Registration is idempotent for
//! unchanged content; changed content appends a version row and
//! advances the current pointer. All writes run in a transaction so a
//! failed registration leaves the registry untouched.

use crate::error::{Result, ServiceError};
use crate::schema::fields::{FieldRow, SchemaField, flatten_fields, parse_fields};
use crate::storage::sqlite_pool;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

/// Current version of a registered schema.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaRecord {
    pub schema_id: String,
    pub table_name: String,
    pub database_name: String,
    pub version_hash: String,
    pub proto_source: Option<String>,
    pub schema_json: Value,
    pub fields: Vec<SchemaField>,
    pub created_at: DateTime<Utc>,
    pub engines_created: Vec<String>,
}

/// Summary row for schema listings.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaMetadata {
    pub schema_id: String,
    pub table_name: String,
    pub database_name: String,
    pub current_version: String,
    pub total_versions: u32,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub engines_created: Vec<String>,
    pub field_count: u32,
}

#[derive(Clone)]
pub struct SchemaRegistry {
    pool: SqlitePool,
}

impl SchemaRegistry {
    /// Open (and if needed create) the registry at `db_path`.
    pub async fn open(db_path: &str) -> Result<Self> {
        let pool = sqlite_pool(db_path).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schemas (
                schema_id TEXT PRIMARY KEY,
                table_name TEXT NOT NULL,
                database_name TEXT NOT NULL,
                current_version TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                total_versions INTEGER NOT NULL DEFAULT 1,
                UNIQUE(table_name, database_name)
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                schema_id TEXT NOT NULL,
                version_hash TEXT NOT NULL,
                proto_source TEXT,
                schema_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                engines_created TEXT NOT NULL DEFAULT '[]',
                UNIQUE(schema_id, version_hash)
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_fields (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                schema_id TEXT NOT NULL,
                version_hash TEXT NOT NULL,
                field_path TEXT NOT NULL,
                name TEXT NOT NULL,
                field_type TEXT NOT NULL,
                field_mode TEXT NOT NULL,
                description TEXT,
                policy_tags TEXT,
                parent_path TEXT
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_schema_fields_version \
             ON schema_fields (schema_id, version_hash)",
        )
        .execute(&pool)
        .await?;

        debug!(db_path, "schema registry ready");
        Ok(Self { pool })
    }

    /// Deterministic version hash: first 16 hex chars of the SHA-256
    /// of the canonical JSON.
    pub fn version_hash(canonical_json: &str) -> String {
        let digest = Sha256::digest(canonical_json.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        hex[..16].to_string()
    }

    /// Register a schema from its BigQuery-style JSON.
    ///
    /// Returns the schema id. Unchanged canonical JSON is a no-op;
    /// changed JSON appends a new version and bumps `total_versions`.
    pub async fn register_from_json(
        &self,
        schema_json: &Value,
        table_name: &str,
        database_name: &str,
        proto_source: Option<&str>,
    ) -> Result<String> {
        let fields = parse_fields(schema_json)?;
        let canonical = serde_json::to_string(schema_json)?;
        let version_hash = Self::version_hash(&canonical);
        let schema_id = format!("{database_name}.{table_name}");
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT current_version FROM schemas WHERE schema_id = ?1")
                .bind(&schema_id)
                .fetch_optional(&mut *tx)
                .await?;

        match existing {
            Some(current) if current == version_hash => {
                debug!(schema_id, version_hash, "schema already registered at this version");
                return Ok(schema_id);
            }
            Some(_) => {
                sqlx::query(
                    "INSERT INTO schema_versions \
                     (schema_id, version_hash, proto_source, schema_json, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .bind(&schema_id)
                .bind(&version_hash)
                .bind(proto_source)
                .bind(&canonical)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    "UPDATE schemas SET current_version = ?1, last_updated = ?2, \
                     total_versions = total_versions + 1 WHERE schema_id = ?3",
                )
                .bind(&version_hash)
                .bind(&now)
                .bind(&schema_id)
                .execute(&mut *tx)
                .await?;
                info!(schema_id, version_hash, "schema updated to new version");
            }
            None => {
                sqlx::query(
                    "INSERT INTO schemas \
                     (schema_id, table_name, database_name, current_version, created_at, last_updated) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .bind(&schema_id)
                .bind(table_name)
                .bind(database_name)
                .bind(&version_hash)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    "INSERT INTO schema_versions \
                     (schema_id, version_hash, proto_source, schema_json, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .bind(&schema_id)
                .bind(&version_hash)
                .bind(proto_source)
                .bind(&canonical)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                info!(schema_id, version_hash, "schema registered");
            }
        }

        for row in flatten_fields(&fields) {
            insert_field_row(&mut tx, &schema_id, &version_hash, &row).await?;
        }

        tx.commit().await?;
        Ok(schema_id)
    }

    /// Fetch the current version of a schema.
    pub async fn get(&self, schema_id: &str) -> Result<Option<SchemaRecord>> {
        let row = sqlx::query(
            "SELECT s.schema_id, s.table_name, s.database_name, s.current_version, \
                    sv.proto_source, sv.schema_json, sv.created_at, sv.engines_created \
             FROM schemas s \
             JOIN schema_versions sv \
               ON s.schema_id = sv.schema_id AND s.current_version = sv.version_hash \
             WHERE s.schema_id = ?1",
        )
        .bind(schema_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let schema_json: Value = serde_json::from_str(&row.try_get::<String, _>("schema_json")?)?;
        let fields = parse_fields(&schema_json)?;
        let engines_created: Vec<String> =
            serde_json::from_str(&row.try_get::<String, _>("engines_created")?)?;

        Ok(Some(SchemaRecord {
            schema_id: row.try_get("schema_id")?,
            table_name: row.try_get("table_name")?,
            database_name: row.try_get("database_name")?,
            version_hash: row.try_get("current_version")?,
            proto_source: row.try_get("proto_source")?,
            schema_json,
            fields,
            created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
            engines_created,
        }))
    }

    /// List every registered schema with metadata, most recently
    /// updated first.
    pub async fn list(&self) -> Result<Vec<SchemaMetadata>> {
        let rows = sqlx::query(
            "SELECT s.schema_id, s.table_name, s.database_name, s.current_version, \
                    s.total_versions, s.created_at, s.last_updated, sv.engines_created, \
                    (SELECT COUNT(*) FROM schema_fields sf \
                      WHERE sf.schema_id = s.schema_id \
                        AND sf.version_hash = s.current_version) AS field_count \
             FROM schemas s \
             JOIN schema_versions sv \
               ON s.schema_id = sv.schema_id AND s.current_version = sv.version_hash \
             ORDER BY s.last_updated DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let engines_created: Vec<String> =
                    serde_json::from_str(&row.try_get::<String, _>("engines_created")?)?;
                Ok(SchemaMetadata {
                    schema_id: row.try_get("schema_id")?,
                    table_name: row.try_get("table_name")?,
                    database_name: row.try_get("database_name")?,
                    current_version: row.try_get("current_version")?,
                    total_versions: row.try_get::<i64, _>("total_versions")? as u32,
                    created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
                    last_updated: parse_ts(&row.try_get::<String, _>("last_updated")?)?,
                    engines_created,
                    field_count: row.try_get::<i64, _>("field_count")? as u32,
                })
            })
            .collect()
    }

    /// Record that a concrete table for the current version now exists
    /// in `engine`. Appending twice is a no-op.
    pub async fn mark_table_created(&self, schema_id: &str, engine: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(String, String)> = sqlx::query_as(
            "SELECT s.current_version, sv.engines_created \
             FROM schemas s \
             JOIN schema_versions sv \
               ON s.schema_id = sv.schema_id AND s.current_version = sv.version_hash \
             WHERE s.schema_id = ?1",
        )
        .bind(schema_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((version_hash, engines_json)) = current else {
            return Err(ServiceError::NotFound(format!("schema '{schema_id}'")));
        };
        let mut engines: Vec<String> = serde_json::from_str(&engines_json)?;
        if !engines.iter().any(|e| e == engine) {
            engines.push(engine.to_string());
            sqlx::query(
                "UPDATE schema_versions SET engines_created = ?1 \
                 WHERE schema_id = ?2 AND version_hash = ?3",
            )
            .bind(serde_json::to_string(&engines)?)
            .bind(schema_id)
            .bind(&version_hash)
            .execute(&mut *tx)
            .await?;
            debug!(schema_id, engine, "marked table created");
        }

        tx.commit().await?;
        Ok(())
    }

    /// Remove a schema with all its versions and field rows. The
    /// engine-side tables are untouched. Returns false when the id was
    /// unknown.
    pub async fn delete(&self, schema_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM schema_fields WHERE schema_id = ?1")
            .bind(schema_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM schema_versions WHERE schema_id = ?1")
            .bind(schema_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM schemas WHERE schema_id = ?1")
            .bind(schema_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        if deleted > 0 {
            info!(schema_id, "schema deleted");
        }
        Ok(deleted > 0)
    }
}

async fn insert_field_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    schema_id: &str,
    version_hash: &str,
    row: &FieldRow,
) -> Result<()> {
    let policy_tags = row
        .policy_tags
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    sqlx::query(
        "INSERT INTO schema_fields \
         (schema_id, version_hash, field_path, name, field_type, field_mode, \
          description, policy_tags, parent_path) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(schema_id)
    .bind(version_hash)
    .bind(&row.field_path)
    .bind(&row.name)
    .bind(&row.field_type)
    .bind(&row.mode)
    .bind(&row.description)
    .bind(policy_tags)
    .bind(&row.parent_path)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| ServiceError::InvalidInput(format!("bad timestamp '{raw}': {e}")))
}
