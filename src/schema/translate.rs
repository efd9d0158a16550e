//! Schema JSON → engine DDL translation.
//!
//! Maps the BigQuery-style type tags onto each engine's native types
//! and emits `CREATE TABLE` statements plus an optional flattened view
//! that projects nested RECORD leaves to dot-joined columns. RECORD
//! and REPEATED fields land in JSON-encoded string columns on both
//! engines, with the original mode preserved as a column annotation.

use crate::schema::fields::{RecordLeaf, SchemaField, record_leaves};

/// SQL dialect of a target engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineDialect {
    Local,
    Cluster,
}

impl EngineDialect {
    pub fn for_engine(name: &str) -> Option<Self> {
        match name {
            "local" => Some(Self::Local),
            "cluster" => Some(Self::Cluster),
            _ => None,
        }
    }

    /// Native column type for a BigQuery-style type tag. Unknown tags
    /// degrade to the engine's string type.
    pub fn native_type(self, tag: &str) -> &'static str {
        match self {
            Self::Local => match tag.to_uppercase().as_str() {
                "STRING" => "TEXT",
                "INTEGER" => "BIGINT",
                "FLOAT" => "DOUBLE",
                "BOOLEAN" => "BOOLEAN",
                "TIMESTAMP" => "TIMESTAMP",
                _ => "TEXT",
            },
            Self::Cluster => match tag.to_uppercase().as_str() {
                "STRING" => "String",
                "INTEGER" => "Int64",
                "FLOAT" => "Float64",
                "BOOLEAN" => "Bool",
                "TIMESTAMP" => "DateTime64(3)",
                _ => "String",
            },
        }
    }

    pub fn quote_ident(self, name: &str) -> String {
        match self {
            Self::Local => format!("\"{}\"", name.replace('"', "\"\"")),
            Self::Cluster => format!("`{}`", name.replace('`', "``")),
        }
    }

    /// Fully qualified table reference. The local engine has a single
    /// namespace, so the logical `db.table` pair becomes one quoted
    /// identifier there.
    pub fn qualified_table(self, database: &str, table: &str) -> String {
        match self {
            Self::Local => self.quote_ident(&format!("{database}.{table}")),
            Self::Cluster => format!("{database}.{table}"),
        }
    }

    pub fn bool_literal(self, value: bool) -> &'static str {
        match (self, value) {
            (Self::Local, true) => "TRUE",
            (Self::Local, false) => "FALSE",
            (Self::Cluster, true) => "true",
            (Self::Cluster, false) => "false",
        }
    }

    fn json_leaf_expr(self, column: &str, json_path: &str) -> String {
        let quoted = self.quote_ident(column);
        match self {
            Self::Local => format!("json_extract({quoted}, '$.{json_path}')"),
            Self::Cluster => format!("JSON_VALUE({quoted}, '$.{json_path}')"),
        }
    }
}

/// Column definition for one top-level schema field.
fn column_sql(dialect: EngineDialect, field: &SchemaField) -> String {
    let name = dialect.quote_ident(&field.name);

    // RECORD and REPEATED have no scalar shape; both engines store
    // them as JSON text and keep the mode tag next to the column.
    if field.is_record() || field.is_repeated() {
        let json_type = dialect.native_type("STRING");
        let mode = if field.is_repeated() { "REPEATED" } else { &field.mode };
        return match dialect {
            EngineDialect::Local => format!("{name} {json_type} /* {mode} */"),
            EngineDialect::Cluster => format!("{name} {json_type} COMMENT 'mode: {mode}'"),
        };
    }

    let native = dialect.native_type(&field.field_type);
    match dialect {
        EngineDialect::Local => {
            if field.is_required() {
                format!("{name} {native} NOT NULL")
            } else {
                format!("{name} {native}")
            }
        }
        EngineDialect::Cluster => {
            if field.is_required() {
                format!("{name} {native}")
            } else {
                format!("{name} Nullable({native})")
            }
        }
    }
}

/// Emit the `CREATE TABLE` statement for a schema on one engine.
///
/// Two bookkeeping columns ride along with every table so ingested
/// rows can carry their source line and load time.
pub fn create_table_sql(
    dialect: EngineDialect,
    database: &str,
    table: &str,
    fields: &[SchemaField],
    if_not_exists: bool,
) -> String {
    let qualified = dialect.qualified_table(database, table);
    let exists_clause = if if_not_exists { "IF NOT EXISTS " } else { "" };

    let mut columns: Vec<String> = fields.iter().map(|f| column_sql(dialect, f)).collect();
    match dialect {
        EngineDialect::Local => {
            columns.push("\"_line_number\" BIGINT".to_string());
            columns.push("\"_ingestion_timestamp\" TIMESTAMP".to_string());
        }
        EngineDialect::Cluster => {
            columns.push("`_line_number` Nullable(Int64)".to_string());
            columns.push("`_ingestion_timestamp` Nullable(DateTime64(3))".to_string());
        }
    }
    let column_list = columns.join(",\n    ");

    match dialect {
        EngineDialect::Local => {
            format!("CREATE TABLE {exists_clause}{qualified} (\n    {column_list}\n)")
        }
        EngineDialect::Cluster => format!(
            "CREATE TABLE {exists_clause}{qualified} (\n    {column_list}\n) ENGINE = MergeTree()\nORDER BY tuple()"
        ),
    }
}

/// Statements needed before the table itself (cluster databases are
/// explicit; the local engine has none).
pub fn create_database_sql(dialect: EngineDialect, database: &str) -> Option<String> {
    match dialect {
        EngineDialect::Local => None,
        EngineDialect::Cluster => Some(format!("CREATE DATABASE IF NOT EXISTS {database}")),
    }
}

/// Emit the flattened view projecting every RECORD leaf to its
/// dot-joined path. Returns None when the schema has no nested fields,
/// making the view a no-op for flat schemas.
pub fn flattened_view_sql(
    dialect: EngineDialect,
    database: &str,
    table: &str,
    fields: &[SchemaField],
) -> Option<String> {
    let leaves = record_leaves(fields);
    if leaves.is_empty() {
        return None;
    }

    let qualified = dialect.qualified_table(database, table);
    let view = dialect.qualified_table(database, &format!("{table}_flattened"));

    let mut projections: Vec<String> = fields
        .iter()
        .filter(|f| !f.is_record())
        .map(|f| dialect.quote_ident(&f.name))
        .collect();
    projections.extend(leaves.iter().map(|leaf: &RecordLeaf| {
        format!(
            "{} AS {}",
            dialect.json_leaf_expr(&leaf.column, &leaf.json_path),
            dialect.quote_ident(&leaf.full_path)
        )
    }));
    let projection_list = projections.join(",\n    ");

    Some(format!(
        "CREATE VIEW IF NOT EXISTS {view} AS\nSELECT\n    {projection_list}\nFROM {qualified}"
    ))
}
