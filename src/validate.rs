//! Query estimation heuristics shared by the engine adapters.
//!
//! Everything here is purely informational and never executes the
//! query under inspection. Engines plug in their own EXPLAIN probe and
//! table statistics; the statement classification, warning rules, cost
//! model, and suggestion formatting are common.

use num_format::{Locale, ToFormattedString};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Outcome of a pre-execution estimation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub estimated_bytes_processed: u64,
    pub estimated_rows_scanned: u64,
    pub estimated_execution_time_ms: u64,
    pub affected_tables: Vec<String>,
    pub query_type: String,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub suggestion: String,
    pub validation_time_ms: u64,
}

impl ValidationReport {
    /// Report for an empty query string.
    pub fn empty_query() -> Self {
        Self {
            valid: false,
            estimated_bytes_processed: 0,
            estimated_rows_scanned: 0,
            estimated_execution_time_ms: 0,
            affected_tables: Vec::new(),
            query_type: "UNKNOWN".to_string(),
            warnings: Vec::new(),
            errors: vec!["Empty query".to_string()],
            suggestion: "Please enter a SQL query.".to_string(),
            validation_time_ms: 0,
        }
    }

    /// Report for an engine that cannot be reached at all.
    pub fn engine_unavailable(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            valid: false,
            estimated_bytes_processed: 0,
            estimated_rows_scanned: 0,
            estimated_execution_time_ms: 0,
            affected_tables: Vec::new(),
            query_type: "UNKNOWN".to_string(),
            warnings: Vec::new(),
            errors: vec![message.into()],
            suggestion: hint.into(),
            validation_time_ms: 0,
        }
    }
}

/// Cost model constants for the coarse execution-time estimate.
#[derive(Debug, Clone, Copy)]
pub struct CostModel {
    pub base_ms: f64,
    pub per_row_ms: f64,
    pub per_join_ms: f64,
    pub group_by_per_row_ms: f64,
    pub order_by_per_row_ms: f64,
    pub window_per_row_ms: f64,
    pub per_subquery_ms: f64,
}

static TABLE_FROM_JOIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([a-zA-Z_][a-zA-Z0-9_]*)").expect("valid regex")
});
static TABLE_INSERT_INTO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bINSERT\s+INTO\s+([a-zA-Z_][a-zA-Z0-9_]*)").expect("valid regex")
});
static TABLE_UPDATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bUPDATE\s+([a-zA-Z_][a-zA-Z0-9_]*)").expect("valid regex"));
static HAS_LIMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\b").expect("valid regex"));
static HAS_WHERE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b").expect("valid regex"));
static JOIN_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bJOIN\b").expect("valid regex"));

/// Classify a statement by its leading keyword.
pub fn statement_kind(sql: &str) -> &'static str {
    let upper = sql.trim_start().to_uppercase();
    for kind in [
        "SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "WITH",
    ] {
        if upper.starts_with(kind) {
            return kind;
        }
    }
    "OTHER"
}

/// Extract referenced table names by pattern against FROM / JOIN /
/// INSERT INTO / UPDATE clauses.
///
/// This is intentionally regex-based rather than a full SQL parse;
/// qualified or quoted names fall outside the identifier charset and
/// are skipped, which only costs estimate precision.
pub fn extract_table_names(sql: &str) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for re in [&*TABLE_FROM_JOIN, &*TABLE_INSERT_INTO, &*TABLE_UPDATE] {
        for cap in re.captures_iter(sql) {
            let name = cap[1].to_string();
            if !tables.contains(&name) {
                tables.push(name);
            }
        }
    }
    tables
}

/// Warning rules applied to SELECT statements.
pub fn scan_warnings(sql: &str, kind: &str, estimated_rows: u64) -> Vec<String> {
    let mut warnings = Vec::new();
    if kind != "SELECT" {
        return warnings;
    }

    if sql.to_uppercase().contains("SELECT *") {
        warnings
            .push("Consider specifying column names instead of SELECT * for better performance".to_string());
    }
    if estimated_rows > 10_000 && !HAS_LIMIT.is_match(sql) {
        warnings.push(format!(
            "Query may return {} rows. Consider adding a LIMIT clause",
            estimated_rows.to_formatted_string(&Locale::en)
        ));
    }
    if estimated_rows > 1_000 && !HAS_WHERE.is_match(sql) {
        warnings.push(
            "Query scans entire table. Consider adding WHERE conditions to filter results"
                .to_string(),
        );
    }
    warnings
}

/// Coarse execution-time estimate from table size and query shape.
pub fn estimate_execution_time_ms(sql: &str, estimated_rows: u64, model: &CostModel) -> u64 {
    let mut time = model.base_ms;
    let rows = estimated_rows as f64;
    let upper = sql.to_uppercase();

    time += rows * model.per_row_ms;
    time += JOIN_COUNT.find_iter(sql).count() as f64 * model.per_join_ms;
    if upper.contains("GROUP BY") {
        time += rows * model.group_by_per_row_ms;
    }
    if upper.contains("ORDER BY") {
        time += rows * model.order_by_per_row_ms;
    }
    if upper.contains("OVER") && has_window_function(&upper) {
        time += rows * model.window_per_row_ms;
    }
    // Unbalanced parens approximate subquery depth well enough here.
    let subqueries = sql.matches('(').count().saturating_sub(sql.matches(')').count());
    time += subqueries as f64 * model.per_subquery_ms;

    time.max(model.base_ms) as u64
}

fn has_window_function(upper_sql: &str) -> bool {
    [
        "ROW_NUMBER", "RANK", "DENSE_RANK", "LAG", "LEAD", "SUM(", "COUNT(", "AVG(", "MIN(",
        "MAX(",
    ]
    .iter()
    .any(|f| upper_sql.contains(f))
}

/// Human-readable processing estimate in the console style:
/// "This query will process 1.5 MB when run. (≈12,345 rows scanned)"
pub fn size_suggestion(estimated_bytes: u64, estimated_rows: u64) -> String {
    let mut suggestion = format!(
        "This query will process {} when run.",
        format_bytes(estimated_bytes)
    );
    if estimated_rows > 0 {
        suggestion.push_str(&format!(
            " (≈{} rows scanned)",
            estimated_rows.to_formatted_string(&Locale::en)
        ));
    }
    suggestion
}

/// Render a byte count as B / KB / MB / GB.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    match bytes {
        b if b < KB => format!("{b} B"),
        b if b < MB => format!("{:.1} KB", b as f64 / KB as f64),
        b if b < GB => format!("{:.1} MB", b as f64 / MB as f64),
        b => format!("{:.1} GB", b as f64 / GB as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statements_by_leading_keyword() {
        assert_eq!(statement_kind("SELECT 1"), "SELECT");
        assert_eq!(statement_kind("  select * from t"), "SELECT");
        assert_eq!(statement_kind("WITH x AS (SELECT 1) SELECT * FROM x"), "WITH");
        assert_eq!(statement_kind("INSERT INTO t VALUES (1)"), "INSERT");
        assert_eq!(statement_kind("VACUUM"), "OTHER");
    }

    #[test]
    fn extracts_tables_from_clauses() {
        let tables = extract_table_names(
            "SELECT * FROM trips JOIN zones ON trips.zone_id = zones.id WHERE fare > 0",
        );
        assert_eq!(tables, vec!["trips".to_string(), "zones".to_string()]);

        assert_eq!(
            extract_table_names("INSERT INTO events VALUES (1)"),
            vec!["events".to_string()]
        );
        assert_eq!(
            extract_table_names("UPDATE users SET name = 'x'"),
            vec!["users".to_string()]
        );
    }

    #[test]
    fn duplicate_table_references_collapse() {
        let tables = extract_table_names("SELECT * FROM t JOIN t ON 1 = 1");
        assert_eq!(tables, vec!["t".to_string()]);
    }

    #[test]
    fn warns_on_select_star_and_unbounded_scans() {
        let warnings = scan_warnings("SELECT * FROM big", "SELECT", 50_000);
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("SELECT *"));
        assert!(warnings[1].contains("LIMIT"));
        assert!(warnings[2].contains("WHERE"));

        // Bounded query on a small table warns about nothing.
        let warnings = scan_warnings("SELECT id FROM small WHERE id = 1 LIMIT 5", "SELECT", 10);
        assert!(warnings.is_empty());

        // Non-SELECT statements never warn.
        assert!(scan_warnings("INSERT INTO big SELECT * FROM big", "INSERT", 50_000).is_empty());
    }

    #[test]
    fn execution_time_grows_with_complexity() {
        let model = CostModel {
            base_ms: 10.0,
            per_row_ms: 0.001,
            per_join_ms: 50.0,
            group_by_per_row_ms: 0.01,
            order_by_per_row_ms: 0.005,
            window_per_row_ms: 0.02,
            per_subquery_ms: 100.0,
        };
        let simple = estimate_execution_time_ms("SELECT id FROM t", 1_000, &model);
        let joined =
            estimate_execution_time_ms("SELECT id FROM t JOIN u ON t.id = u.id", 1_000, &model);
        assert!(joined > simple);
        assert!(simple >= 10);
    }

    #[test]
    fn byte_formatting_picks_sane_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024), "2.0 GB");
    }

    #[test]
    fn suggestion_includes_row_estimate() {
        let s = size_suggestion(2048, 1234);
        assert_eq!(s, "This query will process 2.0 KB when run. (≈1,234 rows scanned)");
        assert_eq!(
            size_suggestion(0, 0),
            "This query will process 0 B when run."
        );
    }
}
