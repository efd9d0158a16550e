//! Configuration module for the query service.
//!
//! Configuration is loaded from environment variables using the figment
//! crate. Duration fields accept both numeric values (interpreted as
//! seconds) and duration strings with units.

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Main application configuration.
#[derive(Deserialize, Clone)]
pub struct Config {
    /// Log level for the application
    ///
    /// This value is used to set the log level for this application's target specifically.
    /// e.g. "debug" would be similar to "warn,quarry=debug"
    ///
    /// Valid values are: "trace", "debug", "info", "warn", "error"
    /// Defaults to "info" if not specified
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Number of compute slots handed out by the scheduler (default: 8)
    #[serde(default = "default_total_slots")]
    pub total_slots: usize,
    /// How often the scheduler re-examines the queue
    ///
    /// Plain integers mean seconds; unit strings like "250ms" also
    /// work. Defaults to 500ms; must stay at or below one second.
    #[serde(
        default = "default_scheduler_tick",
        deserialize_with = "deserialize_duration"
    )]
    pub scheduler_tick: Duration,
    /// How long shutdown waits for the scheduler and its executors
    /// before giving up (same formats as `scheduler_tick`; default 8s)
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    /// SQLite database file holding terminal job history
    #[serde(default = "default_history_db_path")]
    pub history_db_path: String,
    /// SQLite database file backing the schema registry
    #[serde(default = "default_registry_db_path")]
    pub registry_db_path: String,
    /// Database file for the embedded local engine (":memory:" for ephemeral)
    #[serde(default = "default_local_db_path")]
    pub local_db_path: String,

    /// HTTP endpoint of the remote columnar cluster
    #[serde(default = "default_cluster_url")]
    pub cluster_url: String,
    /// Cluster username
    #[serde(default = "default_cluster_user")]
    pub cluster_user: String,
    /// Cluster password
    #[serde(default)]
    pub cluster_password: String,
    /// Default database on the cluster
    #[serde(default = "default_cluster_database")]
    pub cluster_database: String,

    /// Path to the protoc binary used for schema translation and ingestion
    #[serde(default = "default_protoc_path")]
    pub protoc_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            total_slots: default_total_slots(),
            scheduler_tick: default_scheduler_tick(),
            shutdown_timeout: default_shutdown_timeout(),
            history_db_path: default_history_db_path(),
            registry_db_path: default_registry_db_path(),
            local_db_path: default_local_db_path(),
            cluster_url: default_cluster_url(),
            cluster_user: default_cluster_user(),
            cluster_password: String::new(),
            cluster_database: default_cluster_database(),
            protoc_path: default_protoc_path(),
        }
    }
}

/// Default log level of "info"
fn default_log_level() -> String {
    "info".to_string()
}

/// Default slot count of 8
fn default_total_slots() -> usize {
    8
}

/// Default scheduler tick of 500ms
fn default_scheduler_tick() -> Duration {
    Duration::from_millis(500)
}

/// Default shutdown timeout of 8 seconds
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_history_db_path() -> String {
    "data/job_history.db".to_string()
}

fn default_registry_db_path() -> String {
    "data/schema_registry.db".to_string()
}

fn default_local_db_path() -> String {
    ":memory:".to_string()
}

fn default_cluster_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_cluster_user() -> String {
    "admin".to_string()
}

fn default_cluster_database() -> String {
    "quarry".to_string()
}

fn default_protoc_path() -> String {
    "protoc".to_string()
}

/// Parser for the duration-valued settings (scheduler tick, shutdown
/// timeout). A bare number means seconds; `ms`, `s`, and `m` suffixes
/// are accepted, optionally space-separated from the number, and
/// several terms sum (`"1m 30s"` is 90 seconds). Fractions, exponents,
/// and infinities are rejected so a typo'd tick cannot become
/// something absurd.
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[TimeUnit::Second, TimeUnit::MilliSecond, TimeUnit::Minute])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Deserialize a duration setting from either a plain integer (whole
/// seconds, as environment variables usually arrive) or a unit string
/// handled by [`DURATION_PARSER`]: `SCHEDULER_TICK=1` and
/// `SCHEDULER_TICK=250ms` both work.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("seconds as an integer, or a duration string with units")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER
                .parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "cannot parse duration '{value}': {e} (try '8', '250ms', '30s', or '2m')"
                    ))
                })?
                .try_into()
                .map_err(|e| {
                    serde::de::Error::custom(format!("duration '{value}' out of range: {e}"))
                })
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            u64::try_from(value)
                .map(Duration::from_secs)
                .map_err(|_| serde::de::Error::custom("duration must not be negative"))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
