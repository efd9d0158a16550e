//! Logging setup for the demo binary.

use crate::config::Config;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Log output format selection.
#[derive(Clone, Copy, Debug)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Configure and initialize logging for the application.
///
/// `RUST_LOG` takes precedence when set; otherwise the configured level
/// applies to this crate's target while the rest of the dependency tree
/// stays at `warn`.
pub fn setup_logging(config: &Config, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let base_level = &config.log_level;
        EnvFilter::new(format!("warn,quarry={}", base_level))
    });

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = match format {
        LogFormat::Pretty => Box::new(
            FmtSubscriber::builder()
                .with_target(true)
                .with_env_filter(filter)
                .finish(),
        ),
        LogFormat::Json => Box::new(
            FmtSubscriber::builder()
                .with_target(true)
                .json()
                .with_env_filter(filter)
                .finish(),
        ),
    };

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}
