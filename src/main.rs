use clap::Parser;
use figment::{Figment, providers::Env};
use quarry::config::Config;
use quarry::jobs::JobState;
use quarry::logging::{LogFormat, setup_logging};
use quarry::service::{QueryService, QuerySubmission};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Quarry - slot-scheduled analytical query service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// How log output is rendered
    #[arg(long, value_enum, default_value_t = LogStyle::ByBuild)]
    log_style: LogStyle,
}

/// Rendering style for the demo binary's log output.
#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogStyle {
    /// Human-readable lines for watching the scheduler from a terminal
    Human,
    /// Newline-delimited JSON for log collectors
    Json,
    /// Human-readable in debug builds, JSON in release builds
    ByBuild,
}

impl LogStyle {
    fn resolve(self) -> LogFormat {
        match self {
            Self::Human => LogFormat::Pretty,
            Self::Json => LogFormat::Json,
            Self::ByBuild => {
                if cfg!(debug_assertions) {
                    LogFormat::Pretty
                } else {
                    LogFormat::Json
                }
            }
        }
    }
}

/// Demo queries submitted at mixed priorities, in the shape of the
/// analytical workload the service is built for.
const DEMO_QUERIES: &[(&str, u8, usize)] = &[
    ("SELECT COUNT(*) AS total_rows FROM \"demo.trips\"", 1, 1),
    (
        "SELECT payment_type, COUNT(*) AS trips, AVG(fare_amount) AS avg_fare \
         FROM \"demo.trips\" WHERE fare_amount > 0 GROUP BY payment_type ORDER BY trips DESC",
        2,
        2,
    ),
    ("SELECT AVG(fare_amount) AS avg_fare FROM \"demo.trips\" WHERE fare_amount > 0", 1, 1),
    ("SELECT * FROM \"demo.trips\" ORDER BY fare_amount DESC LIMIT 10", 3, 1),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config: Config = Figment::new().merge(Env::raw()).extract()?;

    setup_logging(&config, args.log_style.resolve());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        total_slots = config.total_slots,
        "starting quarry"
    );

    let service = QueryService::from_config(&config).await?;
    seed_demo_data(&service).await?;

    // The scheduler loop is the long-lived task; everything else hangs
    // off it.
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let scheduler = service.scheduler();
    let scheduler_handle = tokio::spawn({
        let shutdown_rx = shutdown_tx.subscribe();
        async move { scheduler.run(shutdown_rx).await }
    });

    submit_demo_queries(&service).await;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("received ctrl+c, gracefully shutting down...");
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm_stream =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM signal handler");
        sigterm_stream.recv().await;
        info!("received SIGTERM, gracefully shutting down...");
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm => {}
    }

    let status = service.system_status().await?;
    info!(
        completed = status.completed_jobs,
        queued = status.queued_jobs,
        running = status.running_jobs,
        "final system status"
    );

    let _ = shutdown_tx.send(());
    if tokio::time::timeout(config.shutdown_timeout, scheduler_handle)
        .await
        .is_err()
    {
        warn!("scheduler did not stop within the shutdown timeout");
    }

    info!("shutdown complete");
    Ok(())
}

/// Create and populate a small sample table on the local engine so the
/// demo queries have something to scan.
async fn seed_demo_data(service: &QueryService) -> anyhow::Result<()> {
    let trips_schema = serde_json::json!([
        {"name": "id", "type": "INTEGER", "mode": "REQUIRED"},
        {"name": "payment_type", "type": "STRING", "mode": "NULLABLE"},
        {"name": "fare_amount", "type": "FLOAT", "mode": "NULLABLE"},
        {"name": "picked_up_at", "type": "TIMESTAMP", "mode": "NULLABLE"}
    ]);
    service
        .register_schema_from_json(&trips_schema, "trips", "demo")
        .await?;
    let results = service
        .create_tables("demo.trips", &["local".to_string()], true, false)
        .await?;
    for result in &results {
        if let Some(error) = &result.error {
            warn!(engine = result.engine, error, "demo table creation failed");
        }
    }

    let seed = service
        .submit_query(QuerySubmission {
            sql: "WITH RECURSIVE seq(value) AS (\
                      SELECT 1 UNION ALL SELECT value + 1 FROM seq WHERE value < 5000\
                  ) \
                  INSERT INTO \"demo.trips\" (id, payment_type, fare_amount, picked_up_at) \
                  SELECT value, \
                         CASE value % 3 WHEN 0 THEN 'cash' WHEN 1 THEN 'card' ELSE 'dispute' END, \
                         5.0 + (value % 50), \
                         datetime('now', '-' || (value % 30) || ' days') \
                  FROM seq"
                .to_string(),
            ..Default::default()
        })
        .await?;
    info!(job_id = seed.job_id, "demo seed submitted");
    Ok(())
}

async fn submit_demo_queries(service: &QueryService) {
    for (sql, priority, slots) in DEMO_QUERIES {
        match service
            .submit_query(QuerySubmission {
                sql: sql.to_string(),
                priority: *priority,
                estimated_slots: *slots,
                ..Default::default()
            })
            .await
        {
            Ok(view) => info!(job_id = view.job_id, priority, "demo query submitted"),
            Err(e) => error!(error = %e, "demo query rejected"),
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    // Give the demo workload a moment, then report how it went.
    tokio::time::sleep(Duration::from_secs(2)).await;
    match service.list_jobs(Some(JobState::Completed), 10).await {
        Ok(jobs) => {
            for job in jobs {
                info!(
                    job_id = job.job_id,
                    rows = job.rows_processed,
                    execution_time = job.execution_time,
                    "demo query completed"
                );
            }
        }
        Err(e) => warn!(error = %e, "could not list demo jobs"),
    }
}
