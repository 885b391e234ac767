use musejump_worker::config::WorkerConfig;
use musejump_worker::logging::init_logging;
use musejump_worker::services::ServiceContainer;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;

    // Keep the guard alive or buffered file logs are dropped on exit.
    let (logging, _log_guard) = init_logging(&config.log_dir)?;

    let container = ServiceContainer::new(&config).await?;
    logging.start_retention_cleanup(container.cancellation_token());

    let report = match container.start().await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Initial user sync failed");
            container.shutdown().await;
            return Err(e.into());
        }
    };
    info!(
        subjects = report.total,
        log_filter = %logging.get_filter(),
        log_dir = %logging.log_dir().display(),
        "musejump-worker running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    container.shutdown().await;
    Ok(())
}
