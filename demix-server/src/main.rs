use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use demix_server::api::{ApiServer, AppState, ServiceLimits};
use demix_server::config::AppConfig;
use demix_server::database::{self, SqlxJobRepository};
use demix_server::intake::AudioIntakeValidator;
use demix_server::jobs::{
    ExecutionCoordinator, JobContext, JobService, OutputLayout, RetentionSweeper,
};
use demix_server::logging;
use demix_server::retrieval::{ContentRetriever, YtDlpRetriever};
use demix_server::separation::DemucsSeparator;
use demix_server::utils::fs;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();

    // Keep the guard alive so buffered file logs are flushed on exit.
    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        "Starting demix-server"
    );

    fs::ensure_dir_all_with_op("creating jobs directory", &config.jobs_dir()).await?;
    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let repository = Arc::new(SqlxJobRepository::new(pool.clone()));
    let ctx = JobContext::new(repository, OutputLayout::new(config.jobs_dir()));

    let retriever: Arc<dyn ContentRetriever> =
        Arc::new(YtDlpRetriever::new(config.ytdlp_config()));
    let separator = Arc::new(DemucsSeparator::new(config.demucs_config()));
    let coordinator = Arc::new(ExecutionCoordinator::new(
        config.coordinator_config(),
        ctx.clone(),
        separator,
        retriever.clone(),
    ));

    let service = JobService::new(
        config.service_config(),
        ctx,
        coordinator.clone(),
        Arc::new(AudioIntakeValidator::new(config.intake_config())),
        retriever,
    );
    service.load_persisted().await?;

    let shutdown = CancellationToken::new();
    let coordinator_handle = coordinator.start();
    let sweeper_handle = RetentionSweeper::new(config.retention_config(), service.clone())
        .start_background_task(shutdown.child_token());
    logging_config.start_retention_cleanup(shutdown.child_token());

    let limits = ServiceLimits {
        max_upload_bytes: config.max_upload_bytes,
        max_source_duration_secs: config.max_source_duration_secs,
    };
    let state = AppState::new(service, limits).with_logging_config(logging_config);
    let server = ApiServer::new(config.api_server_config(), state);

    let server_token = server.cancel_token();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        signal_token.cancel();
        server_token.cancel();
    });

    let served = server.run().await;

    info!("Shutting down services");
    shutdown.cancel();
    coordinator.shutdown();
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = coordinator_handle.await;
        let _ = sweeper_handle.await;
    })
    .await;
    if drained.is_err() {
        warn!("Shutdown timeout reached, forcing shutdown");
    }
    pool.close().await;
    info!("Services shut down");

    served?;
    Ok(())
}
