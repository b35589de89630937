use std::sync::Arc;

use mimalloc::MiMalloc;
use notifeed::api::{ApiServer, AppState};
use notifeed::config::AppConfig;
use notifeed::services::ServiceContainer;
use notifeed::{logging, panic_hook};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    let (logging_config, _guard) = logging::init_logging(&config.log_dir)?;
    panic_hook::install(&config.log_dir);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting notifeed");

    let services = Arc::new(ServiceContainer::from_config(&config).await?);
    logging_config.start_retention_cleanup(services.cancellation_token());

    let state = AppState::new(services.clone()).with_logging_config(logging_config);
    let server = ApiServer::new(config.server.clone(), state);
    let server_token = server.cancel_token();

    let server_task = tokio::spawn(async move { server.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    server_token.cancel();
    services.shutdown().await;

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "API server exited with error"),
        Err(e) => tracing::error!(error = %e, "API server task panicked"),
    }

    tracing::info!("notifeed stopped");
    Ok(())
}
