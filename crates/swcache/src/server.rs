use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use swcache_service::config::Config;
use swcache_service::lifecycle::Generation;
use swcache_service::metric;
use swcache_service::service::ServiceWorker;

use crate::endpoints::{self, AppState};

/// Installs the configured generation, unless the restored one already matches it.
///
/// Runs concurrently with the server: until the new generation is activated, requests are
/// answered by the restored one, or passed through to the network.
async fn install_configured(worker: Arc<ServiceWorker>, config: Config) {
    if let Some(active) = worker.active() {
        if *active.config() == config.worker {
            tracing::info!(generation = %active.id(), "Configured generation is already active");
            return;
        }
    }

    let generation = match Generation::from_config(config.worker) {
        Ok(generation) => generation,
        Err(error) => {
            tracing::error!(error = &error as &dyn std::error::Error, "Invalid generation");
            return;
        }
    };

    match worker.update(generation).await {
        Ok(Some(report)) => tracing::info!(generation = %report.generation, "Generation installed"),
        Ok(None) => tracing::info!("Generation installed, waiting for client views to close"),
        Err(error) => tracing::error!(
            error = &error as &dyn std::error::Error,
            "Failed to install generation"
        ),
    }
}

/// Starts the worker and the HTTP server based on loaded config.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("swcache-web")
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let worker =
            Arc::new(ServiceWorker::from_config(&config).context("failed to create the worker")?);
        match worker.restore().await {
            Ok(Some(generation)) => tracing::info!(%generation, "Restored active generation"),
            Ok(None) => tracing::info!("No active generation recorded"),
            Err(error) => tracing::warn!("Failed to restore the active generation: {error:#}"),
        }
        tokio::spawn(install_configured(worker.clone(), config.clone()));

        let socket = config.bind.parse::<SocketAddr>()?;
        let state = AppState::new(worker.clone(), config.worker.scope.clone());
        tracing::info!("Starting HTTP server on {}", socket);
        axum_server::bind(socket)
            .serve(endpoints::create_app(state).into_make_service())
            .await?;

        worker.settle().await;
        tracing::info!("System shutdown complete");
        Ok(())
    })
}
