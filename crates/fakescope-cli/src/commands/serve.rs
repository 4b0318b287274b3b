//! Serve command - run the HTTP prediction service.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use fakescope_adapters::HttpImageFetcher;
use fakescope_core::{ArtifactUploader, ImageFetcher};
use tracing::{info, warn};

use super::engine::{defaults, EngineArgs};
use crate::api::{router, AppState};
use crate::config::AppConfig;

/// Arguments for the serve command.
#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Listen address [default: 127.0.0.1:8000]
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<SocketAddr>,

    /// Relocate heatmaps to the configured storage endpoint
    #[arg(long)]
    pub upload: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

impl ServeArgs {
    /// CLI address, then `server.bind`, then the default.
    fn bind(&self, config: &AppConfig) -> Result<SocketAddr> {
        match self.bind {
            Some(addr) => Ok(addr),
            None => {
                let bind = config.server.bind.as_deref().unwrap_or(defaults::BIND);
                bind.parse()
                    .with_context(|| format!("Invalid listen address '{bind}'"))
            }
        }
    }
}

/// Run the serve command until interrupted.
///
/// # Errors
///
/// Returns an error if the engine cannot be built, storage is requested but
/// not configured, or the address cannot be bound.
pub fn run(args: &ServeArgs, config: &AppConfig) -> Result<()> {
    let bind = args.bind(config)?;
    let settings = args.engine.resolve(config)?;

    let uploader: Option<Arc<dyn ArtifactUploader>> = if args.upload {
        Some(Arc::new(settings.uploader(config)?))
    } else {
        None
    };
    let fetcher: Arc<dyn ImageFetcher> = Arc::new(HttpImageFetcher::new(settings.timeout)?);
    let engine = Arc::new(settings.build()?);

    // The blocking HTTP clients must be dropped outside the async runtime, so
    // this handle outlives `runtime`.
    let state = AppState {
        engine,
        fetcher,
        uploader,
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(serve(state.clone(), bind))
}

async fn serve(state: AppState, bind: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    let local = listener.local_addr().unwrap_or(bind);
    info!("Listening on http://{local}");
    eprintln!("fakescope listening on http://{local}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
