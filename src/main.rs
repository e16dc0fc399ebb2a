use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use range_download::config::Config;
use range_download::logging;
use range_download::server::{self, AppState};

/// Serves a local or proxied remote file with HTTP range support.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long, env = "RANGE_DOWNLOAD_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(short, long, env = "RANGE_DOWNLOAD_BIND")]
    bind: Option<SocketAddr>,

    /// Local file served when no `url` query parameter is given.
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Create a filler file of this many bytes if the local file is missing.
    #[arg(long, value_name = "BYTES")]
    fill_missing: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(file) = self.file {
            config.file = file;
        }
        if let Some(size) = self.fill_missing {
            config.fill_missing_bytes = Some(size);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let config = Args::parse().into_config()?;
    let bind = config.bind;
    tracing::debug!(?config, "configuration loaded");

    let state = AppState::new(config).context("failed to build upstream HTTP client")?;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
