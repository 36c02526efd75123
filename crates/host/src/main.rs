//! storysdk host process.
//!
//! Builds the single cache service at start-up and speaks the bridge
//! protocol as newline-delimited JSON on stdio. Logging goes to stderr so
//! stdout carries only protocol lines.

use std::sync::Arc;

use anyhow::{Context, Result};
use storysdk_core::{SdkConfig, SqliteStore};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

mod error;
mod handler;
mod output;

#[tokio::main]
async fn main() -> Result<()> {
    let config = SdkConfig::load().context("loading configuration")?;

    let default_level = if config.debug { LevelFilter::DEBUG } else { LevelFilter::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    tracing::info!(db_path = %config.db_path.display(), "starting storysdk host on stdio");

    let store = SqliteStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let host = handler::Host::new(&config, Arc::new(store), tokio::io::stdout());

    host.run(BufReader::new(tokio::io::stdin())).await;
    tracing::info!("stdin closed; host exiting");
    Ok(())
}
