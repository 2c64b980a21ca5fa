//! Opsrelay Agent Binary
//!
//! Reads the configuration embedded in its own executable, resolves the
//! controller endpoint, connects, and serves relayed commands until
//! interrupted.

use anyhow::{Context, Result};
use opsrelay_agent::agent::AgentConn;
use opsrelay_agent::config::AgentConfig;
use opsrelay_agent::exec::ShellRunner;
use opsrelay_proto::Credentials;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("starting opsrelay agent {}", env!("CARGO_PKG_VERSION"));

    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let contents = tokio::fs::read(&exe)
        .await
        .with_context(|| format!("cannot read {}", exe.display()))?;
    let config =
        AgentConfig::extract(&contents).context("no valid embedded configuration found")?;

    let endpoint = config.resolve_endpoint().await?;
    info!(identity = %config.identity, %endpoint, "configuration resolved");

    let credentials = Credentials::new(&config.identity[..], &config.credential[..])
        .context("embedded credentials are malformed")?;
    let conn = AgentConn::connect(endpoint, &credentials, Arc::new(ShellRunner)).await?;

    let shutdown = conn.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            shutdown.cancel();
        }
    });

    conn.run().await?;
    info!("agent stopped");
    Ok(())
}
