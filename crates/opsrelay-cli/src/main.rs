//! Opsrelay CLI
//!
//! Runs the controller, or embeds connection parameters into an agent
//! binary.

use anyhow::Result;
use clap::{Parser, Subcommand};
use opsrelay::{Controller, ControllerConfig, DenyStore, EmptyDenyList, FileDenyList, LogSink};
use opsrelay_agent::config::{AgentConfig, EndpointMode};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

mod patch;

#[derive(Parser)]
#[command(name = "opsrelay", version, about = "Remote-command relay")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller
    Server {
        /// Address to listen on
        #[arg(long)]
        bind: SocketAddr,
        /// Password agents must present
        #[arg(long)]
        password: String,
        /// Pipe-delimited file of denied peer addresses
        #[arg(long)]
        ip_denylist: Option<PathBuf>,
        /// Pipe-delimited file of denied agent identities
        #[arg(long)]
        identity_denylist: Option<PathBuf>,
    },
    /// Embed connection parameters into an agent binary
    Patch {
        /// Agent binary to patch
        file: PathBuf,
        /// Identity the agent will present
        #[arg(long)]
        identity: String,
        /// Credential the agent will present
        #[arg(long)]
        credential: String,
        #[command(subcommand)]
        endpoint: EndpointArg,
    },
}

#[derive(Subcommand)]
enum EndpointArg {
    /// Fixed controller address
    Direct {
        /// Controller address as <ip>:<port>
        addr: SocketAddr,
    },
    /// URL serving "<ip>:<port>" as plain text, resolved at agent startup
    Fetch {
        /// URL to fetch
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("opsrelay {}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    match cli.command {
        Command::Server {
            bind,
            password,
            ip_denylist,
            identity_denylist,
        } => run_server(bind, password, ip_denylist, identity_denylist).await,
        Command::Patch {
            file,
            identity,
            credential,
            endpoint,
        } => {
            let endpoint = match endpoint {
                EndpointArg::Direct { addr } => EndpointMode::Direct(addr),
                EndpointArg::Fetch { url } => EndpointMode::Fetch(url),
            };
            let config = AgentConfig {
                identity,
                credential,
                endpoint,
            };
            patch::patch_binary(&file, &config).await?;
            info!("patched {}", file.display());
            Ok(())
        }
    }
}

async fn run_server(
    bind: SocketAddr,
    password: String,
    ip_denylist: Option<PathBuf>,
    identity_denylist: Option<PathBuf>,
) -> Result<()> {
    let controller = Controller::builder(ControllerConfig::new(bind, password))
        .with_address_denylist(deny_store(ip_denylist))
        .with_identity_denylist(deny_store(identity_denylist))
        .with_output(Arc::new(LogSink))
        .start()
        .await?;
    info!("server started on {}", controller.local_addr());

    tokio::signal::ctrl_c().await?;
    warn!("interrupt received, stopping");
    controller.shutdown().await;
    Ok(())
}

fn deny_store(path: Option<PathBuf>) -> Arc<dyn DenyStore> {
    match path {
        Some(path) => Arc::new(FileDenyList::new(path)),
        None => Arc::new(EmptyDenyList),
    }
}
