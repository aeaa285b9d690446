//! IronLink gateway binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ironlink::Config;
use ironlink::gateway::{self, AppState, Gateway};

#[derive(Debug, Parser)]
#[command(name = "ironlink", version, about = "Pairing and permission gateway for a local coding agent")]
struct Cli {
    /// Address to bind the gateway to.
    #[arg(long, env = "IRONLINK_BIND")]
    bind: Option<SocketAddr>,

    /// Registry persistence path. Pass an empty value to keep state in
    /// memory only.
    #[arg(long, env = "IRONLINK_STATE_PATH")]
    state_path: Option<PathBuf>,

    /// Disable bearer authentication (local development only).
    #[arg(long)]
    no_auth: bool,

    /// Gate pairing exchanges on operator approval.
    #[arg(long)]
    require_approval: bool,

    /// Seconds to wait for a remote permission decision.
    #[arg(long)]
    permission_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ironlink=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("load configuration")?;

    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(path) = cli.state_path {
        config.state_path = if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        };
    }
    if cli.no_auth {
        config.auth_required = false;
        tracing::warn!("bearer authentication disabled");
    }
    if cli.require_approval {
        config.require_approval = true;
    }
    if let Some(secs) = cli.permission_timeout_secs {
        config.permission_timeout = std::time::Duration::from_secs(secs);
    }

    let state = AppState::from_config(&config);
    let mut gateway = Gateway::new(config.bind_addr, gateway::router(state));
    gateway.start().await.context("start gateway")?;

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    tracing::info!("shutdown requested");
    gateway.shutdown().await;

    Ok(())
}
