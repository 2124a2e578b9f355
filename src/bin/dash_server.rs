use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use neubot_dash::error::DashError;
use neubot_dash::server::{self, DashHandler, ServerConfig};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
struct Cli {
    /// Directory where to save results
    #[arg(long, default_value = ".")]
    datadir: PathBuf,
    /// Address to listen on; may be repeated
    #[arg(long = "listen", default_value = "0.0.0.0:80")]
    listen: Vec<SocketAddr>,
    /// Verbose debug output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();

    let handler = Arc::new(DashHandler::new(ServerConfig {
        datadir: cli.datadir,
        ..Default::default()
    }));
    let cancel = CancellationToken::new();
    let reaper = handler.start_reaper(cancel.clone());

    let mut servers = JoinSet::new();
    for addr in cli.listen {
        let listener = TcpListener::bind(addr).await?;
        servers.spawn(server::serve(listener, Arc::clone(&handler), cancel.clone()));
    }

    let outcome: Result<(), DashError> = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            res.map_err(DashError::from)
        }
        Some(res) = servers.join_next() => res.map_err(DashError::from).and_then(|r| r),
    };

    cancel.cancel();
    while let Some(res) = servers.join_next().await {
        res??;
    }
    reaper.join().await?;
    outcome?;
    Ok(())
}
