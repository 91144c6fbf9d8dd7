//! satfarm daemon - schedules solving trials across workers.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use satfarm_base::{logging, ClusterConfig};
use satfarm_daemon::Server;
use satfarm_protocol::channel;
use satfarm_protocol::{ManagerToServer, Rendezvous, ServerToManager};
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "satfarm-daemon")]
#[command(author, version, about = "Server process of a satfarm run", long_about = None)]
struct Cli {
    /// Address of the manager that started this server
    #[arg(long)]
    manager: String,

    /// Name to publish the worker address under
    #[arg(long)]
    name: String,

    /// Address to accept workers on
    #[arg(long, default_value = "127.0.0.1:0")]
    bind: String,

    /// Host workers should use instead of the bound address
    #[arg(long)]
    advertise: Option<String>,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Server failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ClusterConfig::load(cli.config.as_deref())?;
    config.validate()?;

    let manager = channel::connect::<ManagerToServer, ServerToManager>(&cli.manager)
        .await
        .with_context(|| format!("connecting to manager at {}", cli.manager))?;
    let listener = TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;
    let local = listener.local_addr()?;
    let published = match &cli.advertise {
        Some(host) => format!("{}:{}", host, local.port()),
        None => local.to_string(),
    };

    let rendezvous = Rendezvous::new(config.rendezvous_dir(), &cli.name)?;
    rendezvous.publish(&published).await?;
    tracing::info!("Accepting workers on {}", local);

    let result = Server::new(&config.server, listener, manager).run().await;
    if let Err(e) = rendezvous.unpublish().await {
        tracing::warn!("Could not remove {}: {}", rendezvous.path().display(), e);
    }
    Ok(result?)
}
