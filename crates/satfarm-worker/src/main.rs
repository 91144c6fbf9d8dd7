//! satfarm worker - runs solving trials for a server.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use satfarm_base::{logging, ClusterConfig};
use satfarm_protocol::channel;
use satfarm_protocol::{Rendezvous, ServerToWorker, WorkerToServer};
use satfarm_worker::{Coordinator, CoordinatorSettings, ProbSatEngine, WorkerSummary};

#[derive(Parser)]
#[command(name = "satfarm-worker")]
#[command(author, version, about = "Worker process of a satfarm run", long_about = None)]
struct Cli {
    /// Name the server published its address under
    #[arg(long)]
    name: String,

    /// Connect to this address instead of looking the name up
    #[arg(long)]
    server: Option<String>,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Solver threads (overrides the configuration)
    #[arg(long)]
    threads: Option<usize>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli).await {
        Ok(summary) => {
            tracing::info!(
                "Worker done: {} trials, {} solutions, {} discarded",
                summary.trials_completed,
                summary.solutions_found,
                summary.discarded
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Worker failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<WorkerSummary> {
    let mut config = ClusterConfig::load(cli.config.as_deref())?;
    if let Some(threads) = cli.threads {
        config.worker.threads = threads;
    }
    config.validate()?;

    let addr = match cli.server {
        Some(addr) => addr,
        None => Rendezvous::new(config.rendezvous_dir(), &cli.name)?
            .lookup(config.worker.lookup_timeout())
            .await
            .with_context(|| format!("locating server {}", cli.name))?,
    };
    let link = channel::connect::<ServerToWorker, WorkerToServer>(&addr)
        .await
        .with_context(|| format!("connecting to {addr}"))?;
    tracing::info!("Connected to {}", addr);

    let engine = Arc::new(ProbSatEngine::from_config(&config.worker));
    let coordinator = Coordinator::new(link, engine, CoordinatorSettings::from(&config.worker))?;
    Ok(coordinator.run().await?)
}
