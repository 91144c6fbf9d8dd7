//! satfarm - manager of a distributed probSAT run.
//!
//! Starts a server, then reads commands from stdin: add workers, add
//! formula files, wait for the server or exit. Reports go to stdout.

mod commands;
mod launch;
mod session;
mod summary;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use satfarm_base::{logging, ClusterConfig};
use satfarm_protocol::channel;
use satfarm_protocol::{ManagerToServer, ServerToManager};
use tokio::io::BufReader;
use tokio::net::TcpListener;

use crate::launch::{Inherited, ProcessLauncher};
use crate::session::{Session, SessionSettings};
use crate::summary::{duration_line, Report};

#[derive(Parser)]
#[command(name = "satfarm")]
#[command(author, version, about = "Distributed probSAT manager", long_about = None)]
struct Cli {
    /// Name of this run; workers find the server under it
    name: String,

    /// Also write reports (without the `c ` prefix) to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Configuration file, passed on to server and workers
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let started = Instant::now();
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli, started).await {
        Ok(()) => {
            println!("manager finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Manager failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, started: Instant) -> anyhow::Result<()> {
    let config = ClusterConfig::load(cli.config.as_deref())?;
    config.validate()?;
    let manager = &config.manager;

    let file = match &cli.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating output file {}", path.display()))?;
            Some(Box::new(BufWriter::new(file)) as Box<dyn std::io::Write + Send>)
        }
        None => None,
    };
    let report = Report::new(Box::new(std::io::stdout()), file);

    let inherited = Inherited {
        name: cli.name.clone(),
        config: cli.config.clone(),
        verbose: cli.verbose,
    };
    let server_binary = match &manager.server_binary {
        Some(path) => path.clone(),
        None => launch::sibling_binary("satfarm-daemon")?,
    };
    let worker_binary = match &manager.worker_binary {
        Some(path) => path.clone(),
        None => launch::sibling_binary("satfarm-worker")?,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    let server = launch::spawn_server(&server_binary, &addr, &inherited)?;

    let (stream, _) = tokio::time::timeout(manager.connect_timeout(), listener.accept())
        .await
        .context("server did not connect in time")??;
    let link = channel::accept::<ServerToManager, ManagerToServer>(stream)
        .await
        .context("handshake with server")?;
    tracing::info!("Server for {} connected", cli.name);

    let settings = SessionSettings {
        max_simultaneous_connections: manager.max_simultaneous_connections,
        shutdown_timeout: manager.shutdown_timeout(),
    };
    let launcher = ProcessLauncher::new(worker_binary, inherited);
    let mut session = Session::new(link, launcher, settings, report);

    let running = Instant::now();
    let outcome = session.run(BufReader::new(tokio::io::stdin())).await;
    let running = running.elapsed();

    if !session.solution_found() {
        tracing::info!("Run ended without a solution");
    }
    let summary = session.summary().clone();
    let (launcher, mut report) = session.into_parts();
    report.block(&summary.lines(&cli.name))?;
    report.line(&duration_line("running duration", running))?;

    launcher.reap_all(manager.shutdown_timeout()).await;
    launch::reap(server, "server", manager.shutdown_timeout()).await;

    let overall = started.elapsed();
    report.line(&duration_line("manager overhead", overall.saturating_sub(running)))?;
    report.line(&duration_line("overall duration", overall))?;
    report.flush()?;
    Ok(outcome?)
}
