//! The manager's command loop.
//!
//! Commands come from an input stream; between commands the session also
//! reacts to what the server sends on its own. A solution queues
//! `wait_for_server`, a server disconnect or the end of input queues `exit`.

use std::collections::VecDeque;
use std::time::Duration;

use satfarm_base::{Error, Result};
use satfarm_protocol::{Inbox, Link, ManagerToServer, Outbox, ServerToManager, TaskFile};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::commands::{self, Command, HELP};
use crate::launch::Launcher;
use crate::summary::{file_lines, solution_lines, Report, RunSummary};

/// Tunables of a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Workers announced per `ADD_WORKERS`.
    pub max_simultaneous_connections: u32,
    /// How long `exit` waits for the server to disconnect.
    pub shutdown_timeout: Duration,
}

/// A manager connected to its server.
pub struct Session<L> {
    outbox: Outbox<ManagerToServer>,
    inbox: Inbox<ServerToManager>,
    launcher: L,
    settings: SessionSettings,
    report: Report,
    summary: RunSummary,
    pending: VecDeque<Command>,
    running: bool,
    solution_found: bool,
    server_gone: bool,
}

impl<L: Launcher> Session<L> {
    pub fn new(
        link: Link<ServerToManager, ManagerToServer>,
        launcher: L,
        settings: SessionSettings,
        report: Report,
    ) -> Self {
        let (outbox, inbox) = link.into_parts();
        Self {
            outbox,
            inbox,
            launcher,
            settings,
            report,
            summary: RunSummary::default(),
            pending: VecDeque::new(),
            running: true,
            solution_found: false,
            server_gone: false,
        }
    }

    #[must_use]
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    #[must_use]
    pub fn solution_found(&self) -> bool {
        self.solution_found
    }

    /// Gives back the launcher and the report.
    pub fn into_parts(self) -> (L, Report) {
        (self.launcher, self.report)
    }

    /// Processes commands until one of them ends the session.
    ///
    /// A failing command is reported and the loop goes on. Only a broken
    /// server connection ends the loop with an error.
    pub async fn run<R>(&mut self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut input_open = true;

        while self.running {
            if let Some(command) = self.pending.pop_front() {
                self.dispatch(command).await?;
                continue;
            }
            tokio::select! {
                line = lines.next_line(), if input_open => match line {
                    Ok(Some(line)) => match commands::parse(&line) {
                        Ok(Some(command)) => self.dispatch(command).await?,
                        Ok(None) => {}
                        Err(e) => tracing::error!("{}", e),
                    },
                    Ok(None) => {
                        input_open = false;
                        self.pending.push_back(Command::Exit);
                    }
                    Err(e) => {
                        tracing::error!("Reading commands failed: {}", e);
                        input_open = false;
                        self.pending.push_back(Command::Exit);
                    }
                },
                msg = self.inbox.recv(), if !self.server_gone => {
                    match msg? {
                        Some(ServerToManager::FoundSolution(solution)) => {
                            self.record(ServerToManager::FoundSolution(solution))?;
                            self.pending.push_front(Command::WaitForServer);
                        }
                        Some(ServerToManager::Disconnect) | None => {
                            self.server_gone = true;
                            self.pending.push_front(Command::Exit);
                        }
                        Some(other) => self.record(other)?,
                    }
                }
                else => self.running = false,
            }
        }
        self.report.flush()
    }

    /// Runs one command; only connection loss is returned as an error.
    async fn dispatch(&mut self, command: Command) -> Result<()> {
        tracing::info!("Executing command {}", command);
        let name = command.name();
        match self.execute(command).await {
            Ok(()) => Ok(()),
            Err(e @ (Error::Protocol { .. } | Error::Transport(_))) => Err(e),
            Err(e) => {
                tracing::error!("Error executing command '{}': {}", name, e);
                Ok(())
            }
        }
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Help => println!("{HELP}"),
            Command::AddWorkers { count, worker_args } => {
                self.add_workers(count, &worker_args).await?;
            }
            Command::AddFile {
                start_configs,
                max_flips,
                path,
            } => {
                if self.solution_found {
                    tracing::info!("Solution already found, not adding {}", path.display());
                    return Ok(());
                }
                let filename = match tokio::fs::canonicalize(&path).await {
                    Ok(full) => full.display().to_string(),
                    Err(e) => {
                        tracing::warn!("Cannot resolve {}: {}; sending as given", path.display(), e);
                        path.display().to_string()
                    }
                };
                self.send(&ManagerToServer::AddFile(TaskFile {
                    start_configs,
                    max_flips,
                    filename,
                }))
                .await?;
            }
            Command::WaitForServer => {
                self.collect_until_disconnect().await?;
                self.running = false;
            }
            Command::Exit => {
                self.exit().await;
                self.running = false;
            }
        }
        Ok(())
    }

    async fn add_workers(&mut self, count: u32, worker_args: &[String]) -> Result<()> {
        if self.solution_found {
            tracing::info!("Solution already found, not adding workers");
            return Ok(());
        }
        let mut left = count;
        while left > 0 {
            let chunk = left.min(self.settings.max_simultaneous_connections);
            let announced = i32::try_from(chunk)
                .map_err(|_| Error::Rejected(format!("cannot announce {chunk} workers at once")))?;
            self.send(&ManagerToServer::AddWorkers { count: announced })
                .await?;
            self.launcher.launch_workers(chunk, worker_args)?;
            left -= chunk;
        }
        Ok(())
    }

    async fn send(&mut self, msg: &ManagerToServer) -> Result<()> {
        if self.server_gone {
            return Err(Error::Disconnected("the server has already left".into()));
        }
        self.outbox.send(msg).await
    }

    /// Receives until the server disconnects, recording what arrives.
    async fn collect_until_disconnect(&mut self) -> Result<()> {
        while !self.server_gone {
            match self.inbox.recv().await? {
                Some(ServerToManager::Disconnect) | None => self.server_gone = true,
                Some(msg) => self.record(msg)?,
            }
        }
        Ok(())
    }

    /// Terminates the run and collects the final statistics, within the
    /// shutdown timeout.
    async fn exit(&mut self) {
        if self.server_gone {
            return;
        }
        if let Err(e) = self.outbox.send(&ManagerToServer::Terminate).await {
            tracing::warn!("Could not send terminate: {}", e);
        }
        let timeout = self.settings.shutdown_timeout;
        match tokio::time::timeout(timeout, self.collect_until_disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Server connection ended badly: {}", e),
            Err(_) => tracing::warn!("Server did not disconnect within {:?}", timeout),
        }
        if let Err(e) = self.outbox.close().await {
            tracing::debug!("Closing server link: {}", e);
        }
    }

    fn record(&mut self, msg: ServerToManager) -> Result<()> {
        match msg {
            ServerToManager::FoundSolution(solution) => {
                self.solution_found = true;
                self.summary.add_solution(&solution);
                self.report.block(&solution_lines(&solution))
            }
            ServerToManager::SendStatistics { file, statistics } => {
                self.summary.add_statistics(&statistics);
                self.report.block(&file_lines(&file, &statistics))
            }
            ServerToManager::Disconnect => {
                self.server_gone = true;
                Ok(())
            }
        }
    }
}
