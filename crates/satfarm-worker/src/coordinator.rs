//! Conversation with the server.
//!
//! The coordinator waits for `ACTIVATE`, then loops: return finished trials,
//! look for a server command, request instances while threads are short of
//! work, and otherwise sleep until a trial finishes, a command arrives or the
//! poll interval passes. `TERMINATE` ends the loop; unstarted jobs are
//! dropped, running trials finish and are reported, then the worker sends
//! `DISCONNECT` and waits for the server to close the connection.

use std::sync::Arc;
use std::time::Duration;

use satfarm_base::config::WorkerConfig;
use satfarm_base::{Error, Result};
use satfarm_protocol::{Inbox, JobBatch, Link, Message, Outbox, ServerToWorker, WorkerToServer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::Instant;

use crate::engine::Engine;
use crate::job::{Completed, Job};
use crate::pool::SolverPool;
use crate::problem::ProblemCache;

/// Tunables of the coordinator loop.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Solver threads, and so the number of jobs kept assigned.
    pub threads: usize,
    /// Flip budget for files that leave it to the worker.
    pub default_max_flips: u64,
    /// Idle wait and back-off after an empty grant.
    pub poll_interval: Duration,
}

impl From<&WorkerConfig> for CoordinatorSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            threads: config.threads,
            default_max_flips: config.default_max_flips,
            poll_interval: config.poll_interval(),
        }
    }
}

/// Counters reported when the worker exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Trials returned with `DONE_PROCESSING`.
    pub trials_completed: u64,
    /// Solutions returned with `FOUND_SOLUTION`.
    pub solutions_found: u64,
    /// Granted trials dropped unstarted on termination.
    pub discarded: u64,
    /// `GET_INSTANCES` requests sent.
    pub requests: u64,
}

/// Drives one worker process.
pub struct Coordinator<S = TcpStream> {
    outbox: Outbox<WorkerToServer, S>,
    inbox: Inbox<ServerToWorker, S>,
    pool: Option<SolverPool>,
    results: UnboundedReceiver<Result<Completed>>,
    problems: ProblemCache,
    settings: CoordinatorSettings,
    /// Jobs pending or executing.
    assigned: usize,
    terminating: bool,
    backoff_until: Option<Instant>,
    summary: WorkerSummary,
}

impl<S> Coordinator<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Starts the solver threads.
    pub fn new(
        link: Link<ServerToWorker, WorkerToServer, S>,
        engine: Arc<dyn Engine>,
        settings: CoordinatorSettings,
    ) -> Result<Self> {
        if settings.threads == 0 {
            return Err(Error::Config("a worker needs at least one thread".into()));
        }
        let (tx, results) = mpsc::unbounded_channel();
        let pool = SolverPool::new(settings.threads, engine, tx)?;
        let (outbox, inbox) = link.into_parts();
        Ok(Self {
            outbox,
            inbox,
            pool: Some(pool),
            results,
            problems: ProblemCache::new(),
            settings,
            assigned: 0,
            terminating: false,
            backoff_until: None,
            summary: WorkerSummary::default(),
        })
    }

    /// Runs until the server terminates the worker.
    ///
    /// On error the worker still tries to disconnect cleanly.
    pub async fn run(mut self) -> Result<WorkerSummary> {
        if let Err(e) = self.serve().await {
            self.abort().await;
            return Err(e);
        }
        self.finish().await
    }

    async fn serve(&mut self) -> Result<()> {
        if !self.await_activation().await? {
            tracing::info!("Terminated before activation");
            return Ok(());
        }
        tracing::info!("Activated with {} solver threads", self.settings.threads);

        while !self.terminating {
            let mut progressed = self.return_results().await?;

            if let Some(msg) = self.inbox.try_recv() {
                let msg = msg?.ok_or_else(server_gone)?;
                self.handle(msg)?;
                progressed = true;
            }
            if self.terminating {
                break;
            }

            if self.shortfall() > 0 && !self.backing_off() {
                self.request_instances().await?;
                progressed = true;
            }

            if !progressed {
                self.idle().await?;
            }
        }
        Ok(())
    }

    /// Returns whether the worker was activated rather than terminated.
    async fn await_activation(&mut self) -> Result<bool> {
        loop {
            match self.inbox.recv().await?.ok_or_else(server_gone)? {
                ServerToWorker::Activate => return Ok(true),
                ServerToWorker::Terminate => {
                    self.terminating = true;
                    return Ok(false);
                }
                ServerToWorker::SendInstances(batches) => {
                    tracing::warn!("Grant of {} batches before activation", batches.len());
                    self.accept(batches)?;
                }
            }
        }
    }

    fn handle(&mut self, msg: ServerToWorker) -> Result<()> {
        match msg {
            ServerToWorker::Activate => tracing::debug!("Already active"),
            ServerToWorker::SendInstances(batches) => {
                tracing::warn!("Unsolicited grant of {} batches", batches.len());
                self.accept(batches)?;
            }
            ServerToWorker::Terminate => {
                tracing::info!("Terminate received with {} jobs assigned", self.assigned);
                self.terminating = true;
            }
        }
        Ok(())
    }

    fn shortfall(&self) -> usize {
        self.settings.threads.saturating_sub(self.assigned)
    }

    fn backing_off(&self) -> bool {
        self.backoff_until
            .is_some_and(|until| Instant::now() < until)
    }

    /// Asks for the shortfall and waits for the grant, handling other
    /// commands that arrive first.
    async fn request_instances(&mut self) -> Result<()> {
        let requested = self.shortfall() as u32;
        self.outbox
            .send(&WorkerToServer::GetInstances { requested })
            .await?;
        self.summary.requests += 1;

        loop {
            match self.inbox.recv().await?.ok_or_else(server_gone)? {
                ServerToWorker::SendInstances(batches) => {
                    let granted = self.accept(batches)?;
                    tracing::debug!("Requested {}, granted {}", requested, granted);
                    self.backoff_until =
                        (granted == 0).then(|| Instant::now() + self.settings.poll_interval);
                    return Ok(());
                }
                other => self.handle(other)?,
            }
        }
    }

    /// Queues granted trials and returns how many were queued.
    fn accept(&mut self, batches: Vec<JobBatch>) -> Result<usize> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| Error::Internal("solver pool already stopped".into()))?;
        let mut granted = 0;
        for batch in batches {
            if self.terminating {
                tracing::debug!("Ignoring {} instances granted during termination", batch.instances);
                self.summary.discarded += u64::from(batch.instances);
                continue;
            }
            let problem = self.problems.get(&batch.file.filename);
            let flip_budget = match batch.file.max_flips {
                0 => self.settings.default_max_flips,
                n => u64::from(n),
            };
            for _ in 0..batch.instances {
                pool.submit(Job {
                    task_id: batch.task_id,
                    problem: problem.clone(),
                    flip_budget,
                })?;
            }
            granted += batch.instances as usize;
        }
        self.assigned += granted;
        Ok(granted)
    }

    /// Sends every result that is ready; returns whether there were any.
    async fn return_results(&mut self) -> Result<bool> {
        let mut any = false;
        while let Ok(done) = self.results.try_recv() {
            self.return_one(done).await?;
            any = true;
        }
        Ok(any)
    }

    async fn return_one(&mut self, done: Result<Completed>) -> Result<()> {
        let completed = done?;
        self.assigned = self.assigned.saturating_sub(1);
        if let Some(solution) = completed.solution {
            tracing::info!(
                "Solved {} after {} flips (seed {})",
                solution.filename,
                solution.flips,
                solution.seed
            );
            self.outbox
                .send(&WorkerToServer::FoundSolution(solution))
                .await?;
            self.summary.solutions_found += 1;
        }
        self.outbox
            .send(&WorkerToServer::DoneProcessing(completed.record))
            .await?;
        self.summary.trials_completed += 1;
        Ok(())
    }

    async fn idle(&mut self) -> Result<()> {
        tokio::select! {
            done = self.results.recv() => {
                if let Some(done) = done {
                    self.return_one(done).await?;
                }
            }
            msg = self.inbox.recv() => {
                let msg = msg?.ok_or_else(server_gone)?;
                self.handle(msg)?;
            }
            _ = tokio::time::sleep(self.settings.poll_interval) => {}
        }
        Ok(())
    }

    /// Stops the pool, dropping jobs nobody started, and waits for running
    /// trials.
    async fn stop_pool(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            let discarded = pool.discard_pending();
            self.assigned = self.assigned.saturating_sub(discarded);
            self.summary.discarded += discarded as u64;
            if discarded > 0 {
                tracing::info!("Discarded {} unstarted jobs", discarded);
            }
            tokio::task::spawn_blocking(move || pool.shutdown())
                .await
                .map_err(|e| Error::Internal(format!("solver pool shutdown failed: {e}")))?;
        }
        Ok(())
    }

    async fn finish(mut self) -> Result<WorkerSummary> {
        self.stop_pool().await?;
        self.return_results().await?;
        self.outbox.send(&WorkerToServer::Disconnect).await?;

        // the server closes the connection once it has released this worker
        loop {
            match self.inbox.recv().await {
                Ok(None) => break,
                Ok(Some(msg)) => tracing::debug!("Ignoring {} after disconnect", msg.kind()),
                Err(e) => {
                    tracing::warn!("Connection ended uncleanly: {}", e);
                    break;
                }
            }
        }
        tracing::info!(
            "Disconnected after {} trials ({} solved)",
            self.summary.trials_completed,
            self.summary.solutions_found
        );
        Ok(self.summary)
    }

    async fn abort(&mut self) {
        if let Err(e) = self.stop_pool().await {
            tracing::warn!("{}", e);
        }
        if let Err(e) = self.outbox.send(&WorkerToServer::Disconnect).await {
            tracing::debug!("Could not send disconnect: {}", e);
        }
        let _ = self.outbox.close().await;
    }
}

fn server_gone() -> Error {
    Error::Disconnected("server closed the connection".into())
}
