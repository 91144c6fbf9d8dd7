//! Event loop of the server process.
//!
//! One task owns the [`ServerState`], the manager link and every worker
//! outbox. Each worker connection gets a reader task that forwards what it
//! receives into a shared channel, so the loop only ever waits on that
//! channel and on the manager.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use satfarm_base::config::ServerConfig;
use satfarm_base::{Error, Result};
use satfarm_protocol::channel;
use satfarm_protocol::{
    Inbox, Link, ManagerToServer, Outbox, ServerToManager, ServerToWorker, WorkerToServer,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::roster::WorkerId;
use crate::state::{Outbound, Phase, ServerState};

/// What a worker reader task reports.
#[derive(Debug)]
enum WorkerEvent {
    Message(WorkerId, WorkerToServer),
    Closed(WorkerId),
    Fault(WorkerId, Error),
}

struct WorkerConnection {
    outbox: Outbox<ServerToWorker>,
    reader: JoinHandle<()>,
}

/// A running server.
pub struct Server {
    state: ServerState,
    listener: TcpListener,
    accept_timeout: Duration,
    to_manager: Outbox<ServerToManager>,
    from_manager: Inbox<ManagerToServer>,
    manager_open: bool,
    workers: BTreeMap<WorkerId, WorkerConnection>,
    events_tx: UnboundedSender<WorkerEvent>,
    events: UnboundedReceiver<WorkerEvent>,
}

impl Server {
    /// Creates a server that accepts workers on `listener` and answers to
    /// the manager on `manager`.
    pub fn new(
        config: &ServerConfig,
        listener: TcpListener,
        manager: Link<ManagerToServer, ServerToManager>,
    ) -> Self {
        let (to_manager, from_manager) = manager.into_parts();
        let (events_tx, events) = mpsc::unbounded_channel();
        Self {
            state: ServerState::new(config),
            listener,
            accept_timeout: config.accept_timeout(),
            to_manager,
            from_manager,
            manager_open: true,
            workers: BTreeMap::new(),
            events_tx,
            events,
        }
    }

    /// Address workers connect to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until every worker is gone and the statistics were sent.
    ///
    /// The manager is sent `DISCONNECT` on the way out, also when the loop
    /// failed.
    pub async fn run(mut self) -> Result<()> {
        let result = self.event_loop().await;
        if let Err(e) = &result {
            tracing::error!("Server loop failed: {}", e);
        }
        self.shutdown().await;
        result
    }

    async fn event_loop(&mut self) -> Result<()> {
        while self.state.phase() != Phase::Stopped {
            tokio::select! {
                Some(event) = self.events.recv() => self.on_worker_event(event)?,
                msg = self.from_manager.recv(), if self.manager_open => match msg {
                    Ok(Some(msg)) => self.on_manager_message(msg).await?,
                    Ok(None) => {
                        tracing::warn!("Manager closed the connection");
                        self.manager_open = false;
                        self.state.terminate();
                    }
                    Err(e) => return Err(e),
                },
            }
            self.flush().await;
        }
        tracing::info!("Server stopped");
        Ok(())
    }

    async fn on_manager_message(&mut self, msg: ManagerToServer) -> Result<()> {
        let outcome = match msg {
            ManagerToServer::AddWorkers { count } => match self.state.workers_to_accept(count) {
                Ok(n) => {
                    self.accept_workers(n).await;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            ManagerToServer::AddFile(file) => self.state.add_file(file).map(|_| ()),
            ManagerToServer::Terminate => {
                self.state.terminate();
                Ok(())
            }
        };
        match outcome {
            Err(Error::Rejected(reason)) => {
                tracing::warn!("Rejected manager request: {}", reason);
                Ok(())
            }
            other => other,
        }
    }

    fn on_worker_event(&mut self, event: WorkerEvent) -> Result<()> {
        match event {
            WorkerEvent::Message(id, msg) => self.state.handle_worker(id, msg),
            WorkerEvent::Closed(id) => self.state.worker_lost(id),
            WorkerEvent::Fault(id, e) => {
                tracing::error!("Dropping worker {}: {}", id, e);
                self.state.worker_lost(id)
            }
        }
    }

    /// Accepts up to `count` worker connections, each within the accept
    /// timeout.
    async fn accept_workers(&mut self, count: usize) {
        for joined in 0..count {
            let accepted = tokio::time::timeout(self.accept_timeout, self.listener.accept()).await;
            let (stream, peer) = match accepted {
                Ok(Ok(conn)) => conn,
                Ok(Err(e)) => {
                    tracing::warn!("Accepting a worker failed: {}", e);
                    continue;
                }
                Err(_) => {
                    tracing::warn!(
                        "Only {} of {} workers connected within {:?}",
                        joined,
                        count,
                        self.accept_timeout
                    );
                    return;
                }
            };
            let link = match channel::accept::<WorkerToServer, ServerToWorker>(stream).await {
                Ok(link) => link,
                Err(e) => {
                    tracing::warn!("Handshake with {} failed: {}", peer, e);
                    continue;
                }
            };

            let id = self.state.worker_joined();
            let (outbox, inbox) = link.into_parts();
            let reader = tokio::spawn(read_worker(id, inbox, self.events_tx.clone()));
            self.workers.insert(id, WorkerConnection { outbox, reader });
            tracing::info!("Worker {} connected from {}", id, peer);
            self.flush().await;
        }
    }

    /// Delivers the actions the state produced.
    ///
    /// A failed send to a worker is left to its reader task to report.
    async fn flush(&mut self) {
        for action in self.state.take_outbound() {
            match action {
                Outbound::Worker(id, msg) => {
                    if let Some(conn) = self.workers.get_mut(&id) {
                        if let Err(e) = conn.outbox.send(&msg).await {
                            tracing::warn!("Sending {:?} to worker {} failed: {}", msg, id, e);
                        }
                    }
                }
                Outbound::Manager(msg) => self.send_manager(&msg).await,
                Outbound::CloseWorker(id) => {
                    if let Some(mut conn) = self.workers.remove(&id) {
                        conn.reader.abort();
                        if let Err(e) = conn.outbox.close().await {
                            tracing::debug!("Closing worker {}: {}", id, e);
                        }
                    }
                }
            }
        }
    }

    async fn send_manager(&mut self, msg: &ServerToManager) {
        if !self.manager_open {
            tracing::debug!("Manager gone, dropping {:?}", msg);
            return;
        }
        if let Err(e) = self.to_manager.send(msg).await {
            tracing::error!("Lost the manager: {}", e);
            self.manager_open = false;
        }
    }

    async fn shutdown(&mut self) {
        self.send_manager(&ServerToManager::Disconnect).await;
        if let Err(e) = self.to_manager.close().await {
            tracing::debug!("Closing manager link: {}", e);
        }
        for (id, mut conn) in std::mem::take(&mut self.workers) {
            conn.reader.abort();
            if let Err(e) = conn.outbox.close().await {
                tracing::debug!("Closing worker {}: {}", id, e);
            }
        }
    }
}

async fn read_worker(
    id: WorkerId,
    mut inbox: Inbox<WorkerToServer>,
    events: UnboundedSender<WorkerEvent>,
) {
    loop {
        let (event, last) = match inbox.recv().await {
            Ok(Some(msg)) => (WorkerEvent::Message(id, msg), false),
            Ok(None) => (WorkerEvent::Closed(id), true),
            Err(e) => (WorkerEvent::Fault(id, e), true),
        };
        if events.send(event).is_err() || last {
            break;
        }
    }
}
