//! Starting the server and worker processes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use satfarm_base::{Error, Result};
use tokio::process::{Child, Command};

/// Starts worker processes for a session.
pub trait Launcher {
    /// Starts `count` workers; each connects to the server on its own.
    fn launch_workers(&mut self, count: u32, args: &[String]) -> Result<()>;
}

/// Options every spawned process inherits from the manager.
#[derive(Debug, Clone)]
pub struct Inherited {
    /// Server name.
    pub name: String,
    pub config: Option<PathBuf>,
    pub verbose: u8,
}

impl Inherited {
    fn apply(&self, command: &mut Command) {
        command.arg("--name").arg(&self.name);
        if let Some(config) = &self.config {
            command.arg("--config").arg(config);
        }
        if self.verbose > 0 {
            command.arg(format!("-{}", "v".repeat(usize::from(self.verbose))));
        }
        command.stdin(Stdio::null()).kill_on_drop(true);
    }
}

/// Path of a sibling executable of the running manager.
pub fn sibling_binary(name: &str) -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    Ok(exe.with_file_name(format!("{name}{}", std::env::consts::EXE_SUFFIX)))
}

/// Starts the server, telling it where the manager listens.
pub fn spawn_server(binary: &Path, manager_addr: &str, inherited: &Inherited) -> Result<Child> {
    let mut command = Command::new(binary);
    command.arg("--manager").arg(manager_addr);
    inherited.apply(&mut command);
    tracing::info!("Executing {}", binary.display());
    command
        .spawn()
        .map_err(|e| Error::Config(format!("cannot start {}: {e}", binary.display())))
}

/// Waits for a child to exit, killing it after `timeout`.
pub async fn reap(mut child: Child, what: &str, timeout: Duration) {
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => tracing::debug!("{} exited", what),
        Ok(Ok(status)) => tracing::warn!("{} exited with {}", what, status),
        Ok(Err(e)) => tracing::warn!("Waiting for {} failed: {}", what, e),
        Err(_) => {
            tracing::warn!("{} still running after {:?}, killing it", what, timeout);
            if let Err(e) = child.kill().await {
                tracing::warn!("Killing {} failed: {}", what, e);
            }
        }
    }
}

/// Spawns worker processes and keeps their handles.
pub struct ProcessLauncher {
    binary: PathBuf,
    inherited: Inherited,
    children: Vec<Child>,
}

impl ProcessLauncher {
    pub fn new(binary: PathBuf, inherited: Inherited) -> Self {
        Self {
            binary,
            inherited,
            children: Vec::new(),
        }
    }

    /// Waits for every worker, sharing one deadline.
    pub async fn reap_all(self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        for (i, child) in self.children.into_iter().enumerate() {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            reap(child, &format!("worker {i}"), left).await;
        }
    }
}

impl Launcher for ProcessLauncher {
    fn launch_workers(&mut self, count: u32, args: &[String]) -> Result<()> {
        for _ in 0..count {
            let mut command = Command::new(&self.binary);
            self.inherited.apply(&mut command);
            command.args(args);
            let child = command.spawn().map_err(|e| {
                Error::Config(format!("cannot start {}: {e}", self.binary.display()))
            })?;
            self.children.push(child);
        }
        tracing::info!("Started {} workers ({} total)", count, self.children.len());
        Ok(())
    }
}
