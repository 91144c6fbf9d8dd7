//! Name service for locating a server.
//!
//! A server publishes the address its workers should connect to as
//! `<dir>/<name>.addr`. Workers poll for that file until it appears.

use std::path::{Path, PathBuf};
use std::time::Duration;

use satfarm_base::{Error, Result};
use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Published address of a named server.
#[derive(Debug, Clone)]
pub struct Rendezvous {
    dir: PathBuf,
    name: String,
}

impl Rendezvous {
    /// Creates a handle for `name` under `dir`.
    ///
    /// Names may contain ASCII letters, digits, `-`, `_` and `.` and must not
    /// start with a dot.
    pub fn new(dir: impl Into<PathBuf>, name: &str) -> Result<Self> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(Error::Config(format!("invalid server name {name:?}")));
        }
        Ok(Self {
            dir: dir.into(),
            name: name.to_string(),
        })
    }

    /// The server name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File holding the published address.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.addr", self.name))
    }

    /// Publishes `addr`, replacing any earlier publication atomically.
    pub async fn publish(&self, addr: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", self.name, std::process::id()));
        tokio::fs::write(&tmp, addr.as_bytes()).await?;
        tokio::fs::rename(&tmp, self.path()).await?;
        tracing::info!("Published {} as {}", addr, self.name);
        Ok(())
    }

    /// Removes the publication; a missing file is not an error.
    pub async fn unpublish(&self) -> Result<()> {
        match tokio::fs::remove_file(self.path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Waits up to `timeout` for the address to be published.
    pub async fn lookup(&self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let path = self.path();
        loop {
            if let Some(addr) = read_addr(&path).await? {
                return Ok(addr);
            }
            if Instant::now() >= deadline {
                return Err(Error::Disconnected(format!(
                    "no server published as {} within {:?}",
                    self.name, timeout
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

async fn read_addr(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => {
            let addr = text.trim();
            Ok((!addr.is_empty()).then(|| addr.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
