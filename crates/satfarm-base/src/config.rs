//! Cluster configuration.
//!
//! One TOML file configures all three process roles. Every field has a
//! default, so an empty file (or no file at all) is a valid configuration.
//!
//! ```toml
//! [server]
//! zero_quota_policy = "retry_forever"
//! terminate_on_solution = true
//!
//! [worker]
//! threads = 4
//!
//! [manager]
//! max_simultaneous_connections = 2
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "SATFARM_CONFIG";

/// What the scheduler does with a file that asked for zero start
/// configurations (unbounded) once its first batch was handed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroQuotaPolicy {
    /// Dispatch one request worth of instances, then retire the file.
    #[default]
    TryOnce,
    /// Requeue the file after every completion until a solution is found.
    RetryForever,
}

/// Break-probability function used by the local search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbabilityKind {
    /// `(eps + breaks)^-cb`
    #[default]
    Polynomial,
    /// `cb^-breaks`
    Exponential,
}

/// How solving threads share cached probability values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Every evaluation computes the value.
    Off,
    /// Threads block on the shared cache.
    Blocking,
    /// Threads use the cache only when the lock is free.
    #[default]
    TryLock,
}

/// Server scheduling and shutdown policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Handling of files with an unbounded start quota.
    pub zero_quota_policy: ZeroQuotaPolicy,
    /// Tell all workers to stop as soon as one solution arrives.
    pub terminate_on_solution: bool,
    /// Keep running when the queue runs dry instead of draining.
    pub wait_for_more_files: bool,
    /// Report only files that had at least one instance started.
    pub short_statistics: bool,
    /// How long to wait for each announced worker to connect, in seconds.
    pub accept_timeout_secs: u64,
    /// Directory holding published server addresses.
    pub rendezvous_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            zero_quota_policy: ZeroQuotaPolicy::default(),
            terminate_on_solution: true,
            wait_for_more_files: false,
            short_statistics: true,
            accept_timeout_secs: 30,
            rendezvous_dir: None,
        }
    }
}

impl ServerConfig {
    /// Accept timeout as a [`Duration`].
    #[must_use]
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.accept_timeout_secs)
    }
}

/// Worker process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of solving threads per worker process.
    pub threads: usize,
    /// Flip budget used when a file does not specify one.
    pub default_max_flips: u64,
    /// Back-off after an empty grant and idle wait, in milliseconds.
    pub poll_interval_ms: u64,
    /// How long to wait for the server's address to be published, in seconds.
    pub lookup_timeout_secs: u64,
    /// Break-probability function.
    pub probability: ProbabilityKind,
    /// Exponent base (`cb`) of the probability function.
    pub cb: f64,
    /// Offset (`eps`) of the polynomial probability function.
    pub eps: f64,
    /// Probability cache sharing policy.
    pub cache: CachePolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 2,
            default_max_flips: 20_000_000,
            poll_interval_ms: 10,
            lookup_timeout_secs: 30,
            probability: ProbabilityKind::default(),
            cb: 2.06,
            eps: 0.9,
            cache: CachePolicy::default(),
        }
    }
}

impl WorkerConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Lookup timeout as a [`Duration`].
    #[must_use]
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }
}

/// Manager process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Workers announced to the server per `ADD_WORKERS` request.
    pub max_simultaneous_connections: u32,
    /// Server executable; defaults to `satfarm-daemon` next to the manager.
    pub server_binary: Option<PathBuf>,
    /// Worker executable; defaults to `satfarm-worker` next to the manager.
    pub worker_binary: Option<PathBuf>,
    /// How long to wait for the server to accept the manager, in seconds.
    pub connect_timeout_secs: u64,
    /// How long `exit` waits for the server's final statistics, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_simultaneous_connections: 1,
            server_binary: None,
            worker_binary: None,
            connect_timeout_secs: 30,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ManagerConfig {
    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Shutdown timeout as a [`Duration`].
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Configuration shared by manager, server and workers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Server section.
    pub server: ServerConfig,
    /// Worker section.
    pub worker: WorkerConfig,
    /// Manager section.
    pub manager: ManagerConfig,
}

impl ClusterConfig {
    /// Parses configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `path`, or from [`CONFIG_ENV`] when no path
    /// is given, or falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                tracing::debug!("Loaded configuration from {}", path.display());
                Self::from_toml(&text)
            }
            None => Ok(Self::default()),
        }
    }

    /// Checks values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.worker.threads == 0 {
            return Err(Error::Config("worker.threads must be at least 1".into()));
        }
        if self.manager.max_simultaneous_connections == 0 {
            return Err(Error::Config(
                "manager.max_simultaneous_connections must be at least 1".into(),
            ));
        }
        if !(self.worker.cb > 0.0) || !(self.worker.eps >= 0.0) {
            return Err(Error::Config(
                "worker.cb must be positive and worker.eps non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Directory holding published server addresses.
    #[must_use]
    pub fn rendezvous_dir(&self) -> PathBuf {
        self.server
            .rendezvous_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("satfarm"))
    }
}
