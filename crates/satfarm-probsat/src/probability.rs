//! Break-count probability functions.

use satfarm_base::config::{ProbabilityKind, WorkerConfig};
use std::sync::Mutex;

/// Maps a break count to an unnormalized selection weight.
pub trait BreakProbability: Send + Sync {
    fn probability(&self, breaks: u32) -> f64;
}

/// The probSAT weight functions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbabilityFunction {
    /// `(eps + breaks)^-cb`
    Polynomial { eps: f64, cb: f64 },
    /// `cb^-breaks`
    Exponential { cb: f64 },
}

impl Default for ProbabilityFunction {
    fn default() -> Self {
        Self::Polynomial { eps: 0.9, cb: 2.06 }
    }
}

impl ProbabilityFunction {
    /// Selects the function configured for workers.
    #[must_use]
    pub fn from_config(config: &WorkerConfig) -> Self {
        match config.probability {
            ProbabilityKind::Polynomial => Self::Polynomial {
                eps: config.eps,
                cb: config.cb,
            },
            ProbabilityKind::Exponential => Self::Exponential { cb: config.cb },
        }
    }

    #[must_use]
    pub fn eval(&self, breaks: u32) -> f64 {
        match *self {
            Self::Polynomial { eps, cb } => (eps + f64::from(breaks)).powf(-cb),
            Self::Exponential { cb } => cb.powf(-f64::from(breaks)),
        }
    }
}

impl BreakProbability for ProbabilityFunction {
    fn probability(&self, breaks: u32) -> f64 {
        self.eval(breaks)
    }
}

/// Locking behaviour of [`SharedProbabilityCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Wait for the lock.
    Blocking,
    /// Compute directly whenever another thread holds the lock.
    TryLock,
}

/// Probability values memoized across all solving threads of a process.
#[derive(Debug)]
pub struct SharedProbabilityCache {
    function: ProbabilityFunction,
    mode: CacheMode,
    values: Mutex<Vec<f64>>,
}

impl SharedProbabilityCache {
    #[must_use]
    pub fn new(function: ProbabilityFunction, mode: CacheMode) -> Self {
        Self {
            function,
            mode,
            values: Mutex::new(Vec::new()),
        }
    }

    /// Number of memoized slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.lock().map(|v| v.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BreakProbability for SharedProbabilityCache {
    fn probability(&self, breaks: u32) -> f64 {
        let guard = match self.mode {
            CacheMode::Blocking => self.values.lock().ok(),
            CacheMode::TryLock => self.values.try_lock().ok(),
        };
        let Some(mut values) = guard else {
            return self.function.eval(breaks);
        };

        let slot = breaks as usize;
        if let Some(&cached) = values.get(slot) {
            if cached > 0.0 {
                return cached;
            }
        } else {
            values.resize(slot + 1, 0.0);
        }
        let value = self.function.eval(breaks);
        values[slot] = value;
        value
    }
}
