//! The solving engine seen by solver threads.

use satfarm_base::config::{CachePolicy, WorkerConfig};
use satfarm_base::utils::fresh_seed;
use satfarm_base::Result;
use satfarm_probsat::{
    BreakProbability, CacheMode, ProbabilityFunction, SharedProbabilityCache, Trial,
};
use std::time::{Duration, Instant};

use crate::problem::Problem;

/// Result of one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub solved: bool,
    pub seed: u64,
    pub flips: u64,
    /// Problem loading plus trial setup.
    pub init: Duration,
    pub solve: Duration,
    pub num_vars: u64,
    pub num_clauses: u64,
}

/// Runs one trial of a problem.
pub trait Engine: Send + Sync {
    /// Runs until solved or `flip_budget` flips were made.
    fn execute(&self, problem: &Problem, flip_budget: u64) -> Result<Outcome>;
}

/// probSAT with a configurable probability function.
#[derive(Debug)]
pub struct ProbSatEngine {
    function: ProbabilityFunction,
    cache: Option<SharedProbabilityCache>,
}

impl ProbSatEngine {
    #[must_use]
    pub fn new(function: ProbabilityFunction, cache: CachePolicy) -> Self {
        let cache = match cache {
            CachePolicy::Off => None,
            CachePolicy::Blocking => Some(SharedProbabilityCache::new(function, CacheMode::Blocking)),
            CachePolicy::TryLock => Some(SharedProbabilityCache::new(function, CacheMode::TryLock)),
        };
        Self { function, cache }
    }

    #[must_use]
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(ProbabilityFunction::from_config(config), config.cache)
    }
}

impl Engine for ProbSatEngine {
    fn execute(&self, problem: &Problem, flip_budget: u64) -> Result<Outcome> {
        let start = Instant::now();
        let formula = problem.formula()?;
        let probability: &dyn BreakProbability = match &self.cache {
            Some(cache) => cache,
            None => &self.function,
        };
        let mut trial = Trial::new(formula, probability, fresh_seed());
        let init = start.elapsed();

        let solving = Instant::now();
        let solved = trial.run(flip_budget);
        let solve = solving.elapsed();
        debug_assert!(!solved || formula.is_satisfied_by(trial.assignment()));

        Ok(Outcome {
            solved,
            seed: trial.seed(),
            flips: trial.flips(),
            init,
            solve,
            num_vars: formula.num_vars() as u64,
            num_clauses: formula.num_clauses() as u64,
        })
    }
}
