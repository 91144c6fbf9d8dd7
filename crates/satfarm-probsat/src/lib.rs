//! # satfarm-probsat
//!
//! probSAT stochastic local search.
//!
//! A trial starts from a random assignment and repeatedly picks an
//! unsatisfied clause, then flips one of its variables with probability
//! decreasing in the number of clauses the flip would break.
//!
//! - [`Formula`]: clause and occurrence lists built from DIMACS
//! - [`ProbabilityFunction`]: polynomial and exponential break weights
//! - [`SharedProbabilityCache`]: break weights shared between threads
//! - [`Trial`]: one run from one seed

pub mod formula;
pub mod probability;
pub mod solver;

pub use formula::{Formula, Lit};
pub use probability::{BreakProbability, CacheMode, ProbabilityFunction, SharedProbabilityCache};
pub use solver::Trial;
