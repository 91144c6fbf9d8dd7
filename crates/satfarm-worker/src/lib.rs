//! # satfarm-worker
//!
//! Worker side of a satfarm run.
//!
//! - Solving trials run on a fixed-size thread pool fed by a job queue
//! - One async coordinator talks to the server, requesting work while
//!   threads are idle and returning results as they complete
//! - Trials of the same file share one lazily parsed problem

pub mod coordinator;
pub mod engine;
pub mod job;
pub mod pool;
pub mod problem;

pub use coordinator::{Coordinator, CoordinatorSettings, WorkerSummary};
pub use engine::{Engine, Outcome, ProbSatEngine};
pub use job::{Completed, Job};
pub use pool::SolverPool;
pub use problem::{Problem, ProblemCache};
