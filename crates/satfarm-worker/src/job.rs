//! Job definitions.

use satfarm_base::utils::as_micros;
use satfarm_base::{Error, Result};
use satfarm_protocol::{ResultRecord, SolutionRecord, TaskId};
use std::sync::Arc;
use std::time::Instant;

use crate::engine::Engine;
use crate::problem::Problem;

/// One trial to be executed by a solver thread.
#[derive(Debug, Clone)]
pub struct Job {
    /// Task the result is reported against.
    pub task_id: TaskId,
    /// Shared problem of the task's file.
    pub problem: Arc<Problem>,
    /// Flips before giving up.
    pub flip_budget: u64,
}

/// A finished trial, ready to be returned to the server.
#[derive(Debug, Clone)]
pub struct Completed {
    /// Reported with `DONE_PROCESSING`.
    pub record: ResultRecord,
    /// Reported with `FOUND_SOLUTION` before the record, if solved.
    pub solution: Option<SolutionRecord>,
}

impl Job {
    /// Executes the job.
    pub fn execute(self, engine: &dyn Engine) -> Result<Completed> {
        let start = Instant::now();
        let outcome = engine
            .execute(&self.problem, self.flip_budget)
            .map_err(|e| {
                Error::Internal(format!(
                    "trial of {} failed: {e}",
                    self.problem.path().display()
                ))
            })?;
        let overall = start.elapsed();

        let solve_secs = outcome.solve.as_secs_f64();
        let flips_per_second = if solve_secs > 0.0 {
            outcome.flips as f64 / solve_secs
        } else {
            0.0
        };

        let solution = outcome.solved.then(|| SolutionRecord {
            seed: outcome.seed,
            flips: outcome.flips,
            solve_micros: as_micros(outcome.solve),
            num_vars: outcome.num_vars,
            num_clauses: outcome.num_clauses,
            filename: self.problem.path().display().to_string(),
        });

        Ok(Completed {
            record: ResultRecord {
                task_id: self.task_id,
                instances_processed: 1,
                flips: outcome.flips,
                flips_per_second,
                init_micros: as_micros(outcome.init),
                solve_micros: as_micros(outcome.solve),
                overall_micros: as_micros(overall),
                seed: outcome.seed,
                num_vars: outcome.num_vars,
                num_clauses: outcome.num_clauses,
                solved: outcome.solved,
            },
            solution,
        })
    }
}
