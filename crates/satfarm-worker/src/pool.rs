//! Solver thread pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use satfarm_base::{Error, Result};
use tokio::sync::mpsc::UnboundedSender;

use crate::engine::Engine;
use crate::job::{Completed, Job};

/// How often an idle thread rechecks the shutdown flag.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Fixed-size pool of solver threads.
///
/// Pending jobs wait in a shared FIFO; completed jobs are delivered to the
/// async side through an unbounded channel. A running trial is never
/// interrupted.
pub struct SolverPool {
    /// Job queue.
    jobs: Sender<Job>,
    /// Second handle on the queue for discarding unstarted jobs.
    backlog: Receiver<Job>,
    /// Solver threads.
    workers: Vec<JoinHandle<()>>,
    /// Shutdown flag.
    shutdown: Arc<AtomicBool>,
}

impl SolverPool {
    /// Spawns `threads` solver threads.
    pub fn new(
        threads: usize,
        engine: Arc<dyn Engine>,
        results: UnboundedSender<Result<Completed>>,
    ) -> Result<Self> {
        let (jobs, backlog) = crossbeam_channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(threads);

        for id in 0..threads {
            let rx = backlog.clone();
            let s = shutdown.clone();
            let engine = engine.clone();
            let tx = results.clone();

            let handle = thread::Builder::new()
                .name(format!("satfarm-solver-{id}"))
                .spawn(move || solver_loop(id, rx, s, engine, tx))?;
            workers.push(handle);
        }

        Ok(Self {
            jobs,
            backlog,
            workers,
            shutdown,
        })
    }

    /// Queues a job.
    pub fn submit(&self, job: Job) -> Result<()> {
        self.jobs
            .send(job)
            .map_err(|_| Error::Internal("solver pool is shut down".to_string()))
    }

    /// Jobs waiting for a thread.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.jobs.len()
    }

    /// Number of solver threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Drops every job no thread has started yet and returns how many.
    pub fn discard_pending(&self) -> usize {
        self.backlog.try_iter().count()
    }

    /// Stops the threads after their current trial and waits for them.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        drop(self.jobs);

        for worker in self.workers {
            if worker.join().is_err() {
                tracing::error!("Solver thread panicked");
            }
        }
    }
}

fn solver_loop(
    id: usize,
    jobs: Receiver<Job>,
    shutdown: Arc<AtomicBool>,
    engine: Arc<dyn Engine>,
    results: UnboundedSender<Result<Completed>>,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match jobs.recv_timeout(IDLE_POLL) {
            Ok(job) => {
                tracing::trace!("Solver {} running task {}", id, job.task_id);
                let completed = job.execute(engine.as_ref());
                if results.send(completed).is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::trace!("Solver {} stopped", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Outcome;
    use crate::problem::Problem;
    use std::sync::atomic::AtomicUsize;

    struct SlowEngine {
        delay: Duration,
        started: AtomicUsize,
    }

    impl Engine for SlowEngine {
        fn execute(&self, _problem: &Problem, _flip_budget: u64) -> Result<Outcome> {
            self.started.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            Ok(Outcome {
                solved: false,
                seed: 1,
                flips: 10,
                init: Duration::ZERO,
                solve: self.delay,
                num_vars: 1,
                num_clauses: 1,
            })
        }
    }

    fn job(task_id: u32) -> Job {
        Job {
            task_id,
            problem: Arc::new(Problem::new("/data/x.cnf")),
            flip_budget: 10,
        }
    }

    #[test]
    fn test_all_jobs_complete() {
        let engine = Arc::new(SlowEngine {
            delay: Duration::ZERO,
            started: AtomicUsize::new(0),
        });
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let pool = SolverPool::new(3, engine, tx).unwrap();
        assert_eq!(pool.threads(), 3);
        for i in 0..10 {
            pool.submit(job(i)).unwrap();
        }
        let mut seen = Vec::new();
        while seen.len() < 10 {
            let done = rx.blocking_recv().unwrap().unwrap();
            seen.push(done.record.task_id);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        pool.shutdown();
    }

    #[test]
    fn test_discard_keeps_running_trials() {
        let engine = Arc::new(SlowEngine {
            delay: Duration::from_millis(150),
            started: AtomicUsize::new(0),
        });
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let pool = SolverPool::new(1, engine.clone(), tx).unwrap();
        for i in 0..4 {
            pool.submit(job(i)).unwrap();
        }
        while engine.started.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        let discarded = pool.discard_pending();
        pool.shutdown();

        let mut finished = 0;
        while let Ok(done) = rx.try_recv() {
            done.unwrap();
            finished += 1;
        }
        assert_eq!(finished, engine.started.load(Ordering::SeqCst));
        assert_eq!(finished + discarded, 4);
        assert!(finished >= 1);
    }
}
