//! Task scheduler for the daemon.
//!
//! Tracks every submitted file, the queue of files that still need trials
//! and how many trials are out at workers. The scheduler does no I/O; the
//! server state feeds it requests and results.

use std::collections::VecDeque;

use satfarm_base::config::ZeroQuotaPolicy;
use satfarm_base::{Error, Result};
use satfarm_protocol::{
    JobBatch, ResultRecord, ServerToWorker, TaskFile, TaskId, TaskStatistics,
    ABSOLUTE_MAX_PAYLOAD,
};

/// Server-side record of one submitted file.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    /// The file as submitted.
    pub file: TaskFile,
    /// Results merged so far.
    pub statistics: TaskStatistics,
    /// Trials granted but not yet reported.
    pub in_flight: u32,
    /// Whether the task is in the queue.
    pub scheduled: bool,
    /// Set once a result with flips fixed the variable and clause counts.
    shape_known: bool,
}

impl TaskInfo {
    fn new(file: TaskFile) -> Self {
        Self {
            file,
            statistics: TaskStatistics::default(),
            in_flight: 0,
            scheduled: true,
            shape_known: false,
        }
    }

    /// Trials still to hand out; `None` for an unbounded file.
    fn quota_left(&self) -> Option<u64> {
        match self.file.start_configs {
            0 => None,
            required => Some(
                u64::from(required)
                    .saturating_sub(u64::from(self.in_flight))
                    .saturating_sub(self.statistics.instances_started),
            ),
        }
    }

    fn wants_requeue(&self, policy: ZeroQuotaPolicy) -> bool {
        if self.scheduled {
            return false;
        }
        match self.quota_left() {
            None => policy == ZeroQuotaPolicy::RetryForever,
            Some(left) => left > 0,
        }
    }
}

/// Task table, scheduling queue and global in-flight count.
#[derive(Debug)]
pub struct Scheduler {
    tasks: Vec<TaskInfo>,
    queue: VecDeque<TaskId>,
    in_flight: u64,
    policy: ZeroQuotaPolicy,
}

impl Scheduler {
    /// Creates a new scheduler.
    pub fn new(policy: ZeroQuotaPolicy) -> Self {
        Self {
            tasks: Vec::new(),
            queue: VecDeque::new(),
            in_flight: 0,
            policy,
        }
    }

    /// Registers a file and puts it at the front of the queue.
    ///
    /// A file whose grant could never fit a payload is refused.
    pub fn add_file(&mut self, file: TaskFile) -> Result<TaskId> {
        // a batch is the file plus instance count and task id
        if ServerToWorker::EMPTY_GRANT_LEN + file.encoded_len() + 8 > ABSOLUTE_MAX_PAYLOAD {
            return Err(Error::Rejected(format!(
                "filename of {} bytes is too long to dispatch",
                file.filename.len()
            )));
        }
        let id = TaskId::try_from(self.tasks.len())
            .map_err(|_| Error::Rejected("task table is full".into()))?;
        self.tasks.push(TaskInfo::new(file));
        self.queue.push_front(id);
        Ok(id)
    }

    /// Hands out up to `requested` trials, newest files first.
    ///
    /// A file leaves the queue once its remaining quota is covered. Batches
    /// stop early if the reply would outgrow the largest allowed payload.
    pub fn grant(&mut self, requested: u32) -> Vec<JobBatch> {
        let mut remaining = requested;
        let mut batches = Vec::new();
        let mut reply_len = ServerToWorker::EMPTY_GRANT_LEN;

        while remaining > 0 {
            let Some(&id) = self.queue.front() else {
                break;
            };
            let task = &mut self.tasks[id as usize];
            let available = task
                .quota_left()
                .map_or(remaining, |left| left.min(u64::from(u32::MAX)) as u32);
            let take = remaining.min(available);

            if take > 0 {
                let batch = JobBatch {
                    file: task.file.clone(),
                    instances: take,
                    task_id: id,
                };
                if reply_len + batch.encoded_len() > ABSOLUTE_MAX_PAYLOAD {
                    break;
                }
                reply_len += batch.encoded_len();
                task.in_flight += take;
                self.in_flight += u64::from(take);
                batches.push(batch);
            }

            if available <= take {
                self.queue.pop_front();
                task.scheduled = false;
            }
            remaining -= take;
        }
        batches
    }

    /// Merges a `DONE_PROCESSING` record.
    pub fn complete(&mut self, record: &ResultRecord) -> Result<()> {
        let task = self.tasks.get_mut(record.task_id as usize).ok_or_else(|| {
            Error::Inconsistent(format!("result for unknown task {}", record.task_id))
        })?;
        let n = record.instances_processed;

        let task_in_flight = task.in_flight.checked_sub(n).ok_or_else(|| {
            Error::Inconsistent(format!(
                "task {} reports {} instances but only {} are in flight",
                record.task_id, n, task.in_flight
            ))
        })?;
        let global_in_flight = self.in_flight.checked_sub(u64::from(n)).ok_or_else(|| {
            Error::Inconsistent("global in-flight count would underflow".into())
        })?;
        if record.flips > 0
            && task.shape_known
            && (task.statistics.num_vars != record.num_vars
                || task.statistics.num_clauses != record.num_clauses)
        {
            return Err(Error::Inconsistent(format!(
                "task {} reported {} vars / {} clauses, earlier {} / {}",
                record.task_id,
                record.num_vars,
                record.num_clauses,
                task.statistics.num_vars,
                task.statistics.num_clauses
            )));
        }

        let stats = &mut task.statistics;
        let started = stats.instances_started;
        let added = u64::from(n);
        if started + added > 0 {
            stats.avg_flips_per_second = (stats.avg_flips_per_second * started as f64
                + record.flips_per_second * added as f64)
                / (started + added) as f64;
        }
        stats.instances_started += added;
        stats.total_flips += record.flips;
        stats.init_micros += record.init_micros;
        stats.solve_micros += record.solve_micros;
        stats.overall_micros += record.overall_micros;
        if record.flips > 0 && !task.shape_known {
            stats.num_vars = record.num_vars;
            stats.num_clauses = record.num_clauses;
            task.shape_known = true;
        }
        if record.solved {
            stats.times_solved += 1;
            stats.min_flips_to_solve = stats.min_flips_to_solve.min(record.flips);
        }

        task.in_flight = task_in_flight;
        self.in_flight = global_in_flight;
        self.requeue_if_needed(record.task_id);
        Ok(())
    }

    /// Returns trials that were granted but will never be reported.
    pub fn release(&mut self, task_id: TaskId, count: u32) -> Result<()> {
        let task = self.tasks.get_mut(task_id as usize).ok_or_else(|| {
            Error::Inconsistent(format!("release for unknown task {task_id}"))
        })?;
        let task_in_flight = task.in_flight.checked_sub(count).ok_or_else(|| {
            Error::Inconsistent(format!(
                "releasing {count} instances of task {task_id} with {} in flight",
                task.in_flight
            ))
        })?;
        let global_in_flight = self
            .in_flight
            .checked_sub(u64::from(count))
            .ok_or_else(|| Error::Inconsistent("global in-flight count would underflow".into()))?;
        task.in_flight = task_in_flight;
        self.in_flight = global_in_flight;
        self.requeue_if_needed(task_id);
        Ok(())
    }

    fn requeue_if_needed(&mut self, task_id: TaskId) {
        let task = &mut self.tasks[task_id as usize];
        if task.wants_requeue(self.policy) {
            task.scheduled = true;
            self.queue.push_back(task_id);
        }
    }

    /// Trials out at workers.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight
    }

    /// Whether any file was ever submitted.
    #[must_use]
    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Whether a file is waiting for trials.
    #[must_use]
    pub fn has_queued(&self) -> bool {
        !self.queue.is_empty()
    }

    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&TaskInfo> {
        self.tasks.get(id as usize)
    }

    /// Queue contents, front first.
    pub fn queued(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.queue.iter().copied()
    }

    /// Final statistics, optionally limited to files that ran at all.
    #[must_use]
    pub fn report(&self, short: bool) -> Vec<(TaskFile, TaskStatistics)> {
        self.tasks
            .iter()
            .filter(|task| !short || task.statistics.instances_started > 0)
            .map(|task| (task.file.clone(), task.statistics.clone()))
            .collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(ZeroQuotaPolicy::default())
    }
}
