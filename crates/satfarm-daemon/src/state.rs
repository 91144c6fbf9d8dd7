//! Server state machine.
//!
//! Every manager and worker event is applied here; the effects come out as
//! [`Outbound`] actions that the event loop in [`crate::server`] delivers.
//! Nothing in this module performs I/O.

use satfarm_base::config::ServerConfig;
use satfarm_base::{Error, Result};
use satfarm_protocol::{
    ResultRecord, ServerToManager, ServerToWorker, SolutionRecord, TaskFile, TaskId,
    WorkerToServer,
};

use crate::roster::{Roster, WorkerId};
use crate::scheduler::Scheduler;

/// Something the event loop has to deliver or do.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Send a message to one worker.
    Worker(WorkerId, ServerToWorker),
    /// Send a message to the manager.
    Manager(ServerToManager),
    /// Close a worker connection; the worker is no longer on the roster.
    CloseWorker(WorkerId),
}

/// Server lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepting files and dispatching work.
    Running,
    /// Statistics sent; waiting for workers to leave.
    Draining,
    /// Nothing left to do.
    Stopped,
}

/// Scheduler, roster and shutdown flags of one server.
#[derive(Debug)]
pub struct ServerState {
    scheduler: Scheduler,
    roster: Roster,
    terminate_on_solution: bool,
    wait_for_more_files: bool,
    short_statistics: bool,
    phase: Phase,
    solution_found: bool,
    terminate_requested: bool,
    workers_terminated: bool,
    statistics_sent: bool,
    outbound: Vec<Outbound>,
}

impl ServerState {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            scheduler: Scheduler::new(config.zero_quota_policy),
            roster: Roster::new(),
            terminate_on_solution: config.terminate_on_solution,
            wait_for_more_files: config.wait_for_more_files,
            short_statistics: config.short_statistics,
            phase: Phase::Running,
            solution_found: false,
            terminate_requested: false,
            workers_terminated: false,
            statistics_sent: false,
            outbound: Vec::new(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    #[must_use]
    pub fn solution_found(&self) -> bool {
        self.solution_found
    }

    /// Drains the actions produced so far, in order.
    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbound)
    }

    /// Validates an `ADD_WORKERS` count.
    ///
    /// Workers announced while draining are still accepted; they are sent
    /// `TERMINATE` as soon as they join.
    pub fn workers_to_accept(&self, count: i32) -> Result<usize> {
        match usize::try_from(count) {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(Error::Rejected(format!(
                "ADD_WORKERS needs a positive count, got {count}"
            ))),
        }
    }

    /// Registers a freshly connected worker.
    ///
    /// It is activated right away when work is queued, and terminated right
    /// away when workers were already told to stop.
    pub fn worker_joined(&mut self) -> WorkerId {
        let id = self.roster.join();
        if self.workers_terminated {
            self.outbound.push(Outbound::Worker(id, ServerToWorker::Terminate));
        } else {
            self.wake_idle();
        }
        id
    }

    /// Applies `ADD_FILE`: the file goes to the front of the queue and every
    /// idle worker is activated.
    pub fn add_file(&mut self, file: TaskFile) -> Result<TaskId> {
        if self.phase != Phase::Running {
            return Err(Error::Rejected(format!(
                "{} arrived after the run finished",
                file.filename
            )));
        }
        let filename = file.filename.clone();
        let id = self.scheduler.add_file(file)?;
        tracing::info!("Queued {} as task {}", filename, id);
        self.wake_idle();
        Ok(id)
    }

    /// Applies the manager's `TERMINATE`, or the manager going away.
    pub fn terminate(&mut self) {
        if !self.terminate_requested {
            tracing::info!("Termination requested");
        }
        self.terminate_requested = true;
        self.terminate_workers();
        self.advance();
    }

    /// Applies one message from a worker.
    pub fn handle_worker(&mut self, id: WorkerId, msg: WorkerToServer) -> Result<()> {
        if !self.roster.contains(id) {
            tracing::debug!("Ignoring {:?} from departed worker {}", msg, id);
            return Ok(());
        }
        match msg {
            WorkerToServer::GetInstances { requested } => self.grant(id, requested)?,
            WorkerToServer::DoneProcessing(record) => self.complete(id, &record)?,
            WorkerToServer::FoundSolution(solution) => self.found_solution(id, solution),
            WorkerToServer::Disconnect => {
                tracing::info!("Worker {} disconnected", id);
                self.remove_worker(id)?;
            }
        }
        self.advance();
        Ok(())
    }

    /// Applies a worker connection that ended without `DISCONNECT`.
    pub fn worker_lost(&mut self, id: WorkerId) -> Result<()> {
        if self.roster.contains(id) {
            tracing::warn!("Worker {} went away without disconnecting", id);
            self.remove_worker(id)?;
            self.advance();
        }
        Ok(())
    }

    fn activate(&mut self, id: WorkerId) {
        if let Some(entry) = self.roster.get_mut(id) {
            entry.activated = true;
            self.outbound.push(Outbound::Worker(id, ServerToWorker::Activate));
        }
    }

    /// Activates every idle worker while there is work to hand out.
    fn wake_idle(&mut self) {
        if self.phase != Phase::Running
            || self.dispatch_suspended()
            || !self.scheduler.has_queued()
        {
            return;
        }
        for worker in self.roster.inactive() {
            self.activate(worker);
        }
    }

    fn dispatch_suspended(&self) -> bool {
        self.solution_found || self.workers_terminated
    }

    fn grant(&mut self, id: WorkerId, requested: u32) -> Result<()> {
        let batches = if self.dispatch_suspended() {
            Vec::new()
        } else {
            self.scheduler.grant(requested)
        };
        let entry = self
            .roster
            .get_mut(id)
            .ok_or_else(|| Error::Internal(format!("worker {id} vanished from the roster")))?;
        for batch in &batches {
            entry.grant(batch.task_id, batch.instances);
        }
        tracing::debug!(
            "Worker {} asked for {}, granted {} in {} batches",
            id,
            requested,
            batches.iter().map(|b| b.instances).sum::<u32>(),
            batches.len()
        );
        self.outbound
            .push(Outbound::Worker(id, ServerToWorker::SendInstances(batches)));
        Ok(())
    }

    fn complete(&mut self, id: WorkerId, record: &ResultRecord) -> Result<()> {
        self.roster
            .get_mut(id)
            .ok_or_else(|| Error::Internal(format!("worker {id} vanished from the roster")))?
            .settle(record.task_id, record.instances_processed)?;
        self.scheduler.complete(record)
    }

    fn found_solution(&mut self, id: WorkerId, solution: SolutionRecord) {
        tracing::info!(
            "Worker {} solved {} after {} flips",
            id,
            solution.filename,
            solution.flips
        );
        self.solution_found = true;
        self.outbound
            .push(Outbound::Manager(ServerToManager::FoundSolution(solution)));
        if self.terminate_on_solution {
            self.terminate_workers();
        }
    }

    /// Drops a worker, returning whatever it still held to the scheduler.
    fn remove_worker(&mut self, id: WorkerId) -> Result<()> {
        if let Some(mut entry) = self.roster.remove(id) {
            for (task, count) in entry.take_outstanding() {
                tracing::debug!("Releasing {} instances of task {} from worker {}", count, task, id);
                self.scheduler.release(task, count)?;
            }
            self.outbound.push(Outbound::CloseWorker(id));
        }
        Ok(())
    }

    fn terminate_workers(&mut self) {
        if self.workers_terminated {
            return;
        }
        self.workers_terminated = true;
        for id in self.roster.ids() {
            self.outbound.push(Outbound::Worker(id, ServerToWorker::Terminate));
        }
    }

    fn drain_due(&self) -> bool {
        if self.scheduler.in_flight() > 0 {
            return false;
        }
        let exhausted = !self.wait_for_more_files
            && self.scheduler.has_tasks()
            && !self.scheduler.has_queued();
        self.terminate_requested || self.solution_found || exhausted
    }

    /// Moves through the lifecycle as far as the current state allows.
    ///
    /// Work put back in the queue (a lost worker, a requeued file) wakes
    /// workers that joined while the queue was empty.
    fn advance(&mut self) {
        self.wake_idle();
        if self.phase == Phase::Running && self.drain_due() {
            self.send_statistics();
            self.terminate_workers();
            self.phase = Phase::Draining;
            tracing::info!("Draining with {} workers connected", self.roster.len());
        }
        if self.phase == Phase::Draining && self.roster.is_empty() {
            self.phase = Phase::Stopped;
            tracing::info!("All workers gone, stopping");
        }
    }

    fn send_statistics(&mut self) {
        if self.statistics_sent {
            return;
        }
        self.statistics_sent = true;
        for (file, statistics) in self.scheduler.report(self.short_statistics) {
            self.outbound
                .push(Outbound::Manager(ServerToManager::SendStatistics { file, statistics }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satfarm_base::config::ZeroQuotaPolicy;
    use satfarm_protocol::JobBatch;

    fn config() -> ServerConfig {
        ServerConfig::default()
    }

    fn file(start_configs: u32, name: &str) -> TaskFile {
        TaskFile {
            start_configs,
            max_flips: 1000,
            filename: name.to_string(),
        }
    }

    fn done(task_id: TaskId, solved: bool) -> WorkerToServer {
        WorkerToServer::DoneProcessing(ResultRecord {
            task_id,
            instances_processed: 1,
            flips: 10,
            flips_per_second: 100.0,
            init_micros: 1,
            solve_micros: 1,
            overall_micros: 2,
            seed: 4,
            num_vars: 3,
            num_clauses: 5,
            solved,
        })
    }

    fn solution(name: &str) -> WorkerToServer {
        WorkerToServer::FoundSolution(SolutionRecord {
            seed: 4,
            flips: 10,
            solve_micros: 1,
            num_vars: 3,
            num_clauses: 5,
            filename: name.to_string(),
        })
    }

    fn granted(out: &[Outbound], worker: WorkerId) -> Vec<JobBatch> {
        out.iter()
            .find_map(|o| match o {
                Outbound::Worker(id, ServerToWorker::SendInstances(b)) if *id == worker => {
                    Some(b.clone())
                }
                _ => None,
            })
            .expect("no grant")
    }

    fn terminates(out: &[Outbound]) -> Vec<WorkerId> {
        out.iter()
            .filter_map(|o| match o {
                Outbound::Worker(id, ServerToWorker::Terminate) => Some(*id),
                _ => None,
            })
            .collect()
    }

    fn statistics(out: &[Outbound]) -> usize {
        out.iter()
            .filter(|o| matches!(o, Outbound::Manager(ServerToManager::SendStatistics { .. })))
            .count()
    }

    #[test]
    fn test_worker_activated_on_first_file() {
        let mut state = ServerState::new(&config());
        let w = state.worker_joined();
        assert!(state.take_outbound().is_empty());

        state.add_file(file(2, "a.cnf")).unwrap();
        assert_eq!(
            state.take_outbound(),
            vec![Outbound::Worker(w, ServerToWorker::Activate)]
        );

        let late = state.worker_joined();
        assert_eq!(
            state.take_outbound(),
            vec![Outbound::Worker(late, ServerToWorker::Activate)]
        );

        // already active workers are not activated twice
        state.add_file(file(2, "b.cnf")).unwrap();
        assert!(state.take_outbound().is_empty());
    }

    #[test]
    fn test_full_run_drains_and_stops() {
        let mut state = ServerState::new(&config());
        let w = state.worker_joined();
        let task = state.add_file(file(2, "a.cnf")).unwrap();
        state.take_outbound();

        state
            .handle_worker(w, WorkerToServer::GetInstances { requested: 4 })
            .unwrap();
        let batches = granted(&state.take_outbound(), w);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].instances, 2);

        state.handle_worker(w, done(task, false)).unwrap();
        assert!(state.take_outbound().is_empty());
        assert_eq!(state.phase(), Phase::Running);

        state.handle_worker(w, done(task, false)).unwrap();
        let out = state.take_outbound();
        assert_eq!(statistics(&out), 1);
        assert_eq!(terminates(&out), vec![w]);
        assert_eq!(state.phase(), Phase::Draining);

        state.handle_worker(w, WorkerToServer::Disconnect).unwrap();
        assert_eq!(state.take_outbound(), vec![Outbound::CloseWorker(w)]);
        assert_eq!(state.phase(), Phase::Stopped);
    }

    #[test]
    fn test_terminate_broadcast_once() {
        let mut state = ServerState::new(&config());
        let a = state.worker_joined();
        let b = state.worker_joined();
        let task = state.add_file(file(0, "open.cnf")).unwrap();
        state.take_outbound();
        state
            .handle_worker(a, WorkerToServer::GetInstances { requested: 1 })
            .unwrap();
        state.take_outbound();

        state.handle_worker(a, solution("open.cnf")).unwrap();
        let out = state.take_outbound();
        assert!(matches!(
            out[0],
            Outbound::Manager(ServerToManager::FoundSolution(_))
        ));
        assert_eq!(terminates(&out), vec![a, b]);

        state.handle_worker(b, solution("open.cnf")).unwrap();
        let out = state.take_outbound();
        assert_eq!(out.len(), 1, "second solution is forwarded, nothing else");
        assert!(terminates(&out).is_empty());

        state.terminate();
        assert!(terminates(&state.take_outbound()).is_empty());

        state.handle_worker(a, done(task, true)).unwrap();
        let out = state.take_outbound();
        assert_eq!(statistics(&out), 1);
        assert!(terminates(&out).is_empty());
    }

    #[test]
    fn test_no_dispatch_after_solution() {
        let mut config = config();
        config.terminate_on_solution = false;
        let mut state = ServerState::new(&config);
        let w = state.worker_joined();
        state.add_file(file(10, "a.cnf")).unwrap();
        state
            .handle_worker(w, WorkerToServer::GetInstances { requested: 1 })
            .unwrap();
        state.handle_worker(w, solution("a.cnf")).unwrap();
        state.take_outbound();

        state
            .handle_worker(w, WorkerToServer::GetInstances { requested: 3 })
            .unwrap();
        assert!(granted(&state.take_outbound(), w).is_empty());
        assert_eq!(state.scheduler().in_flight(), 1);
    }

    #[test]
    fn test_statistics_sent_once() {
        let mut state = ServerState::new(&config());
        state.terminate();
        let out = state.take_outbound();
        // nothing ran, and short statistics leave unstarted files out
        assert_eq!(statistics(&out), 0);
        assert_eq!(state.phase(), Phase::Stopped);
        state.terminate();
        assert!(state.take_outbound().is_empty());
    }

    #[test]
    fn test_full_statistics_include_unstarted_files() {
        let mut config = config();
        config.short_statistics = false;
        let mut state = ServerState::new(&config);
        state.add_file(file(3, "a.cnf")).unwrap();
        state.add_file(file(3, "b.cnf")).unwrap();
        state.terminate();
        assert_eq!(statistics(&state.take_outbound()), 2);
    }

    #[test]
    fn test_waits_for_more_files() {
        let mut config = config();
        config.wait_for_more_files = true;
        let mut state = ServerState::new(&config);
        let w = state.worker_joined();
        let task = state.add_file(file(1, "a.cnf")).unwrap();
        state
            .handle_worker(w, WorkerToServer::GetInstances { requested: 1 })
            .unwrap();
        state.handle_worker(w, done(task, false)).unwrap();
        assert_eq!(state.phase(), Phase::Running);

        state.terminate();
        assert_eq!(state.phase(), Phase::Draining);
    }

    #[test]
    fn test_lost_worker_releases_its_trials() {
        let mut state = ServerState::new(&config());
        let a = state.worker_joined();
        let b = state.worker_joined();
        let task = state.add_file(file(4, "a.cnf")).unwrap();
        state
            .handle_worker(a, WorkerToServer::GetInstances { requested: 4 })
            .unwrap();
        state.handle_worker(a, done(task, false)).unwrap();
        state.take_outbound();

        state.worker_lost(a).unwrap();
        assert_eq!(state.take_outbound(), vec![Outbound::CloseWorker(a)]);
        assert_eq!(state.scheduler().in_flight(), 0);
        assert_eq!(state.phase(), Phase::Running);

        state
            .handle_worker(b, WorkerToServer::GetInstances { requested: 8 })
            .unwrap();
        assert_eq!(granted(&state.take_outbound(), b)[0].instances, 3);
    }

    #[test]
    fn test_requeued_work_wakes_idle_worker() {
        let mut state = ServerState::new(&config());
        let a = state.worker_joined();
        state.add_file(file(4, "a.cnf")).unwrap();
        state
            .handle_worker(a, WorkerToServer::GetInstances { requested: 4 })
            .unwrap();
        assert_eq!(granted(&state.take_outbound(), a)[0].instances, 4);

        // joins while every trial is out, nothing to do yet
        let b = state.worker_joined();
        assert!(state.take_outbound().is_empty());
        assert_eq!(state.roster().inactive(), vec![b]);

        state.worker_lost(a).unwrap();
        assert_eq!(
            state.take_outbound(),
            vec![
                Outbound::CloseWorker(a),
                Outbound::Worker(b, ServerToWorker::Activate)
            ]
        );
        assert!(state.roster().inactive().is_empty());

        state
            .handle_worker(b, WorkerToServer::GetInstances { requested: 8 })
            .unwrap();
        assert_eq!(granted(&state.take_outbound(), b)[0].instances, 4);
    }

    #[test]
    fn test_late_worker_is_terminated() {
        let mut state = ServerState::new(&config());
        let a = state.worker_joined();
        state.add_file(file(0, "a.cnf")).unwrap();
        state.terminate();
        state.take_outbound();
        assert_eq!(state.phase(), Phase::Draining);

        let late = state.worker_joined();
        assert_eq!(
            state.take_outbound(),
            vec![Outbound::Worker(late, ServerToWorker::Terminate)]
        );
        state.handle_worker(late, WorkerToServer::Disconnect).unwrap();
        state.handle_worker(a, WorkerToServer::Disconnect).unwrap();
        assert_eq!(state.phase(), Phase::Stopped);
    }

    #[test]
    fn test_rejections() {
        let mut state = ServerState::new(&config());
        assert!(matches!(state.workers_to_accept(0), Err(Error::Rejected(_))));
        assert!(matches!(state.workers_to_accept(-3), Err(Error::Rejected(_))));
        assert_eq!(state.workers_to_accept(3).unwrap(), 3);

        state.terminate();
        assert!(matches!(
            state.add_file(file(1, "late.cnf")),
            Err(Error::Rejected(_))
        ));
    }

    #[test]
    fn test_workers_announced_while_draining() {
        let mut state = ServerState::new(&config());
        let a = state.worker_joined();
        state.add_file(file(1, "a.cnf")).unwrap();
        state.terminate();
        state.take_outbound();
        assert_eq!(state.phase(), Phase::Draining);

        assert_eq!(state.workers_to_accept(2).unwrap(), 2);
        let late = [state.worker_joined(), state.worker_joined()];
        assert_eq!(terminates(&state.take_outbound()), late.to_vec());

        for id in late.into_iter().chain([a]) {
            state.handle_worker(id, WorkerToServer::Disconnect).unwrap();
        }
        assert_eq!(state.phase(), Phase::Stopped);
    }

    #[test]
    fn test_unknown_result_is_inconsistent() {
        let mut state = ServerState::new(&config());
        let w = state.worker_joined();
        state.add_file(file(1, "a.cnf")).unwrap();
        assert!(matches!(
            state.handle_worker(w, done(0, false)),
            Err(Error::Inconsistent(_))
        ));
    }

    #[test]
    fn test_retry_forever_keeps_dispatching() {
        let mut config = config();
        config.zero_quota_policy = ZeroQuotaPolicy::RetryForever;
        let mut state = ServerState::new(&config);
        let w = state.worker_joined();
        let task = state.add_file(file(0, "open.cnf")).unwrap();
        for _ in 0..3 {
            state
                .handle_worker(w, WorkerToServer::GetInstances { requested: 1 })
                .unwrap();
            assert_eq!(granted(&state.take_outbound(), w).len(), 1);
            state.handle_worker(w, done(task, false)).unwrap();
            assert_eq!(state.phase(), Phase::Running);
        }
    }
}
