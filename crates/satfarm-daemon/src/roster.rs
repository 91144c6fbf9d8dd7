//! Connected workers and the trials each one holds.

use std::collections::BTreeMap;

use satfarm_base::{Error, Result};
use satfarm_protocol::TaskId;

/// Server-assigned worker identifier; never reused within a run.
pub type WorkerId = u64;

/// One connected worker.
#[derive(Debug, Default)]
pub struct WorkerEntry {
    /// Whether `ACTIVATE` was sent.
    pub activated: bool,
    outstanding: BTreeMap<TaskId, u32>,
}

impl WorkerEntry {
    /// Records trials granted to this worker.
    pub fn grant(&mut self, task: TaskId, count: u32) {
        *self.outstanding.entry(task).or_default() += count;
    }

    /// Records trials this worker reported back.
    pub fn settle(&mut self, task: TaskId, count: u32) -> Result<()> {
        let held = self.outstanding.get_mut(&task).ok_or_else(|| {
            Error::Inconsistent(format!("result for task {task} that was never granted"))
        })?;
        let left = held.checked_sub(count).ok_or_else(|| {
            Error::Inconsistent(format!(
                "{count} results for task {task} with only {held} granted"
            ))
        })?;
        *held = left;
        if left == 0 {
            self.outstanding.remove(&task);
        }
        Ok(())
    }

    /// Trials granted and not yet reported.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.outstanding.values().map(|&n| u64::from(n)).sum()
    }

    /// Takes the per-task outstanding counts, leaving none.
    pub fn take_outstanding(&mut self) -> BTreeMap<TaskId, u32> {
        std::mem::take(&mut self.outstanding)
    }
}

/// All workers currently connected.
#[derive(Debug, Default)]
pub struct Roster {
    next_id: WorkerId,
    entries: BTreeMap<WorkerId, WorkerEntry>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new worker.
    pub fn join(&mut self) -> WorkerId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, WorkerEntry::default());
        id
    }

    pub fn get_mut(&mut self, id: WorkerId) -> Option<&mut WorkerEntry> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn remove(&mut self, id: WorkerId) -> Option<WorkerEntry> {
        self.entries.remove(&id)
    }

    /// Ids of workers not yet activated.
    pub fn inactive(&self) -> Vec<WorkerId> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.activated)
            .map(|(&id, _)| id)
            .collect()
    }

    /// All ids in join order.
    pub fn ids(&self) -> Vec<WorkerId> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
