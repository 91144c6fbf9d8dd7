//! Protocol message types.
//!
//! Four directed channels exist: manager to server (`M2S`), server to manager
//! (`S2M`), server to worker (`S2W`) and worker to server (`W2S`). Each has its
//! own tag space. Tag 0 is invalid everywhere and tag 1 is always
//! `GROW_BUFFER`, which never surfaces as a message value because the channel
//! layer consumes it.

use satfarm_base::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::codec::{decode, encode, prefixed_len};
use crate::window::Bounds;

/// Server-assigned task identifier, an index into the task table.
pub type TaskId = u32;

/// A file submitted for solving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFile {
    /// Trials to start in total; 0 means unbounded.
    pub start_configs: u32,
    /// Flip budget per trial; 0 means the worker default.
    pub max_flips: u32,
    /// Path every worker resolves identically.
    pub filename: String,
}

impl TaskFile {
    /// Smallest encoded size (empty filename).
    pub const MIN_ENCODED_LEN: usize = 8 + prefixed_len(0);

    /// Encoded size with the given filename.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        Self::MIN_ENCODED_LEN + self.filename.len()
    }
}

/// Aggregated results of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatistics {
    /// Trials finished (solved or not).
    pub instances_started: u64,
    /// Flips summed over all trials.
    pub total_flips: u64,
    /// Flips per second, averaged with trial counts as weights.
    pub avg_flips_per_second: f64,
    /// Summed initialization time in microseconds.
    pub init_micros: u64,
    /// Summed solving time in microseconds.
    pub solve_micros: u64,
    /// Summed overall trial time in microseconds.
    pub overall_micros: u64,
    /// Variable count reported by the first trial that flipped anything.
    pub num_vars: u64,
    /// Clause count reported by the first trial that flipped anything.
    pub num_clauses: u64,
    /// Trials that found a satisfying assignment.
    pub times_solved: u64,
    /// Fewest flips any solving trial needed; `u64::MAX` until solved.
    pub min_flips_to_solve: u64,
}

impl TaskStatistics {
    /// Encoded size.
    pub const ENCODED_LEN: usize = 80;
}

impl Default for TaskStatistics {
    fn default() -> Self {
        Self {
            instances_started: 0,
            total_flips: 0,
            avg_flips_per_second: 0.0,
            init_micros: 0,
            solve_micros: 0,
            overall_micros: 0,
            num_vars: 0,
            num_clauses: 0,
            times_solved: 0,
            min_flips_to_solve: u64::MAX,
        }
    }
}

/// A grant of trials of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobBatch {
    /// The file to run.
    pub file: TaskFile,
    /// Number of trials to start.
    pub instances: u32,
    /// Task the results must be reported against.
    pub task_id: TaskId,
}

impl JobBatch {
    /// Encoded size of this batch.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.file.encoded_len() + 8
    }
}

/// Outcome of finished trials, sent with `DONE_PROCESSING`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub task_id: TaskId,
    pub instances_processed: u32,
    pub flips: u64,
    pub flips_per_second: f64,
    /// Microseconds.
    pub init_micros: u64,
    /// Microseconds.
    pub solve_micros: u64,
    /// Microseconds.
    pub overall_micros: u64,
    pub seed: u64,
    pub num_vars: u64,
    pub num_clauses: u64,
    pub solved: bool,
}

impl ResultRecord {
    /// Encoded size.
    pub const ENCODED_LEN: usize = 73;
}

/// A satisfying trial, reproducible from its seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionRecord {
    pub seed: u64,
    pub flips: u64,
    /// Microseconds.
    pub solve_micros: u64,
    pub num_vars: u64,
    pub num_clauses: u64,
    pub filename: String,
}

impl SolutionRecord {
    /// Smallest encoded size (empty filename).
    pub const MIN_ENCODED_LEN: usize = 40 + prefixed_len(0);
}

/// A tagged message of one channel direction.
pub trait Message: Sized + Send + std::fmt::Debug + 'static {
    /// Channel name used in logs and errors.
    const CHANNEL: &'static str;

    /// Tag of this message.
    fn tag(&self) -> i32;

    /// Name and payload bounds of a tag, `None` if the tag is unknown.
    fn describe(tag: i32) -> Option<(&'static str, Bounds)>;

    /// Encodes the payload.
    fn to_payload(&self) -> Result<Vec<u8>>;

    /// Decodes the payload of a known tag.
    fn decode_payload(tag: i32, payload: &[u8]) -> Result<Self>;

    /// Name of this message.
    fn kind(&self) -> &'static str {
        Self::describe(self.tag()).map_or("UNKNOWN", |(name, _)| name)
    }

    /// Decodes a complete payload, rejecting unknown tags and leftovers.
    fn from_payload(tag: i32, payload: &[u8]) -> Result<Self> {
        if Self::describe(tag).is_none() {
            return Err(unknown_tag(Self::CHANNEL, tag));
        }
        Self::decode_payload(tag, payload)
    }
}

fn unknown_tag(channel: &'static str, tag: i32) -> Error {
    Error::protocol(channel, format!("unknown tag {tag}"))
}

/// Commands from the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerToServer {
    /// Announces that `count` workers will connect.
    AddWorkers { count: i32 },
    /// Submits a file.
    AddFile(TaskFile),
    /// Stops the whole run.
    Terminate,
}

impl Message for ManagerToServer {
    const CHANNEL: &'static str = "M2S";

    fn tag(&self) -> i32 {
        match self {
            Self::AddWorkers { .. } => 2,
            Self::AddFile(_) => 3,
            Self::Terminate => 4,
        }
    }

    fn describe(tag: i32) -> Option<(&'static str, Bounds)> {
        match tag {
            2 => Some(("ADD_WORKERS", Bounds::exact(4))),
            3 => Some(("ADD_FILE", Bounds::at_least(TaskFile::MIN_ENCODED_LEN))),
            4 => Some(("TERMINATE", Bounds::exact(0))),
            _ => None,
        }
    }

    fn to_payload(&self) -> Result<Vec<u8>> {
        match self {
            Self::AddWorkers { count } => encode(count, Self::CHANNEL),
            Self::AddFile(file) => encode(file, Self::CHANNEL),
            Self::Terminate => Ok(Vec::new()),
        }
    }

    fn decode_payload(tag: i32, payload: &[u8]) -> Result<Self> {
        match tag {
            2 => Ok(Self::AddWorkers {
                count: decode(payload, Self::CHANNEL)?,
            }),
            3 => Ok(Self::AddFile(decode(payload, Self::CHANNEL)?)),
            4 => Ok(Self::Terminate),
            _ => Err(unknown_tag(Self::CHANNEL, tag)),
        }
    }
}

/// Reports to the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerToManager {
    /// A worker found a satisfying assignment.
    FoundSolution(SolutionRecord),
    /// Final statistics of one file.
    SendStatistics {
        file: TaskFile,
        statistics: TaskStatistics,
    },
    /// The server has shut down.
    Disconnect,
}

impl Message for ServerToManager {
    const CHANNEL: &'static str = "S2M";

    fn tag(&self) -> i32 {
        match self {
            Self::FoundSolution(_) => 2,
            Self::SendStatistics { .. } => 3,
            Self::Disconnect => 4,
        }
    }

    fn describe(tag: i32) -> Option<(&'static str, Bounds)> {
        match tag {
            2 => Some((
                "FOUND_SOLUTION",
                Bounds::at_least(SolutionRecord::MIN_ENCODED_LEN),
            )),
            3 => Some((
                "SEND_STATISTICS",
                Bounds::at_least(TaskFile::MIN_ENCODED_LEN + TaskStatistics::ENCODED_LEN),
            )),
            4 => Some(("DISCONNECT", Bounds::exact(0))),
            _ => None,
        }
    }

    fn to_payload(&self) -> Result<Vec<u8>> {
        match self {
            Self::FoundSolution(solution) => encode(solution, Self::CHANNEL),
            Self::SendStatistics { file, statistics } => {
                encode(&(file, statistics), Self::CHANNEL)
            }
            Self::Disconnect => Ok(Vec::new()),
        }
    }

    fn decode_payload(tag: i32, payload: &[u8]) -> Result<Self> {
        match tag {
            2 => Ok(Self::FoundSolution(decode(payload, Self::CHANNEL)?)),
            3 => {
                let (file, statistics) = decode(payload, Self::CHANNEL)?;
                Ok(Self::SendStatistics { file, statistics })
            }
            4 => Ok(Self::Disconnect),
            _ => Err(unknown_tag(Self::CHANNEL, tag)),
        }
    }
}

/// Commands to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerToWorker {
    /// Work is available; start requesting.
    Activate,
    /// Reply to `GET_INSTANCES`, possibly empty.
    SendInstances(Vec<JobBatch>),
    /// Finish running trials, report and disconnect.
    Terminate,
}

impl ServerToWorker {
    /// Payload size of a `SEND_INSTANCES` reply with no batches.
    pub const EMPTY_GRANT_LEN: usize = prefixed_len(0);
}

impl Message for ServerToWorker {
    const CHANNEL: &'static str = "S2W";

    fn tag(&self) -> i32 {
        match self {
            Self::Activate => 2,
            Self::SendInstances(_) => 3,
            Self::Terminate => 4,
        }
    }

    fn describe(tag: i32) -> Option<(&'static str, Bounds)> {
        match tag {
            2 => Some(("ACTIVATE", Bounds::exact(0))),
            3 => Some(("SEND_INSTANCES", Bounds::at_least(Self::EMPTY_GRANT_LEN))),
            4 => Some(("TERMINATE", Bounds::exact(0))),
            _ => None,
        }
    }

    fn to_payload(&self) -> Result<Vec<u8>> {
        match self {
            Self::SendInstances(batches) => encode(batches, Self::CHANNEL),
            Self::Activate | Self::Terminate => Ok(Vec::new()),
        }
    }

    fn decode_payload(tag: i32, payload: &[u8]) -> Result<Self> {
        match tag {
            2 => Ok(Self::Activate),
            3 => Ok(Self::SendInstances(decode(payload, Self::CHANNEL)?)),
            4 => Ok(Self::Terminate),
            _ => Err(unknown_tag(Self::CHANNEL, tag)),
        }
    }
}

/// Reports and requests from a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerToServer {
    /// One trial satisfied its formula.
    FoundSolution(SolutionRecord),
    /// Trials of a task finished.
    DoneProcessing(ResultRecord),
    /// Asks for up to `requested` more trials.
    GetInstances { requested: u32 },
    /// The worker is leaving.
    Disconnect,
}

impl Message for WorkerToServer {
    const CHANNEL: &'static str = "W2S";

    fn tag(&self) -> i32 {
        match self {
            Self::FoundSolution(_) => 2,
            Self::DoneProcessing(_) => 3,
            Self::GetInstances { .. } => 4,
            Self::Disconnect => 5,
        }
    }

    fn describe(tag: i32) -> Option<(&'static str, Bounds)> {
        match tag {
            2 => Some((
                "FOUND_SOLUTION",
                Bounds::at_least(SolutionRecord::MIN_ENCODED_LEN),
            )),
            3 => Some(("DONE_PROCESSING", Bounds::exact(ResultRecord::ENCODED_LEN))),
            4 => Some(("GET_INSTANCES", Bounds::exact(4))),
            5 => Some(("DISCONNECT", Bounds::exact(0))),
            _ => None,
        }
    }

    fn to_payload(&self) -> Result<Vec<u8>> {
        match self {
            Self::FoundSolution(solution) => encode(solution, Self::CHANNEL),
            Self::DoneProcessing(record) => encode(record, Self::CHANNEL),
            Self::GetInstances { requested } => encode(requested, Self::CHANNEL),
            Self::Disconnect => Ok(Vec::new()),
        }
    }

    fn decode_payload(tag: i32, payload: &[u8]) -> Result<Self> {
        match tag {
            2 => Ok(Self::FoundSolution(decode(payload, Self::CHANNEL)?)),
            3 => Ok(Self::DoneProcessing(decode(payload, Self::CHANNEL)?)),
            4 => Ok(Self::GetInstances {
                requested: decode(payload, Self::CHANNEL)?,
            }),
            5 => Ok(Self::Disconnect),
            _ => Err(unknown_tag(Self::CHANNEL, tag)),
        }
    }
}
