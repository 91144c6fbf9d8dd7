//! # satfarm-daemon
//!
//! Server side of a satfarm run.
//!
//! - The scheduler hands out trials per file, newest file first, and merges
//!   the results workers send back
//! - The server state applies manager and worker messages and decides when
//!   to drain and stop
//! - The event loop owns every connection and delivers what the state
//!   decided

pub mod roster;
pub mod scheduler;
pub mod server;
pub mod state;

pub use roster::{Roster, WorkerId};
pub use scheduler::{Scheduler, TaskInfo};
pub use server::Server;
pub use state::{Outbound, Phase, ServerState};
