//! # satfarm-protocol
//!
//! Communication protocol between manager, server and workers.
//!
//! This crate defines:
//! - The four directed message sets and their binary layout
//! - `GROW_BUFFER` buffer-size negotiation
//! - Typed WebSocket channels that hide negotiation from callers
//! - The rendezvous file through which workers find their server

pub mod channel;
pub mod codec;
pub mod messages;
pub mod rendezvous;
pub mod window;

pub use channel::{Inbox, Link, Outbox};
pub use messages::*;
pub use rendezvous::Rendezvous;
pub use window::{ABSOLUTE_MAX_PAYLOAD, DEFAULT_PAYLOAD_CAPACITY};
