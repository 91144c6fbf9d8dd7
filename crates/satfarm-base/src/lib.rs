//! # satfarm-base
//!
//! Foundational pieces shared by every satfarm crate:
//!
//! - **Error Types**: one error enum used across protocol, scheduler and workers
//! - **Configuration**: the TOML cluster configuration
//! - **Logging**: tracing subscriber setup for the binaries
//! - **Utilities**: PRNG, seeding and time helpers

pub mod config;
pub mod error;
pub mod logging;
pub mod utils;

pub use config::ClusterConfig;
pub use error::{Error, Result};
