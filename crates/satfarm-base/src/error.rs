//! Unified error types for satfarm.

use thiserror::Error;

/// The main error type for satfarm operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A peer sent something the protocol does not allow.
    ///
    /// Always fatal for the connection it was detected on.
    #[error("Protocol violation on {channel}: {detail}")]
    Protocol {
        /// Direction of the offending channel (`M2S`, `S2W`, ...).
        channel: &'static str,
        /// What was wrong.
        detail: String,
    },

    /// Scheduler bookkeeping no longer adds up.
    #[error("Inconsistent scheduling state: {0}")]
    Inconsistent(String),

    /// A request was refused without affecting the rest of the system.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The underlying transport failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer went away before the exchange completed.
    #[error("Peer disconnected: {0}")]
    Disconnected(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input file could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Builds a protocol violation for the given channel direction.
    pub fn protocol(channel: &'static str, detail: impl Into<String>) -> Self {
        Self::Protocol {
            channel,
            detail: detail.into(),
        }
    }

    /// Returns whether this error came from a misbehaving peer.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_message() {
        let err = Error::protocol("S2W", "unknown tag 9");
        assert!(err.is_protocol());
        assert_eq!(err.to_string(), "Protocol violation on S2W: unknown tag 9");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.cnf");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_protocol());
    }
}
