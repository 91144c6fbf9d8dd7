//! Buffer-size negotiation.
//!
//! Each side of a channel starts out assuming the peer can take payloads of
//! [`DEFAULT_PAYLOAD_CAPACITY`] bytes. A sender about to exceed that first
//! announces the new size with a `GROW_BUFFER` frame; the receiver validates
//! it and widens its own limit. Capacities only grow, and never beyond
//! [`ABSOLUTE_MAX_PAYLOAD`].

use satfarm_base::{Error, Result};

/// Payload capacity both sides assume for a fresh channel.
pub const DEFAULT_PAYLOAD_CAPACITY: usize = 1024;

/// Hard upper bound for any payload.
pub const ABSOLUTE_MAX_PAYLOAD: usize = 65536;

/// Tag of the `GROW_BUFFER` frame, identical in all four directions.
pub const GROW_BUFFER_TAG: i32 = 1;

/// Payload length of a `GROW_BUFFER` frame.
pub const GROW_BUFFER_LEN: usize = 4;

/// Declared payload bounds of one message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    /// Smallest valid payload.
    pub min: usize,
    /// Largest valid payload; `None` means "up to the receive capacity".
    pub max: Option<usize>,
}

impl Bounds {
    /// A payload of exactly `len` bytes.
    #[must_use]
    pub const fn exact(len: usize) -> Self {
        Self {
            min: len,
            max: Some(len),
        }
    }

    /// A payload of at least `min` bytes.
    #[must_use]
    pub const fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }
}

/// What the sending side believes the peer can receive.
#[derive(Debug, Clone)]
pub struct SendWindow {
    capacity: usize,
    channel: &'static str,
}

impl SendWindow {
    /// A window at the default capacity.
    #[must_use]
    pub fn new(channel: &'static str) -> Self {
        Self {
            capacity: DEFAULT_PAYLOAD_CAPACITY,
            channel,
        }
    }

    /// Current believed peer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Prepares to send `len` payload bytes.
    ///
    /// Returns the size to announce in a `GROW_BUFFER` frame when the payload
    /// does not fit the believed capacity, and records the new capacity.
    pub fn reserve(&mut self, len: usize) -> Result<Option<i32>> {
        if len > ABSOLUTE_MAX_PAYLOAD {
            return Err(Error::Rejected(format!(
                "{} payload of {len} bytes exceeds the {ABSOLUTE_MAX_PAYLOAD} byte maximum",
                self.channel
            )));
        }
        if len <= self.capacity {
            return Ok(None);
        }
        self.capacity = len;
        // ABSOLUTE_MAX_PAYLOAD fits an i32
        Ok(Some(len as i32))
    }
}

/// What the receiving side accepts.
#[derive(Debug, Clone)]
pub struct ReceiveWindow {
    capacity: usize,
    channel: &'static str,
}

impl ReceiveWindow {
    /// A window at the default capacity.
    #[must_use]
    pub fn new(channel: &'static str) -> Self {
        Self {
            capacity: DEFAULT_PAYLOAD_CAPACITY,
            channel,
        }
    }

    /// Current receive capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Applies a `GROW_BUFFER` announcement.
    ///
    /// On error the capacity is left untouched.
    pub fn grow(&mut self, requested: i32) -> Result<()> {
        let valid = usize::try_from(requested)
            .ok()
            .filter(|&size| size > 0 && size <= ABSOLUTE_MAX_PAYLOAD);
        match valid {
            Some(size) => {
                self.capacity = self.capacity.max(size);
                Ok(())
            }
            None => Err(Error::protocol(
                self.channel,
                format!("invalid buffer size {requested} (allowed 1..={ABSOLUTE_MAX_PAYLOAD})"),
            )),
        }
    }

    /// Checks a received payload length against the kind's bounds.
    pub fn admit(&self, kind: &'static str, len: usize, bounds: Bounds) -> Result<()> {
        let max = bounds.max.unwrap_or(self.capacity).min(self.capacity);
        if len < bounds.min || len > max {
            return Err(Error::protocol(
                self.channel,
                format!(
                    "{kind} payload of {len} bytes outside {}..={max}",
                    bounds.min
                ),
            ));
        }
        Ok(())
    }
}
