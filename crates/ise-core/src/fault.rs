//! Fault cache
//!
//! Buffers fault codes reported by the ISE until the consumer is ready for
//! them. Delivery is armed once; draining disarms it and only an explicit
//! acknowledgement re-arms it, so at most one undelivered report is ever
//! outstanding.

use serde::{Deserialize, Serialize};

/// One fault reported by the ISE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultEntry {
    /// Raw fault code
    pub code: u32,
}

/// Faults handed to the consumer in one delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultBatch {
    /// Buffered entries in arrival order
    pub entries: Vec<FaultEntry>,
    /// Set when entries were dropped because the cache was full
    pub possible_loss: bool,
}

/// Bounded, rate-limited fault buffer
#[derive(Debug)]
pub struct FaultCache {
    entries: Vec<FaultEntry>,
    capacity: usize,
    last_code: Option<u32>,
    armed: bool,
    possible_loss: bool,
}

impl FaultCache {
    /// Create an armed cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        FaultCache {
            entries: Vec::with_capacity(capacity),
            capacity,
            last_code: None,
            armed: true,
            possible_loss: false,
        }
    }

    /// Record a fault code
    ///
    /// A code equal to the most recently stored one is dropped, even if that
    /// one has already been delivered. When full, the new code is discarded,
    /// does not count as stored, and the possible-loss flag is raised.
    pub fn record(&mut self, code: u32) {
        if self.last_code == Some(code) {
            return;
        }

        if self.entries.len() >= self.capacity {
            if !self.possible_loss {
                log::warn!("Fault cache full ({} entries), dropping {:#x}", self.capacity, code);
            }
            self.possible_loss = true;
            return;
        }

        self.entries.push(FaultEntry { code });
        self.last_code = Some(code);
    }

    /// Take the buffered faults if delivery is armed
    pub fn drain_if_armed(&mut self) -> Option<FaultBatch> {
        if !self.armed || self.entries.is_empty() {
            return None;
        }

        self.armed = false;
        let batch = FaultBatch {
            entries: std::mem::take(&mut self.entries),
            possible_loss: self.possible_loss,
        };
        self.possible_loss = false;
        Some(batch)
    }

    /// Re-arm delivery after the consumer acted on the previous batch
    pub fn acknowledge(&mut self) {
        self.armed = true;
    }

    /// Whether the next drain may deliver
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether entries have been dropped since the last drain
    pub fn possible_loss(&self) -> bool {
        self.possible_loss
    }

    /// Number of buffered entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of buffered entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
