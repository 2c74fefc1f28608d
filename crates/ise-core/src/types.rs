//! Shared value types

use crate::fault::FaultBatch;
use crate::med::{MedRewritePlan, MedRewriteRequest};
use serde::{Deserialize, Serialize};

/// Power state as read back from the status register
///
/// Always derived from a fresh register read; the ISE can power itself
/// down without the host asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    /// ISE is powered down
    PoweredDown,
    /// ISE is powered and ready for transport
    PoweredOn,
    /// The status field never settled within the poll budget
    TimedOut,
}

impl PowerState {
    /// Check if the transport may be used
    pub fn is_ready(&self) -> bool {
        matches!(self, PowerState::PoweredOn)
    }
}

/// Asynchronous notification delivered to the event sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IseEvent {
    /// ISE announced itself after power-on or reset
    Ready {
        /// ATR payload
        atr: Vec<u8>,
    },
    /// Batch of hardware faults
    Faults(FaultBatch),
    /// MED integrity error reported by the ISE
    MedError {
        /// Error code register value
        code: u32,
    },
    /// MED ranges were re-persisted after a rewrite notification
    MedRewritten {
        /// Notification as reported
        request: MedRewriteRequest,
        /// Ranges written to storage
        plan: MedRewritePlan,
    },
    /// Rewrite notification rejected (outside the window or storage failure)
    MedRewriteRejected {
        /// Notification as reported
        request: MedRewriteRequest,
        /// Reason for the rejection
        reason: String,
    },
    /// ISE signalled a FIFO transfer error
    TransferError,
    /// ISE watchdog expired
    Watchdog,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state_ready() {
        assert!(PowerState::PoweredOn.is_ready());
        assert!(!PowerState::PoweredDown.is_ready());
        assert!(!PowerState::TimedOut.is_ready());
    }

    #[test]
    fn test_event_serializes() {
        let event = IseEvent::MedError { code: 3 };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"MedError":{"code":3}}"#);
    }
}
