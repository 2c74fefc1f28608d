//! ISE host controller core
//!
//! Hardware-independent pieces of the host-side ISE driver:
//! - Frame codec for the magic/length framed FIFO protocol
//! - Fault cache with adjacent-duplicate suppression and delivery rate limiting
//! - MED rewrite planner mapping a data change onto the range/hash hierarchy
//! - Configuration and shared value types

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod fault;
pub mod frame;
pub mod med;
pub mod types;

pub use config::{IseConfig, PollPolicy};
pub use fault::{FaultBatch, FaultCache, FaultEntry};
pub use frame::{decode_header, encode_header, Frame, MAGIC};
pub use med::{plan, MedLayout, MedRange, MedRegion, MedRewritePlan, MedRewriteRequest};
pub use types::*;

use thiserror::Error;

/// ISE controller errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IseError {
    /// FIFO did not drain or fill within the retry budget
    #[error("FIFO transfer timed out")]
    Timeout,

    /// Inbound header carried the wrong sentinel
    #[error("Invalid frame magic: {found:#06x}")]
    InvalidMagic {
        /// Sentinel found in the header
        found: u16,
    },

    /// Frame length exceeds the configured maximum payload
    #[error("Frame too large: {length} bytes (max {max})")]
    FrameTooLarge {
        /// Declared payload length
        length: usize,
        /// Configured maximum
        max: usize,
    },

    /// Caller buffer cannot hold the inbound frame
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required
        needed: usize,
        /// Bytes offered
        available: usize,
    },

    /// MED rewrite request outside the secure data window
    #[error("MED range out of bounds: offset={offset:#x}, length={length:#x}")]
    OutOfRange {
        /// Requested offset
        offset: u32,
        /// Requested length
        length: u32,
    },

    /// Operation attempted while the ISE is not powered on
    #[error("ISE is not powered on")]
    PowerNotReady,

    /// Oscillator self-calibration did not complete
    #[error("Oscillator calibration failed after {attempts} attempts")]
    CalibrationFailed {
        /// Polls performed before giving up
        attempts: u32,
    },

    /// ISE declined the power-down request
    #[error("ISE refused power down (status {status:#x})")]
    PowerDownRefused {
        /// Status word returned by the ISE
        status: u32,
    },

    /// Operation requires the ISE to be quiescent
    #[error("ISE is active")]
    DeviceActive,

    /// Register shim reported an access failure
    #[error("Register access failed at {offset:#x}: {reason}")]
    Register {
        /// Register offset
        offset: u32,
        /// Shim-provided reason
        reason: String,
    },

    /// Storage sink or shared memory failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Device context has been detached or poisoned
    #[error("Device detached")]
    Detached,

    /// Configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl IseError {
    /// Errors after which the FIFO contents can no longer be trusted
    pub fn requires_fifo_clear(&self) -> bool {
        matches!(
            self,
            IseError::Timeout | IseError::InvalidMagic { .. } | IseError::FrameTooLarge { .. }
        )
    }
}

/// Result type for ISE operations
pub type IseResult<T> = Result<T, IseError>;
