//! Hardware layer for the ISE secure co-processor
//!
//! Drives the ISE through its FIFO register block:
//! - Word-granular FIFO transport with bounded retries
//! - Power-domain sequencing (cold boot, resets, power-down)
//! - Request/response exchanges and blocking reads
//! - Two-phase interrupt dispatch feeding the fault cache and MED persistence
//!
//! [`IseDevice`] owns all of it; collaborators plug in through the traits in
//! [`traits`]. [`sim`] provides an in-process ISE for tests and demos.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod command;
pub mod delay;
pub mod device;
pub mod dispatch;
pub mod poll;
pub mod power;
pub mod regs;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod traits;
pub mod transport;

mod request;

pub use delay::StdDelay;
pub use device::IseDevice;
pub use dispatch::{IrqHandle, IrqOutcome};
pub use poll::poll_until;
pub use power::PowerController;
pub use traits::*;
pub use transport::{FifoOccupancy, FifoTransport, TransportState};

pub use ise_core::{IseConfig, IseError, IseEvent, IseResult, PowerState};
