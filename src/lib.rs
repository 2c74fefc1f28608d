//! ISE host controller
//!
//! Host-side transport and lifecycle control for the ISE secure
//! co-processor. The work is split across two crates:
//!
//! - [`ise_core`]: frame codec, fault cache, MED rewrite planner, configuration
//! - [`ise_hal`]: FIFO transport, power-domain sequencing, request/response,
//!   interrupt dispatch and the [`IseDevice`] that ties them together
//!
//! ```no_run
//! use ise_host::sim::{MemoryStorage, RecordingSink, SharedMedMemory, SimIse, SimOptions};
//! use ise_host::{Collaborators, IseConfig, IseDevice, StdDelay};
//! use std::sync::Arc;
//!
//! let config = IseConfig::default();
//! let sim = Arc::new(SimIse::new(SimOptions::default()));
//! let collaborators = Collaborators {
//!     storage: Box::new(MemoryStorage::new()),
//!     memory: Arc::new(SharedMedMemory::new(&config.med)),
//!     events: Arc::new(RecordingSink::new()),
//! };
//!
//! let device = IseDevice::attach(sim.clone(), StdDelay, config, collaborators)?;
//! let irq = device.irq_handle();
//! sim.connect_irq(move || {
//!     irq.handle();
//! });
//! device.power_on()?;
//! # Ok::<(), ise_host::IseError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use ise_core;
pub use ise_hal;

pub use embedded_hal::delay::DelayNs;
pub use ise_core::{
    FaultBatch, FaultEntry, Frame, IseConfig, IseError, IseEvent, IseResult, MedLayout, MedRange, MedRegion,
    MedRewritePlan, MedRewriteRequest, PollPolicy, PowerState,
};
pub use ise_hal::{
    command, poll_until, Collaborators, EventSink, FifoOccupancy, FifoTransport, IrqHandle, IrqOutcome, IseDevice,
    MedMemory, PowerController, RegisterAccess, StdDelay, StorageSink, TransportState,
};

#[cfg(feature = "sim")]
pub use ise_hal::sim;

/// Initialise `env_logger` once, honouring `RUST_LOG`
///
/// Later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}
