//! Collaborator interfaces

use ise_core::{IseEvent, IseResult, MedRange, MedRegion};
use std::sync::{mpsc, Arc};

/// 32-bit access to the ISE register block
///
/// Offsets are relative to the block base (see [`crate::regs`]).
pub trait RegisterAccess: Send + Sync {
    /// Read one register
    fn read32(&self, offset: u32) -> IseResult<u32>;

    /// Write one register
    fn write32(&self, offset: u32, value: u32) -> IseResult<()>;

    /// Read-modify-write setting `mask`
    fn set_bits(&self, offset: u32, mask: u32) -> IseResult<()> {
        let value = self.read32(offset)?;
        self.write32(offset, value | mask)
    }

    /// Read-modify-write clearing `mask`
    fn clear_bits(&self, offset: u32, mask: u32) -> IseResult<()> {
        let value = self.read32(offset)?;
        self.write32(offset, value & !mask)
    }
}

/// Durable storage backing the MED (flash, file system)
pub trait StorageSink: Send {
    /// Write `bytes` at `offset` in `region`
    fn persist(&mut self, region: MedRegion, offset: u32, bytes: &[u8]) -> IseResult<()>;

    /// Read `len` bytes at `offset` in `region`
    fn load(&mut self, region: MedRegion, offset: u32, len: u32) -> IseResult<Vec<u8>>;
}

/// Host view of the memory shared with the ISE
pub trait MedMemory: Send + Sync {
    /// Copy `range` of `region` out of shared memory
    fn read(&self, region: MedRegion, range: MedRange) -> IseResult<Vec<u8>>;

    /// Copy `bytes` into shared memory at `offset` of `region`
    fn write(&self, region: MedRegion, offset: u32, bytes: &[u8]) -> IseResult<()>;
}

/// Consumer of asynchronous ISE notifications
pub trait EventSink: Send + Sync {
    /// Hand over one event; must not block for long
    fn deliver(&self, event: IseEvent);
}

impl EventSink for mpsc::Sender<IseEvent> {
    fn deliver(&self, event: IseEvent) {
        if self.send(event).is_err() {
            log::warn!("Event receiver gone, dropping event");
        }
    }
}

/// External services an [`crate::IseDevice`] is attached to
pub struct Collaborators {
    /// Durable MED storage
    pub storage: Box<dyn StorageSink>,
    /// Shared MED memory
    pub memory: Arc<dyn MedMemory>,
    /// Event consumer
    pub events: Arc<dyn EventSink>,
}
