//! Interrupt dispatch
//!
//! Handling is split in two phases. [`IrqHandle::handle`] is the immediate
//! phase: it acknowledges the raw causes, masks each one and forwards a
//! [`Deferred`] message over a bounded channel. It never touches the FIFO
//! data registers and never waits on anything but the short enable lock.
//!
//! The deferred phase runs on the `ise-deferred` worker thread. It unmasks a
//! cause only after that cause has been fully serviced, so a second
//! occurrence of the same cause cannot overtake the first.
//!
//! Data, ATR and rewrite-info frames share the inbound FIFO. None of their
//! causes says which frame is at the head, so all three drain the FIFO
//! through [`drain_inbound`], which routes each frame by the kind the ISE
//! latched for it in `IN_KIND`.

use crate::device::Shared;
use crate::regs::{frame_kind, irq, FAULT_CODE, INT_ENABLE, INT_STATUS, IN_KIND, MED_ERROR};
use crate::traits::RegisterAccess;
use crate::transport::FifoTransport;
use embedded_hal::delay::DelayNs;
use ise_core::med::{self, MedRewriteRequest};
use ise_core::{Frame, IseEvent, IseResult};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Weak};

/// Work handed from the immediate to the deferred phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deferred {
    DataReady,
    Fault,
    Ready,
    RewriteInfo,
    TransferError,
    Watchdog,
    MedError,
    Shutdown,
}

impl Deferred {
    const CAUSES: [Deferred; 7] = [
        Deferred::DataReady,
        Deferred::Fault,
        Deferred::Ready,
        Deferred::RewriteInfo,
        Deferred::TransferError,
        Deferred::Watchdog,
        Deferred::MedError,
    ];

    fn irq_bit(self) -> u32 {
        match self {
            Deferred::DataReady => irq::DATA_READY,
            Deferred::Fault => irq::FAULT,
            Deferred::Ready => irq::READY,
            Deferred::RewriteInfo => irq::REWRITE_INFO,
            Deferred::TransferError => irq::TRANSFER_ERROR,
            Deferred::Watchdog => irq::WATCHDOG,
            Deferred::MedError => irq::MED_ERROR,
            Deferred::Shutdown => 0,
        }
    }
}

/// Depth of the deferred queue: one slot per cause plus shutdown
pub(crate) const DEFERRED_QUEUE_DEPTH: usize = 8;

/// Result of one immediate-phase invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqOutcome {
    /// No enabled cause was pending
    None,
    /// Causes were acknowledged, nothing deferred
    Handled,
    /// Deferred work was queued
    WakeThread,
}

/// Entry point for the platform interrupt line
///
/// Cheap to clone. Holds only a weak reference to the device so a handler
/// registered with the platform never keeps a detached device alive.
pub struct IrqHandle<R: RegisterAccess> {
    shared: Weak<Shared<R>>,
    tx: SyncSender<Deferred>,
}

impl<R: RegisterAccess> Clone for IrqHandle<R> {
    fn clone(&self) -> Self {
        IrqHandle {
            shared: self.shared.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<R: RegisterAccess> IrqHandle<R> {
    pub(crate) fn new(shared: Weak<Shared<R>>, tx: SyncSender<Deferred>) -> Self {
        IrqHandle { shared, tx }
    }

    /// Service the interrupt line
    pub fn handle(&self) -> IrqOutcome {
        let Some(shared) = self.shared.upgrade() else {
            return IrqOutcome::None;
        };

        match self.acknowledge(&shared) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Interrupt acknowledge failed: {}", e);
                IrqOutcome::Handled
            }
        }
    }

    fn acknowledge(&self, shared: &Shared<R>) -> IseResult<IrqOutcome> {
        let regs = &*shared.regs;
        let _enable = shared.lock_enable()?;

        let enabled = regs.read32(INT_ENABLE)?;
        let pending = regs.read32(INT_STATUS)? & enabled;
        if pending == 0 {
            return Ok(IrqOutcome::None);
        }

        regs.write32(INT_STATUS, pending)?;
        regs.write32(INT_ENABLE, enabled & !pending)?;

        let mut queued = false;
        for cause in Deferred::CAUSES {
            if pending & cause.irq_bit() == 0 {
                continue;
            }
            match self.tx.try_send(cause) {
                Ok(()) => queued = true,
                Err(TrySendError::Full(_)) => {
                    log::warn!("Deferred queue full, dropping {:?}", cause);
                    regs.set_bits(INT_ENABLE, cause.irq_bit())?;
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::warn!("Deferred worker gone, leaving {:?} masked", cause);
                }
            }
        }

        Ok(if queued { IrqOutcome::WakeThread } else { IrqOutcome::Handled })
    }
}

/// Deferred-phase loop; returns on `Shutdown` or when every sender is gone
pub(crate) fn run_deferred<R, D>(shared: Arc<Shared<R>>, rx: Receiver<Deferred>, mut delay: D)
where
    R: RegisterAccess,
    D: DelayNs,
{
    log::debug!("Deferred worker started");

    while let Ok(work) = rx.recv() {
        if work == Deferred::Shutdown {
            break;
        }

        if let Err(e) = service(&shared, &mut delay, work) {
            log::error!("Deferred {:?} failed: {}", work, e);
        }

        if let Err(e) = unmask(&shared, work) {
            log::error!("Re-enabling {:?} failed: {}", work, e);
        }
    }

    log::debug!("Deferred worker stopped");
}

fn unmask<R: RegisterAccess>(shared: &Shared<R>, work: Deferred) -> IseResult<()> {
    let _enable = shared.lock_enable()?;
    shared.regs.set_bits(INT_ENABLE, work.irq_bit())
}

fn service<R, D>(shared: &Shared<R>, delay: &mut D, work: Deferred) -> IseResult<()>
where
    R: RegisterAccess,
    D: DelayNs,
{
    match work {
        Deferred::DataReady | Deferred::Ready | Deferred::RewriteInfo => {
            let routed = drain_inbound(shared, delay)?;
            log::trace!("{:?}: routed {} frames", work, routed);
            Ok(())
        }
        Deferred::Fault => {
            let code = shared.regs.read32(FAULT_CODE)?;
            log::warn!("ISE fault {:#x}", code);
            let batch = {
                let mut faults = shared.lock_faults()?;
                faults.record(code);
                faults.drain_if_armed()
            };
            if let Some(batch) = batch {
                shared.events.deliver(IseEvent::Faults(batch));
            }
            Ok(())
        }
        Deferred::TransferError => {
            log::warn!("ISE reported a transfer error");
            let mut state = shared.lock_transport()?;
            FifoTransport::new(&*shared.regs, delay, shared.config.fifo_policy(), &mut state).clear_fifo()?;
            drop(state);
            shared.events.deliver(IseEvent::TransferError);
            Ok(())
        }
        Deferred::Watchdog => {
            log::error!("ISE watchdog expired");
            shared.events.deliver(IseEvent::Watchdog);
            Ok(())
        }
        Deferred::MedError => {
            let code = shared.regs.read32(MED_ERROR)?;
            log::error!("ISE MED error {:#x}", code);
            shared.events.deliver(IseEvent::MedError { code });
            Ok(())
        }
        Deferred::Shutdown => Ok(()),
    }
}

/// Route every frame waiting in the inbound FIFO, oldest first
///
/// Runs for each frame-carrying cause and from callers about to wait for
/// data. The transport lock is held across the whole drain, so frames are
/// routed in arrival order whichever thread gets there first.
pub(crate) fn drain_inbound<R, D>(shared: &Shared<R>, delay: &mut D) -> IseResult<usize>
where
    R: RegisterAccess,
    D: DelayNs,
{
    let mut state = shared.lock_transport()?;
    let mut transport = FifoTransport::new(&*shared.regs, delay, shared.config.fifo_policy(), &mut state);
    route_pending(shared, &mut transport)
}

/// [`drain_inbound`] for a caller already holding the transport lock
///
/// A frame that fails to decode ends the drain; the transport has cleared
/// the FIFO by then.
pub(crate) fn route_pending<R, D>(shared: &Shared<R>, transport: &mut FifoTransport<'_, R, D>) -> IseResult<usize>
where
    R: RegisterAccess,
    D: DelayNs,
{
    let mut routed = 0;
    while transport.snapshot()?.inbound.count > 0 {
        let kind = shared.regs.read32(IN_KIND)?;
        let frame = transport.recv_frame(shared.config.max_payload_bytes);
        let failed = frame.is_err();
        route(shared, kind, frame);
        routed += 1;
        if failed {
            break;
        }
    }
    Ok(routed)
}

fn route<R: RegisterAccess>(shared: &Shared<R>, kind: u32, frame: IseResult<Frame>) {
    match kind {
        frame_kind::ATR => match frame {
            Ok(frame) => {
                let atr = frame.into_payload().to_vec();
                log::info!("ISE ready, ATR {} bytes", atr.len());
                shared.events.deliver(IseEvent::Ready { atr });
                shared.atr.signal();
            }
            Err(e) => log::error!("Dropping ATR frame: {}", e),
        },
        frame_kind::REWRITE_INFO => match frame {
            Ok(frame) => {
                let (requests, trailing) = MedRewriteRequest::parse_payload(frame.payload());
                if trailing != 0 {
                    log::warn!("Rewrite info carries {} trailing bytes", trailing);
                }
                for request in requests {
                    shared.events.deliver(persist_rewrite(shared, request));
                }
            }
            Err(e) => log::error!("Dropping rewrite-info frame: {}", e),
        },
        kind => {
            if kind != frame_kind::DATA {
                log::warn!("Unknown inbound frame kind {}, queueing as data", kind);
            }
            shared.inbox.push(frame);
        }
    }
}

/// Re-persist the ranges touched by one rewrite, leaves before roots
fn persist_rewrite<R: RegisterAccess>(shared: &Shared<R>, request: MedRewriteRequest) -> IseEvent {
    let rejected = |reason: String| {
        log::warn!(
            "MED rewrite {:#x}+{:#x} rejected: {}",
            request.offset,
            request.length,
            reason
        );
        IseEvent::MedRewriteRejected { request, reason }
    };

    let plan = match med::plan(request, &shared.config.med) {
        Ok(plan) => plan,
        Err(e) => return rejected(e.to_string()),
    };

    let persisted = (|| -> IseResult<()> {
        let mut storage = shared.lock_storage()?;
        for (region, range) in plan.ranges() {
            let bytes = shared.memory.read(region, range)?;
            storage.persist(region, range.offset, &bytes)?;
        }
        Ok(())
    })();

    match persisted {
        Ok(()) => {
            log::debug!("MED rewrite {:#x}+{:#x} persisted", request.offset, request.length);
            IseEvent::MedRewritten { request, plan }
        }
        Err(e) => rejected(e.to_string()),
    }
}
