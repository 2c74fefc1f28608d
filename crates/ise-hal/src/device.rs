//! ISE device context
//!
//! [`IseDevice`] is the single owner of the register block, the transport
//! mirror, the fault cache and the serialization lock. Every caller-facing
//! operation takes the operation lock for its whole duration, so at most one
//! transport or power operation is in flight per device.
//!
//! Power state is never cached. Each operation that needs a powered ISE
//! re-reads the status register first.

use crate::command;
use crate::dispatch::{self, Deferred, IrqHandle, DEFERRED_QUEUE_DEPTH};
use crate::power::PowerController;
use crate::regs::{irq, INT_ENABLE, INT_STATUS};
use crate::request::{Inbox, PendingRequest, ReadySignal};
use crate::traits::{Collaborators, EventSink, MedMemory, RegisterAccess, StorageSink};
use crate::transport::{FifoTransport, TransportState};
use embedded_hal::delay::DelayNs;
use ise_core::{Frame, FaultCache, IseConfig, IseError, IseEvent, IseResult, MedRegion, PowerState};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// State shared between caller threads and the deferred worker
pub(crate) struct Shared<R: RegisterAccess> {
    pub(crate) regs: Arc<R>,
    pub(crate) config: IseConfig,
    op_lock: Mutex<()>,
    transport: Mutex<TransportState>,
    faults: Mutex<FaultCache>,
    enable_lock: Mutex<()>,
    storage: Mutex<Box<dyn StorageSink>>,
    pub(crate) memory: Arc<dyn MedMemory>,
    pub(crate) events: Arc<dyn EventSink>,
    /// Data frames waiting for the raw reader or a command
    pub(crate) inbox: Inbox,
    /// Raised by the worker once the ATR has been consumed
    pub(crate) atr: ReadySignal,
}

fn lock<T>(mutex: &Mutex<T>) -> IseResult<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| {
        log::error!("Device lock poisoned");
        IseError::Detached
    })
}

impl<R: RegisterAccess> Shared<R> {
    pub(crate) fn lock_transport(&self) -> IseResult<MutexGuard<'_, TransportState>> {
        lock(&self.transport)
    }

    pub(crate) fn lock_faults(&self) -> IseResult<MutexGuard<'_, FaultCache>> {
        lock(&self.faults)
    }

    pub(crate) fn lock_enable(&self) -> IseResult<MutexGuard<'_, ()>> {
        lock(&self.enable_lock)
    }

    pub(crate) fn lock_storage(&self) -> IseResult<MutexGuard<'_, Box<dyn StorageSink>>> {
        lock(&self.storage)
    }
}

/// Host-side controller for one ISE
pub struct IseDevice<R, D>
where
    R: RegisterAccess + 'static,
    D: DelayNs + Clone + Send + 'static,
{
    shared: Arc<Shared<R>>,
    tx: SyncSender<Deferred>,
    worker: Option<JoinHandle<()>>,
    delay: D,
}

impl<R, D> IseDevice<R, D>
where
    R: RegisterAccess + 'static,
    D: DelayNs + Clone + Send + 'static,
{
    /// Attach to an ISE register block
    ///
    /// Leaves the FIFOs empty, all interrupt causes acknowledged and enabled,
    /// and the deferred worker running. The ISE itself is not powered on.
    pub fn attach(regs: Arc<R>, delay: D, config: IseConfig, collaborators: Collaborators) -> IseResult<Self> {
        config.validate()?;

        let Collaborators {
            storage,
            memory,
            events,
        } = collaborators;

        let shared = Arc::new(Shared {
            regs,
            faults: Mutex::new(FaultCache::new(config.fault_capacity)),
            config,
            op_lock: Mutex::new(()),
            transport: Mutex::new(TransportState::default()),
            enable_lock: Mutex::new(()),
            storage: Mutex::new(storage),
            memory,
            events,
            inbox: Inbox::new(),
            atr: ReadySignal::new(),
        });

        {
            let regs = &*shared.regs;
            regs.write32(INT_ENABLE, 0)?;
            let mut delay = delay.clone();
            let mut state = shared.lock_transport()?;
            FifoTransport::new(regs, &mut delay, shared.config.fifo_policy(), &mut state).clear_fifo()?;
            regs.write32(INT_STATUS, irq::ALL)?;
        }

        let (tx, rx) = mpsc::sync_channel(DEFERRED_QUEUE_DEPTH);
        let worker = {
            let shared = shared.clone();
            let delay = delay.clone();
            thread::Builder::new()
                .name("ise-deferred".into())
                .spawn(move || dispatch::run_deferred(shared, rx, delay))
                .map_err(|e| {
                    log::error!("Failed to spawn deferred worker: {}", e);
                    IseError::Detached
                })?
        };

        shared.regs.write32(INT_ENABLE, irq::ALL)?;
        log::info!("ISE attached");

        Ok(IseDevice {
            shared,
            tx,
            worker: Some(worker),
            delay,
        })
    }

    /// Handle for the platform interrupt line
    pub fn irq_handle(&self) -> IrqHandle<R> {
        IrqHandle::new(Arc::downgrade(&self.shared), self.tx.clone())
    }

    /// Configuration in effect
    pub fn config(&self) -> &IseConfig {
        &self.shared.config
    }

    /// Cold boot the ISE and wait for its ATR
    ///
    /// Does nothing if the ISE already reports powered on.
    pub fn power_on(&self) -> IseResult<()> {
        let _op = lock(&self.shared.op_lock)?;
        let mut delay = self.delay.clone();

        if self.power(&mut delay).query_status()? == PowerState::PoweredOn {
            log::debug!("ISE already powered on");
            return Ok(());
        }

        self.shared.atr.take();
        self.power(&mut delay).cold_power_on()?;
        self.require_powered(&mut delay)?;
        self.wait_for_atr();
        Ok(())
    }

    /// Reset the ISE contents and wait for its ATR
    pub fn soft_reset(&self) -> IseResult<()> {
        let _op = lock(&self.shared.op_lock)?;
        let mut delay = self.delay.clone();

        self.require_powered(&mut delay)?;
        self.shared.atr.take();
        self.power(&mut delay).soft_reset()?;
        self.require_powered(&mut delay)?;
        self.wait_for_atr();
        Ok(())
    }

    /// Pulse the hard reset line
    pub fn hard_reset(&self) -> IseResult<()> {
        let _op = lock(&self.shared.op_lock)?;
        let mut delay = self.delay.clone();
        self.power(&mut delay).hard_reset()
    }

    /// Assert hard reset; pair with [`IseDevice::hard_reset_clear`]
    pub fn hard_reset_set(&self) -> IseResult<()> {
        let _op = lock(&self.shared.op_lock)?;
        let mut delay = self.delay.clone();
        self.power(&mut delay).hard_reset_set()
    }

    /// Release hard reset
    pub fn hard_reset_clear(&self) -> IseResult<()> {
        let _op = lock(&self.shared.op_lock)?;
        let mut delay = self.delay.clone();
        self.power(&mut delay).hard_reset_clear()
    }

    /// Power the ISE down once it agrees to it
    ///
    /// The counter and level-1 areas are persisted only after the ISE has
    /// acknowledged the request, then power is removed.
    pub fn full_power_down(&self) -> IseResult<()> {
        let _op = lock(&self.shared.op_lock)?;
        let mut delay = self.delay.clone();

        let reply = self.exchange(&mut delay, command::PREPARE_POWER_DOWN, &[], 1, self.shared.config.reply_timeout())?;
        let status = reply.first().copied().unwrap_or(u32::MAX);
        if status != command::STATUS_OK {
            log::warn!("ISE refused power down: {:#x}", status);
            return Err(IseError::PowerDownRefused { status });
        }

        {
            let mut storage = self.shared.lock_storage()?;
            for region in [MedRegion::Counter, MedRegion::Level1] {
                let extent = self.shared.config.med.region_extent(region);
                let bytes = self.shared.memory.read(region, extent)?;
                storage.persist(region, extent.offset, &bytes)?;
                log::debug!("Persisted {:?} ({} bytes)", region, bytes.len());
            }
        }

        self.power(&mut delay).release_power()?;
        log::info!("ISE powered down");
        Ok(())
    }

    /// Read the power state from hardware
    pub fn query_power_status(&self) -> IseResult<PowerState> {
        let _op = lock(&self.shared.op_lock)?;
        let mut delay = self.delay.clone();
        self.power(&mut delay).query_status()
    }

    /// Send `bytes` as one frame
    pub fn write(&self, bytes: &[u8]) -> IseResult<()> {
        let _op = lock(&self.shared.op_lock)?;
        let mut delay = self.delay.clone();

        let frame = Frame::new(bytes.to_vec(), self.shared.config.max_payload_bytes)?;
        self.require_powered(&mut delay)?;
        let mut state = self.shared.lock_transport()?;
        self.transport(&mut delay, &mut state).send_frame(&frame)
    }

    /// Block until a frame arrives and copy its payload into `buf`
    ///
    /// Returns the payload length. A frame larger than `buf` is consumed and
    /// reported as `BufferTooSmall`.
    pub fn read(&self, buf: &mut [u8]) -> IseResult<usize> {
        let _op = lock(&self.shared.op_lock)?;
        let mut delay = self.delay.clone();

        self.require_powered(&mut delay)?;
        let frame = self.await_frame(&mut delay, 0, self.shared.config.read_timeout())?;

        let payload = frame.payload();
        if payload.len() > buf.len() {
            return Err(IseError::BufferTooSmall {
                needed: payload.len(),
                available: buf.len(),
            });
        }
        buf[..payload.len()].copy_from_slice(payload);
        Ok(payload.len())
    }

    /// Send a command and wait for its reply
    ///
    /// Returns at most `reply_words` words of the reply payload; the rest of
    /// the reply frame is consumed and dropped.
    pub fn send_command_wait_reply(
        &self,
        command: u32,
        args: &[u8],
        reply_words: usize,
        timeout: Duration,
    ) -> IseResult<Vec<u32>> {
        let _op = lock(&self.shared.op_lock)?;
        let mut delay = self.delay.clone();
        self.exchange(&mut delay, command, args, reply_words, timeout)
    }

    /// Re-arm fault delivery and flush anything buffered meanwhile
    pub fn acknowledge_fault_delivery(&self) -> IseResult<()> {
        let batch = {
            let mut faults = self.shared.lock_faults()?;
            faults.acknowledge();
            faults.drain_if_armed()
        };
        if let Some(batch) = batch {
            self.shared.events.deliver(IseEvent::Faults(batch));
        }
        Ok(())
    }

    /// Discard both FIFOs
    pub fn clear_fifo(&self) -> IseResult<()> {
        let _op = lock(&self.shared.op_lock)?;
        let mut delay = self.delay.clone();
        let mut state = self.shared.lock_transport()?;
        self.transport(&mut delay, &mut state).clear_fifo()
    }

    /// Current FIFO occupancy, read from hardware
    pub fn transport_state(&self) -> IseResult<TransportState> {
        let mut delay = self.delay.clone();
        let mut state = self.shared.lock_transport()?;
        self.transport(&mut delay, &mut state).snapshot()
    }

    /// Copy every MED area from storage back into shared memory
    ///
    /// Only valid while the ISE is not powered on.
    pub fn restore_med(&self) -> IseResult<()> {
        let _op = lock(&self.shared.op_lock)?;
        let mut delay = self.delay.clone();

        if self.power(&mut delay).query_status()? == PowerState::PoweredOn {
            return Err(IseError::DeviceActive);
        }

        let mut storage = self.shared.lock_storage()?;
        for region in MedRegion::ALL {
            let extent = self.shared.config.med.region_extent(region);
            let bytes = storage.load(region, extent.offset, extent.length)?;
            self.shared.memory.write(region, extent.offset, &bytes)?;
        }
        log::info!("MED restored from storage");
        Ok(())
    }

    /// Stop the deferred worker and mask all interrupts
    pub fn detach(mut self) -> IseResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> IseResult<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        if self.tx.send(Deferred::Shutdown).is_err() {
            log::warn!("Deferred worker already stopped");
        }
        if worker.join().is_err() {
            log::error!("Deferred worker panicked");
        }

        // Mask only once the worker can no longer unmask a cause
        let _enable = self.shared.lock_enable()?;
        self.shared.regs.write32(INT_ENABLE, 0)?;
        log::info!("ISE detached");
        Ok(())
    }

    fn power<'a>(&'a self, delay: &'a mut D) -> PowerController<'a, R, D> {
        PowerController::new(&*self.shared.regs, delay, &self.shared.config)
    }

    fn transport<'a>(&'a self, delay: &'a mut D, state: &'a mut TransportState) -> FifoTransport<'a, R, D> {
        FifoTransport::new(&*self.shared.regs, delay, self.shared.config.fifo_policy(), state)
    }

    fn require_powered(&self, delay: &mut D) -> IseResult<()> {
        match self.power(delay).query_status()? {
            PowerState::PoweredOn => Ok(()),
            state => {
                log::warn!("ISE not ready: {:?}", state);
                Err(IseError::PowerNotReady)
            }
        }
    }

    fn wait_for_atr(&self) {
        match self.shared.atr.wait(self.shared.config.reply_timeout()) {
            Ok(true) => {}
            Ok(false) => log::warn!("ISE did not announce itself within {:?}", self.shared.config.reply_timeout()),
            Err(e) => log::warn!("ATR wait failed: {}", e),
        }
    }

    /// Take the oldest data frame numbered `mark` or later
    ///
    /// Frames still sitting in the FIFO are routed first, so one whose
    /// interrupt has not been serviced yet is not waited for. On timeout the
    /// FIFO is cleared so a late reply cannot be mistaken for the answer to
    /// the next request.
    fn await_frame(&self, delay: &mut D, mark: u64, timeout: Duration) -> IseResult<Frame> {
        dispatch::drain_inbound(&self.shared, delay)?;

        match self.shared.inbox.pop_from(mark, timeout)? {
            Some(frame) => frame,
            None => {
                log::warn!("No ISE data within {:?}", timeout);
                let mut state = self.shared.lock_transport()?;
                self.transport(delay, &mut state).clear_fifo()?;
                Err(IseError::Timeout)
            }
        }
    }

    fn exchange(
        &self,
        delay: &mut D,
        command: u32,
        args: &[u8],
        reply_words: usize,
        timeout: Duration,
    ) -> IseResult<Vec<u32>> {
        let mut payload = command::encode(command, &[]);
        payload.extend_from_slice(args);
        let frame = Frame::new(payload, self.shared.config.max_payload_bytes)?;

        self.require_powered(delay)?;

        let mut request = PendingRequest::new(command, reply_words);
        // Anything routed before the mark is unsolicited and stays for read()
        let mark = {
            let mut state = self.shared.lock_transport()?;
            let mut transport = self.transport(delay, &mut state);
            dispatch::route_pending(&self.shared, &mut transport)?;
            let mark = self.shared.inbox.mark()?;
            transport.send_frame(&frame)?;
            mark
        };
        let unread = self.shared.inbox.len();
        if unread > 0 {
            log::debug!("{} unsolicited frames left for the reader", unread);
        }

        let reply = self.await_frame(delay, mark, timeout)?;
        request.complete(&reply.payload_as_words());
        log::debug!("Command {:#x} answered with {} words", request.command(), request.reply().len());

        Ok(request.reply().to_vec())
    }
}

impl<R, D> Drop for IseDevice<R, D>
where
    R: RegisterAccess + 'static,
    D: DelayNs + Clone + Send + 'static,
{
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Detach failed: {}", e);
        }
    }
}
