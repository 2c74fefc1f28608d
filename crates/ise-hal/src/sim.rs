//! In-process ISE simulation
//!
//! [`SimIse`] implements [`RegisterAccess`] over a register file that behaves
//! like the real block closely enough to drive every controller path: power
//! sequencing with calibration and settle delays, both FIFOs with occupancy
//! reporting, a small command responder, and an interrupt line delivered on
//! its own thread. Storage, shared memory and event collaborators are
//! provided alongside it.

use crate::command;
use crate::regs::*;
use crate::traits::{EventSink, MedMemory, RegisterAccess, StorageSink};
use ise_core::frame::{self, Frame, MAX_ENCODABLE_LENGTH};
use ise_core::{IseError, IseEvent, IseResult, MedLayout, MedRange, MedRegion, MedRewriteRequest};
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// ATR the simulated ISE announces after power-on and soft reset
pub const SIM_ATR: &[u8] = b"ISE-SIM\x01";

/// Status word returned when the simulated ISE refuses power down
pub const SIM_REFUSE_STATUS: u32 = 0x0000_0005;

/// Status word returned for unknown commands
pub const SIM_UNKNOWN_COMMAND: u32 = 0xFFFF_FFFF;

/// Behaviour switches for [`SimIse`]
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Outbound FIFO always reports full
    pub stall_outbound: bool,
    /// `PD_OSC` reads before calibration completes
    pub calibration_polls: u32,
    /// Calibration never completes
    pub fail_calibration: bool,
    /// `PD_STATUS` never leaves the transitioning state
    pub status_stuck: bool,
    /// `PD_STATUS` reads reporting a transition after each power change
    pub status_settle_reads: u32,
    /// Answer `PREPARE_POWER_DOWN` with a refusal
    pub refuse_power_down: bool,
    /// Never send an ATR
    pub silent: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        SimOptions {
            stall_outbound: false,
            calibration_polls: 2,
            fail_calibration: false,
            status_stuck: false,
            status_settle_reads: 1,
            refuse_power_down: false,
            silent: false,
        }
    }
}

struct SimState {
    options: SimOptions,

    pd_reset: u32,
    pd_sleep: u32,
    pd_aon: u32,
    pd_clk: u32,
    pd_osc: u32,
    pd_analog: u32,
    cal_remaining: Option<u32>,
    cal_done: bool,
    self_shutdown: bool,
    powered: bool,
    settle_reads: u32,

    outbound: Vec<u32>,
    outbound_seen: usize,
    inbound: VecDeque<u32>,
    /// `(kind, words left)` per inbound frame, head first
    in_frames: VecDeque<(u32, usize)>,
    in_read_ptr: u32,
    in_write_ptr: u32,
    fifo_clears: usize,

    int_status: u32,
    int_enable: u32,
    faults: VecDeque<u32>,
    med_error: u32,

    power_writes: Vec<(u32, u32)>,
    irq_tx: Option<Sender<()>>,
}

impl SimState {
    fn new(options: SimOptions) -> Self {
        SimState {
            options,
            pd_reset: pd_reset::CORE,
            pd_sleep: pd_sleep::FORCE_DEEP_SLEEP,
            pd_aon: pd_aon::FORCE_PWR_DOWN,
            pd_clk: 0,
            pd_osc: 0,
            pd_analog: pd_analog::PWR_DOWN,
            cal_remaining: None,
            cal_done: false,
            self_shutdown: false,
            powered: false,
            settle_reads: 0,
            outbound: Vec::new(),
            outbound_seen: 0,
            inbound: VecDeque::new(),
            in_frames: VecDeque::new(),
            in_read_ptr: 0,
            in_write_ptr: 0,
            fifo_clears: 0,
            int_status: 0,
            int_enable: 0,
            faults: VecDeque::new(),
            med_error: 0,
            power_writes: Vec::new(),
            irq_tx: None,
        }
    }

    fn is_on(&self) -> bool {
        self.pd_aon & pd_aon::FORCE_PWR_DOWN == 0
            && self.pd_analog & pd_analog::PWR_DOWN == 0
            && self.pd_reset & (pd_reset::CORE | pd_reset::HARD) == 0
            && self.pd_sleep & pd_sleep::FORCE_DEEP_SLEEP == 0
            && self.pd_osc & pd_osc::FORCE_OFF == 0
            && self.pd_clk & (pd_clk::XTAL_BUF0 | pd_clk::XTAL_BUF1) == pd_clk::XTAL_BUF0 | pd_clk::XTAL_BUF1
            && self.cal_done
            && !self.self_shutdown
    }

    fn update_power(&mut self) {
        let on = self.is_on();
        if on == self.powered {
            return;
        }

        self.powered = on;
        self.settle_reads = self.options.status_settle_reads;
        self.clear_fifos();

        if on {
            log::debug!("sim: powered on");
            self.announce();
        } else {
            log::debug!("sim: powered down");
        }
    }

    fn announce(&mut self) {
        if self.options.silent {
            return;
        }
        self.push_frame(SIM_ATR, frame_kind::ATR);
        self.raise(irq::READY);
    }

    fn raise(&mut self, bits: u32) {
        self.int_status |= bits;
        if self.int_enable & bits != 0 {
            self.pulse();
        }
    }

    fn pulse(&self) {
        if let Some(tx) = &self.irq_tx {
            let _ = tx.send(());
        }
    }

    fn clear_fifos(&mut self) {
        self.outbound.clear();
        self.clear_inbound();
    }

    fn clear_inbound(&mut self) {
        self.inbound.clear();
        self.in_frames.clear();
        self.in_read_ptr = 0;
        self.in_write_ptr = 0;
    }

    fn push_words(&mut self, words: &[u32], kind: u32) {
        if words.is_empty() {
            return;
        }
        self.inbound.extend(words.iter().copied());
        self.in_frames.push_back((kind, words.len()));
        self.in_write_ptr = (self.in_write_ptr + words.len() as u32) % FIFO_DEPTH;
    }

    fn push_frame(&mut self, payload: &[u8], kind: u32) {
        let mut words = vec![frame::encode_header(payload.len() as u16)];
        words.extend(frame::pack_bytes(payload));
        self.push_words(&words, kind);
    }

    fn pop_inbound(&mut self) -> u32 {
        let Some(word) = self.inbound.pop_front() else {
            return 0;
        };
        self.in_read_ptr = (self.in_read_ptr + 1) % FIFO_DEPTH;
        if let Some((_, left)) = self.in_frames.front_mut() {
            *left -= 1;
            if *left == 0 {
                self.in_frames.pop_front();
            }
        }
        word
    }

    fn in_kind(&self) -> u32 {
        self.in_frames.front().map_or(frame_kind::DATA, |&(kind, _)| kind)
    }

    fn status_word(count: usize, read_ptr: u32, write_ptr: u32) -> u32 {
        let count = (count as u32).min(FIFO_DEPTH);
        (count << fifo_status::COUNT_SHIFT)
            | (write_ptr << fifo_status::WR_PTR_SHIFT)
            | (read_ptr << fifo_status::RD_PTR_SHIFT)
    }

    fn out_status(&self) -> u32 {
        if self.options.stall_outbound {
            return Self::status_word(FIFO_DEPTH as usize, 0, 0);
        }
        // Words are drained into the frame assembler as soon as they land
        let ptr = self.outbound_seen as u32 % FIFO_DEPTH;
        Self::status_word(0, ptr, ptr)
    }

    fn in_status(&self) -> u32 {
        Self::status_word(self.inbound.len(), self.in_read_ptr, self.in_write_ptr)
    }

    fn accept_outbound(&mut self, word: u32) {
        if self.options.stall_outbound {
            return;
        }
        self.outbound_seen += 1;
        self.outbound.push(word);

        let length = match frame::decode_header(self.outbound[0]) {
            Ok(length) => length as usize,
            Err(_) => {
                self.outbound.remove(0);
                self.raise(irq::TRANSFER_ERROR);
                return;
            }
        };

        let total = 1 + frame::payload_words(length);
        if self.outbound.len() < total {
            return;
        }

        let words: Vec<u32> = self.outbound.drain(..total).collect();
        if !self.powered {
            log::debug!("sim: dropping frame while powered down");
            return;
        }
        if let Ok(request) = Frame::decode(&words, MAX_ENCODABLE_LENGTH) {
            self.respond(request.payload());
        }
    }

    fn respond(&mut self, payload: &[u8]) {
        let id = payload
            .get(..4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .unwrap_or(SIM_UNKNOWN_COMMAND);

        let reply = match id {
            command::PING => payload[4..].to_vec(),
            command::PREPARE_POWER_DOWN => {
                let status = if self.options.refuse_power_down {
                    SIM_REFUSE_STATUS
                } else {
                    command::STATUS_OK
                };
                status.to_be_bytes().to_vec()
            }
            _ => SIM_UNKNOWN_COMMAND.to_be_bytes().to_vec(),
        };

        self.push_frame(&reply, frame_kind::DATA);
        self.raise(irq::DATA_READY);
    }

    fn read_osc(&mut self) -> u32 {
        if let Some(remaining) = self.cal_remaining {
            if !self.options.fail_calibration {
                if remaining == 0 {
                    self.cal_remaining = None;
                    self.cal_done = true;
                } else {
                    self.cal_remaining = Some(remaining - 1);
                }
            }
        }
        self.pd_osc | if self.cal_done { pd_osc::CAL_DONE } else { 0 }
    }

    fn write_osc(&mut self, value: u32) {
        let value = value & !pd_osc::CAL_DONE;
        let started = value & pd_osc::CAL_START != 0 && self.pd_osc & pd_osc::CAL_START == 0;
        if value & pd_osc::FORCE_OFF != 0 {
            self.cal_done = false;
            self.cal_remaining = None;
        }
        if started {
            self.cal_done = false;
            self.cal_remaining = Some(self.options.calibration_polls);
        }
        self.pd_osc = value;
    }

    fn write_reset(&mut self, value: u32) {
        let soft_released = self.pd_reset & pd_reset::SOFT != 0 && value & pd_reset::SOFT == 0;
        if value & pd_reset::CORE != 0 {
            self.self_shutdown = false;
        }
        self.pd_reset = value;

        if soft_released && self.powered && self.is_on() {
            log::debug!("sim: soft reset");
            self.clear_fifos();
            self.announce();
        }
    }

    fn read_status(&mut self) -> u32 {
        if self.options.status_stuck {
            return pd_status::TRANSITIONING;
        }
        if self.settle_reads > 0 {
            self.settle_reads -= 1;
            return pd_status::TRANSITIONING;
        }
        if self.powered {
            pd_status::ON
        } else {
            pd_status::DOWN
        }
    }
}

/// Simulated ISE register block
pub struct SimIse {
    state: Mutex<SimState>,
}

impl SimIse {
    /// Create a powered-down ISE
    pub fn new(options: SimOptions) -> Self {
        SimIse {
            state: Mutex::new(SimState::new(options)),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Deliver interrupt pulses to `handler` on a dedicated thread
    ///
    /// Replaces any previously connected handler.
    pub fn connect_irq<F>(&self, handler: F)
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<()>();
        let spawned = thread::Builder::new()
            .name("ise-sim-irq".into())
            .spawn(move || {
                for () in rx {
                    handler();
                }
            });

        match spawned {
            Ok(_) => {
                let mut state = self.state();
                state.irq_tx = Some(tx);
                if state.int_status & state.int_enable != 0 {
                    state.pulse();
                }
            }
            Err(e) => log::error!("sim: failed to start irq thread: {}", e),
        }
    }

    /// Stop delivering interrupt pulses
    pub fn disconnect_irq(&self) {
        self.state().irq_tx = None;
    }

    /// Queue a fault code and raise the fault cause
    pub fn inject_fault(&self, code: u32) {
        let mut state = self.state();
        state.faults.push_back(code);
        state.raise(irq::FAULT);
    }

    /// Latch a MED error code and raise its cause
    pub fn inject_med_error(&self, code: u32) {
        let mut state = self.state();
        state.med_error = code;
        state.raise(irq::MED_ERROR);
    }

    /// Queue a rewrite-info frame carrying `requests`
    pub fn inject_rewrite(&self, requests: &[MedRewriteRequest]) {
        let payload: Vec<u8> = requests.iter().flat_map(|r| r.to_payload()).collect();
        let mut state = self.state();
        state.push_frame(&payload, frame_kind::REWRITE_INFO);
        state.raise(irq::REWRITE_INFO);
    }

    /// Raise the watchdog cause
    pub fn inject_watchdog(&self) {
        self.state().raise(irq::WATCHDOG);
    }

    /// Raise the transfer-error cause
    pub fn inject_transfer_error(&self) {
        self.state().raise(irq::TRANSFER_ERROR);
    }

    /// Queue raw inbound words and raise data-ready
    pub fn inject_inbound_data(&self, words: &[u32]) {
        let mut state = self.state();
        state.push_words(words, frame_kind::DATA);
        state.raise(irq::DATA_READY);
    }

    /// Queue raw inbound words without raising any cause
    pub fn push_inbound(&self, words: &[u32]) {
        self.state().push_words(words, frame_kind::DATA);
    }

    /// ISE shuts itself down as if it went idle in deep sleep
    pub fn enter_deep_sleep(&self) {
        let mut state = self.state();
        state.self_shutdown = true;
        state.update_power();
    }

    /// Times either FIFO was cleared through `FIFO_CTRL`
    pub fn fifo_clears(&self) -> usize {
        self.state().fifo_clears
    }

    /// Words waiting in the inbound FIFO
    pub fn inbound_len(&self) -> usize {
        self.state().inbound.len()
    }

    /// Words accepted through `OUT_DATA`
    pub fn outbound_words_seen(&self) -> usize {
        self.state().outbound_seen
    }

    /// Every power-domain register write in order, as `(offset, value)`
    pub fn power_write_log(&self) -> Vec<(u32, u32)> {
        self.state().power_writes.clone()
    }

    /// Whether the simulated ISE is powered on, bypassing settle delays
    pub fn is_powered(&self) -> bool {
        self.state().powered
    }
}

impl RegisterAccess for SimIse {
    fn read32(&self, offset: u32) -> IseResult<u32> {
        let mut state = self.state();
        let value = match offset {
            OUT_DATA => 0,
            OUT_STATUS => state.out_status(),
            IN_DATA => state.pop_inbound(),
            IN_STATUS => state.in_status(),
            FIFO_CTRL => 0,
            INT_STATUS => state.int_status,
            INT_ENABLE => state.int_enable,
            FAULT_CODE => {
                let code = state.faults.pop_front().unwrap_or(0);
                if !state.faults.is_empty() {
                    state.raise(irq::FAULT);
                }
                code
            }
            MED_ERROR => state.med_error,
            IN_KIND => state.in_kind(),
            PD_RESET => state.pd_reset,
            PD_SLEEP => state.pd_sleep,
            PD_AON => state.pd_aon,
            PD_CLK => state.pd_clk,
            PD_OSC => state.read_osc(),
            PD_ANALOG => state.pd_analog,
            PD_STATUS => state.read_status(),
            _ => {
                return Err(IseError::Register {
                    offset,
                    reason: "unmapped".into(),
                })
            }
        };
        Ok(value)
    }

    fn write32(&self, offset: u32, value: u32) -> IseResult<()> {
        let mut state = self.state();
        match offset {
            OUT_DATA => state.accept_outbound(value),
            FIFO_CTRL => {
                if value & fifo_ctrl::CLEAR_OUT != 0 {
                    state.outbound.clear();
                }
                if value & fifo_ctrl::CLEAR_IN != 0 {
                    state.clear_inbound();
                }
                if value & (fifo_ctrl::CLEAR_OUT | fifo_ctrl::CLEAR_IN) != 0 {
                    state.fifo_clears += 1;
                }
            }
            INT_STATUS => state.int_status &= !value,
            INT_ENABLE => {
                let unmasked = value & !state.int_enable;
                state.int_enable = value;
                if state.int_status & unmasked != 0 {
                    state.pulse();
                }
            }
            PD_RESET | PD_SLEEP | PD_AON | PD_CLK | PD_OSC | PD_ANALOG => {
                state.power_writes.push((offset, value));
                match offset {
                    PD_RESET => state.write_reset(value),
                    PD_SLEEP => state.pd_sleep = value,
                    PD_AON => state.pd_aon = value,
                    PD_CLK => state.pd_clk = value,
                    PD_OSC => state.write_osc(value),
                    _ => state.pd_analog = value,
                }
                state.update_power();
            }
            _ => {
                return Err(IseError::Register {
                    offset,
                    reason: "unmapped or read-only".into(),
                })
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct StorageInner {
    regions: HashMap<MedRegion, Vec<u8>>,
    writes: Vec<(MedRegion, u32, usize)>,
    fail_writes: bool,
}

/// [`StorageSink`] keeping every region in memory
///
/// Clones share the same contents, so a test can keep one clone for
/// inspection after handing another to the device.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<StorageInner>>,
}

impl MemoryStorage {
    /// Create empty storage
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, StorageInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Every persist call in order, as `(region, offset, length)`
    pub fn writes(&self) -> Vec<(MedRegion, u32, usize)> {
        self.inner().writes.clone()
    }

    /// Current contents of `region`
    pub fn region(&self, region: MedRegion) -> Vec<u8> {
        self.inner().regions.get(&region).cloned().unwrap_or_default()
    }

    /// Make subsequent persist calls fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner().fail_writes = fail;
    }
}

impl StorageSink for MemoryStorage {
    fn persist(&mut self, region: MedRegion, offset: u32, bytes: &[u8]) -> IseResult<()> {
        let mut inner = self.inner();
        if inner.fail_writes {
            return Err(IseError::Storage(format!("{:?} write rejected", region)));
        }

        let start = offset as usize;
        let end = start + bytes.len();
        let data = inner.regions.entry(region).or_default();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        inner.writes.push((region, offset, bytes.len()));
        Ok(())
    }

    fn load(&mut self, region: MedRegion, offset: u32, len: u32) -> IseResult<Vec<u8>> {
        let inner = self.inner();
        let start = offset as usize;
        let end = start + len as usize;
        let mut out = vec![0u8; len as usize];
        if let Some(data) = inner.regions.get(&region) {
            let available = data.len().min(end);
            if available > start {
                out[..available - start].copy_from_slice(&data[start..available]);
            }
        }
        Ok(out)
    }
}

/// [`MedMemory`] backed by one zero-initialised buffer per region
pub struct SharedMedMemory {
    regions: Mutex<HashMap<MedRegion, Vec<u8>>>,
}

impl SharedMedMemory {
    /// Allocate every region at the size `layout` gives it
    pub fn new(layout: &MedLayout) -> Self {
        let regions = MedRegion::ALL
            .into_iter()
            .map(|region| (region, vec![0u8; layout.region_extent(region).end() as usize]))
            .collect();
        SharedMedMemory {
            regions: Mutex::new(regions),
        }
    }

    fn regions(&self) -> MutexGuard<'_, HashMap<MedRegion, Vec<u8>>> {
        match self.regions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MedMemory for SharedMedMemory {
    fn read(&self, region: MedRegion, range: MedRange) -> IseResult<Vec<u8>> {
        let regions = self.regions();
        regions
            .get(&region)
            .and_then(|data| data.get(range.offset as usize..range.end() as usize))
            .map(<[u8]>::to_vec)
            .ok_or(IseError::OutOfRange {
                offset: range.offset,
                length: range.length,
            })
    }

    fn write(&self, region: MedRegion, offset: u32, bytes: &[u8]) -> IseResult<()> {
        let mut regions = self.regions();
        let start = offset as usize;
        regions
            .get_mut(&region)
            .and_then(|data| data.get_mut(start..start + bytes.len()))
            .map(|dst| dst.copy_from_slice(bytes))
            .ok_or(IseError::OutOfRange {
                offset,
                length: bytes.len() as u32,
            })
    }
}

/// [`EventSink`] recording every event for later inspection
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<IseEvent>>,
    cond: Condvar,
}

impl RecordingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<IseEvent>> {
        match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Events delivered so far
    pub fn events(&self) -> Vec<IseEvent> {
        self.guard().clone()
    }

    /// Wait until an event matching `pred` has been delivered
    ///
    /// Also matches events delivered before the call.
    pub fn wait_for<P>(&self, pred: P, timeout: Duration) -> Option<IseEvent>
    where
        P: Fn(&IseEvent) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut events = self.guard();
        loop {
            if let Some(event) = events.iter().find(|e| pred(e)) {
                return Some(event.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            events = match self.cond.wait_timeout(events, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl EventSink for RecordingSink {
    fn deliver(&self, event: IseEvent) {
        log::debug!("sim: event {:?}", event);
        self.guard().push(event);
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_powered_down() {
        let sim = SimIse::new(SimOptions::default());
        assert!(!sim.is_powered());
        assert_eq!(sim.read32(PD_STATUS).unwrap(), pd_status::DOWN);
    }

    #[test]
    fn test_unmapped_register() {
        let sim = SimIse::new(SimOptions::default());
        assert!(matches!(sim.read32(0x400), Err(IseError::Register { offset: 0x400, .. })));
        assert!(sim.write32(INT_STATUS + 0x1000, 0).is_err());
    }

    #[test]
    fn test_inbound_status_tracks_pointers() {
        let sim = SimIse::new(SimOptions::default());
        sim.push_inbound(&[1, 2, 3]);
        assert_eq!(sim.read32(IN_DATA).unwrap(), 1);

        let status = sim.read32(IN_STATUS).unwrap();
        assert_eq!((status >> fifo_status::COUNT_SHIFT) & fifo_status::FIELD_MASK, 2);
        assert_eq!((status >> fifo_status::RD_PTR_SHIFT) & fifo_status::FIELD_MASK, 1);
        assert_eq!((status >> fifo_status::WR_PTR_SHIFT) & fifo_status::FIELD_MASK, 3);
    }

    #[test]
    fn test_inbound_kind_follows_head_frame() {
        let sim = SimIse::new(SimOptions::default());
        sim.push_inbound(&[frame::encode_header(4), 0xAAAA_AAAA]);
        sim.inject_rewrite(&[MedRewriteRequest { offset: 0, length: 4 }]);

        assert_eq!(sim.read32(IN_KIND).unwrap(), frame_kind::DATA);
        sim.read32(IN_DATA).unwrap();
        sim.read32(IN_DATA).unwrap();
        assert_eq!(sim.read32(IN_KIND).unwrap(), frame_kind::REWRITE_INFO);

        sim.write32(FIFO_CTRL, fifo_ctrl::CLEAR_IN).unwrap();
        assert_eq!(sim.read32(IN_KIND).unwrap(), frame_kind::DATA);
        assert_eq!(sim.inbound_len(), 0);
    }

    #[test]
    fn test_fault_codes_queue() {
        let sim = SimIse::new(SimOptions::default());
        sim.inject_fault(5);
        sim.inject_fault(7);
        sim.write32(INT_STATUS, irq::FAULT).unwrap();

        assert_eq!(sim.read32(FAULT_CODE).unwrap(), 5);
        assert_ne!(sim.read32(INT_STATUS).unwrap() & irq::FAULT, 0);
        assert_eq!(sim.read32(FAULT_CODE).unwrap(), 7);
    }

    #[test]
    fn test_bad_outbound_magic_raises_transfer_error() {
        let sim = SimIse::new(SimOptions::default());
        sim.write32(OUT_DATA, 0xDEAD_BEEF).unwrap();
        assert_ne!(sim.read32(INT_STATUS).unwrap() & irq::TRANSFER_ERROR, 0);
    }

    #[test]
    fn test_storage_round_trip() {
        let mut storage = MemoryStorage::new();
        storage.persist(MedRegion::Level3, 32, &[1, 2, 3]).unwrap();

        assert_eq!(storage.load(MedRegion::Level3, 32, 4).unwrap(), vec![1, 2, 3, 0]);
        assert_eq!(storage.writes(), vec![(MedRegion::Level3, 32, 3)]);
    }

    #[test]
    fn test_shared_memory_bounds() {
        let layout = MedLayout::with_area_size(0x10_0000);
        let memory = SharedMedMemory::new(&layout);
        memory.write(MedRegion::Counter, 0, &[9; 4]).unwrap();

        let range = MedRange { offset: 0, length: 4 };
        assert_eq!(memory.read(MedRegion::Counter, range).unwrap(), vec![9; 4]);

        let beyond = MedRange { offset: 60, length: 8 };
        assert!(memory.read(MedRegion::Counter, beyond).is_err());
    }

    #[test]
    fn test_recording_sink_wait() {
        let sink = RecordingSink::new();
        sink.deliver(IseEvent::Watchdog);
        assert_eq!(
            sink.wait_for(|e| matches!(e, IseEvent::Watchdog), Duration::from_millis(10)),
            Some(IseEvent::Watchdog)
        );
        assert!(sink
            .wait_for(|e| matches!(e, IseEvent::TransferError), Duration::from_millis(10))
            .is_none());
    }
}
