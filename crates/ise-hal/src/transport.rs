//! FIFO transport
//!
//! Moves 32-bit words through the outbound and inbound FIFOs. Occupancy is
//! re-read from the status registers before every decision; the hardware is
//! authoritative and the local [`TransportState`] is only a mirror of the
//! last read.
//!
//! A stalled FIFO, a bad header or an oversized frame all leave the FIFO in
//! an unknown state, so each of them escalates to [`FifoTransport::clear_fifo`]
//! before the error is returned.

use crate::poll::poll_until;
use crate::regs::{fifo_ctrl, fifo_status, FIFO_CTRL, FIFO_DEPTH, IN_DATA, IN_STATUS, OUT_DATA, OUT_STATUS};
use crate::traits::RegisterAccess;
use embedded_hal::delay::DelayNs;
use ise_core::frame::{self, Frame};
use ise_core::{IseResult, PollPolicy};
use zeroize::Zeroizing;

/// Decoded FIFO status register
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FifoOccupancy {
    /// Hardware read pointer
    pub read_ptr: u8,
    /// Hardware write pointer
    pub write_ptr: u8,
    /// Words currently held
    pub count: u8,
}

impl FifoOccupancy {
    /// Decode a raw `OUT_STATUS` / `IN_STATUS` value
    pub fn from_status(word: u32) -> Self {
        let field = |shift: u32| ((word >> shift) & fifo_status::FIELD_MASK) as u8;
        FifoOccupancy {
            read_ptr: field(fifo_status::RD_PTR_SHIFT),
            write_ptr: field(fifo_status::WR_PTR_SHIFT),
            count: field(fifo_status::COUNT_SHIFT),
        }
    }

    /// Free slots, assuming this is the outbound FIFO
    pub fn free(&self) -> u32 {
        FIFO_DEPTH.saturating_sub(self.count as u32)
    }
}

/// Last observed occupancy of both FIFOs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransportState {
    /// Host to ISE
    pub outbound: FifoOccupancy,
    /// ISE to host
    pub inbound: FifoOccupancy,
}

/// Transport view over a register block for one operation
pub struct FifoTransport<'a, R: RegisterAccess + ?Sized, D: DelayNs> {
    regs: &'a R,
    delay: &'a mut D,
    policy: PollPolicy,
    state: &'a mut TransportState,
}

impl<'a, R: RegisterAccess + ?Sized, D: DelayNs> FifoTransport<'a, R, D> {
    /// Create a transport; `policy` bounds how long a FIFO may stall
    pub fn new(regs: &'a R, delay: &'a mut D, policy: PollPolicy, state: &'a mut TransportState) -> Self {
        FifoTransport {
            regs,
            delay,
            policy,
            state,
        }
    }

    /// Push `words` into the outbound FIFO
    pub fn write_words(&mut self, words: &[u32]) -> IseResult<()> {
        let mut remaining = words;
        while !remaining.is_empty() {
            let free = self.wait_outbound_space()?;
            let batch = (free as usize).min(remaining.len());
            for &word in &remaining[..batch] {
                self.regs.write32(OUT_DATA, word)?;
            }
            remaining = &remaining[batch..];
        }
        Ok(())
    }

    /// Pop `count` words from the inbound FIFO
    pub fn read_words(&mut self, count: usize) -> IseResult<Vec<u32>> {
        let mut words = vec![0u32; count];
        self.read_into(&mut words)?;
        Ok(words)
    }

    /// Fill `buf` from the inbound FIFO
    pub fn read_into(&mut self, buf: &mut [u32]) -> IseResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let available = self.wait_inbound_data()?;
            let batch = (available as usize).min(buf.len() - filled);
            for slot in &mut buf[filled..filled + batch] {
                *slot = self.regs.read32(IN_DATA)?;
            }
            filled += batch;
        }
        Ok(())
    }

    /// Send one frame
    pub fn send_frame(&mut self, frame: &Frame) -> IseResult<()> {
        let words = Zeroizing::new(frame.to_words());
        log::debug!("TX frame: {} bytes, {} words", frame.length(), words.len());
        self.write_words(&words)
    }

    /// Receive one frame, rejecting payloads above `max_payload`
    ///
    /// A corrupt header is never partially consumed: the FIFO is cleared and
    /// the error returned.
    pub fn recv_frame(&mut self, max_payload: usize) -> IseResult<Frame> {
        let mut header = [0u32; 1];
        self.read_into(&mut header)?;

        let decoded = frame::decode_header_bounded(header[0], max_payload);
        let length = self.escalate(decoded)?;

        let mut body = Zeroizing::new(vec![0u32; frame::payload_words(length)]);
        self.read_into(&mut body)?;
        log::debug!("RX frame: {} bytes", length);

        Frame::new(frame::unpack_words(&body, length), max_payload)
    }

    /// Discard both FIFOs and forget the mirrored occupancy
    pub fn clear_fifo(&mut self) -> IseResult<()> {
        self.regs.write32(FIFO_CTRL, fifo_ctrl::CLEAR_OUT | fifo_ctrl::CLEAR_IN)?;
        *self.state = TransportState::default();
        log::debug!("FIFO cleared");
        Ok(())
    }

    /// Re-read both status registers
    pub fn snapshot(&mut self) -> IseResult<TransportState> {
        self.state.outbound = FifoOccupancy::from_status(self.regs.read32(OUT_STATUS)?);
        self.state.inbound = FifoOccupancy::from_status(self.regs.read32(IN_STATUS)?);
        Ok(*self.state)
    }

    fn wait_outbound_space(&mut self) -> IseResult<u32> {
        let regs = self.regs;
        let state = &mut *self.state;
        let result = poll_until(&mut *self.delay, self.policy, || {
            let occupancy = FifoOccupancy::from_status(regs.read32(OUT_STATUS)?);
            state.outbound = occupancy;
            log::trace!("outbound {:?}", occupancy);
            let free = occupancy.free();
            Ok((free > 0).then_some(free))
        });
        self.escalate(result)
    }

    fn wait_inbound_data(&mut self) -> IseResult<u32> {
        let regs = self.regs;
        let state = &mut *self.state;
        let result = poll_until(&mut *self.delay, self.policy, || {
            let occupancy = FifoOccupancy::from_status(regs.read32(IN_STATUS)?);
            state.inbound = occupancy;
            log::trace!("inbound {:?}", occupancy);
            let count = occupancy.count as u32;
            Ok((count > 0).then_some(count))
        });
        self.escalate(result)
    }

    fn escalate<T>(&mut self, result: IseResult<T>) -> IseResult<T> {
        if let Err(err) = &result {
            if err.requires_fifo_clear() {
                log::warn!("FIFO transfer failed ({}), clearing FIFO", err);
                if let Err(clear_err) = self.clear_fifo() {
                    log::error!("FIFO clear failed: {}", clear_err);
                }
            }
        }
        result
    }
}
