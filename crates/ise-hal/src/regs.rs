//! ISE register map
//!
//! Offsets are relative to the register block base.

/// Outbound FIFO data (write pushes one word)
pub const OUT_DATA: u32 = 0x000;
/// Outbound FIFO occupancy, see [`fifo_status`]
pub const OUT_STATUS: u32 = 0x004;
/// Inbound FIFO data (read pops one word)
pub const IN_DATA: u32 = 0x008;
/// Inbound FIFO occupancy, see [`fifo_status`]
pub const IN_STATUS: u32 = 0x00C;
/// FIFO control, see [`fifo_ctrl`]
pub const FIFO_CTRL: u32 = 0x010;
/// Raw interrupt causes, write one to clear
pub const INT_STATUS: u32 = 0x014;
/// Interrupt source enable mask
pub const INT_ENABLE: u32 = 0x018;
/// Fault payload, one code per read
pub const FAULT_CODE: u32 = 0x01C;
/// MED error code
pub const MED_ERROR: u32 = 0x020;
/// Class of the frame at the head of the inbound FIFO, see [`frame_kind`]
pub const IN_KIND: u32 = 0x024;

/// FIFO depth in words, both directions
pub const FIFO_DEPTH: u32 = 64;

/// Layout of `OUT_STATUS` / `IN_STATUS`
pub mod fifo_status {
    /// Read pointer field
    pub const RD_PTR_SHIFT: u32 = 0;
    /// Write pointer field
    pub const WR_PTR_SHIFT: u32 = 8;
    /// Occupied word count field
    pub const COUNT_SHIFT: u32 = 16;
    /// Width of each field
    pub const FIELD_MASK: u32 = 0xFF;
}

/// `FIFO_CTRL` bits
pub mod fifo_ctrl {
    /// Discard outbound contents
    pub const CLEAR_OUT: u32 = 1 << 0;
    /// Discard inbound contents
    pub const CLEAR_IN: u32 = 1 << 1;
}

/// `IN_KIND` values
///
/// Latched per frame when its header word is pushed, so frames of every
/// class can share the inbound FIFO in arrival order.
pub mod frame_kind {
    /// Command reply or raw data for the host reader
    pub const DATA: u32 = 0;
    /// ATR announced after power-on or reset
    pub const ATR: u32 = 1;
    /// Rewrite-info notification
    pub const REWRITE_INFO: u32 = 2;
}

/// `INT_STATUS` / `INT_ENABLE` bits
pub mod irq {
    /// Reply or raw data waiting in the inbound FIFO
    pub const DATA_READY: u32 = 1 << 0;
    /// Fault code available
    pub const FAULT: u32 = 1 << 1;
    /// ATR frame waiting in the inbound FIFO
    pub const READY: u32 = 1 << 2;
    /// Rewrite-info frame waiting in the inbound FIFO
    pub const REWRITE_INFO: u32 = 1 << 3;
    /// ISE rejected an outbound transfer
    pub const TRANSFER_ERROR: u32 = 1 << 4;
    /// ISE watchdog expired
    pub const WATCHDOG: u32 = 1 << 5;
    /// MED integrity error
    pub const MED_ERROR: u32 = 1 << 6;
    /// Every defined cause
    pub const ALL: u32 = 0x7F;
}

/// Reset control
pub const PD_RESET: u32 = 0x100;
/// Sleep control
pub const PD_SLEEP: u32 = 0x104;
/// Always-on domain control
pub const PD_AON: u32 = 0x108;
/// Crystal buffer clock gates
pub const PD_CLK: u32 = 0x10C;
/// Oscillator control and calibration
pub const PD_OSC: u32 = 0x110;
/// Analog power control
pub const PD_ANALOG: u32 = 0x114;
/// Power state, see [`pd_status`]
pub const PD_STATUS: u32 = 0x118;

/// `PD_RESET` bits
pub mod pd_reset {
    /// Hold the ISE core in reset
    pub const CORE: u32 = 1 << 0;
    /// Soft reset pulse
    pub const SOFT: u32 = 1 << 1;
    /// Route the soft reset pulse to the full domain instead of the core
    pub const TRIGGER_SEL: u32 = 1 << 2;
    /// Hard reset of the whole domain
    pub const HARD: u32 = 1 << 3;
}

/// `PD_SLEEP` bits
pub mod pd_sleep {
    /// Force the ISE into deep sleep
    pub const FORCE_DEEP_SLEEP: u32 = 1 << 0;
    /// Let the ISE shut itself down when idle
    pub const AUTO_SHUTDOWN: u32 = 1 << 1;
}

/// `PD_AON` bits
pub mod pd_aon {
    /// Force the always-on domain off
    pub const FORCE_PWR_DOWN: u32 = 1 << 0;
}

/// `PD_CLK` bits
pub mod pd_clk {
    /// First auxiliary crystal buffer
    pub const XTAL_BUF0: u32 = 1 << 0;
    /// Second auxiliary crystal buffer
    pub const XTAL_BUF1: u32 = 1 << 1;
}

/// `PD_OSC` bits
pub mod pd_osc {
    /// Force the analog oscillator path off
    pub const FORCE_OFF: u32 = 1 << 0;
    /// Start self-calibration
    pub const CAL_START: u32 = 1 << 1;
    /// Self-calibration finished (read only)
    pub const CAL_DONE: u32 = 1 << 2;
}

/// `PD_ANALOG` bits
pub mod pd_analog {
    /// Power the analog block down
    pub const PWR_DOWN: u32 = 1 << 0;
}

/// `PD_STATUS` field values
pub mod pd_status {
    /// State field
    pub const STATE_MASK: u32 = 0x3;
    /// Powered down
    pub const DOWN: u32 = 0;
    /// Powered on
    pub const ON: u32 = 1;
    /// Any other value means a transition is in progress
    pub const TRANSITIONING: u32 = 2;
}
