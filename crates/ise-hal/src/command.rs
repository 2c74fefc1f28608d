//! Command identifiers
//!
//! A command frame's first payload word is the command id; arguments follow.

/// Echo the payload back
pub const PING: u32 = 0x01;
/// Ask the ISE to quiesce before power removal; replies with one status word
pub const PREPARE_POWER_DOWN: u32 = 0x10;

/// Status word meaning the ISE accepted the request
pub const STATUS_OK: u32 = 0;

/// Encode a command id followed by argument words
pub fn encode(id: u32, args: &[u32]) -> Vec<u8> {
    std::iter::once(id)
        .chain(args.iter().copied())
        .flat_map(u32::to_be_bytes)
        .collect()
}
