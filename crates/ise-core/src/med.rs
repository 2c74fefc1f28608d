//! MED rewrite planning
//!
//! The MED is kept in host memory as a primary data shadow plus three levels
//! of integrity metadata. When the ISE reports that a window of logical data
//! changed, the host has to re-persist exactly the byte ranges that cover the
//! change at every level. Planning is pure; persistence belongs to the caller.
//!
//! Granularities:
//! - Level 1: one fixed 512-byte region, always rewritten in full
//! - Level 2: one 1 KiB slot per 512 KiB data block
//! - Level 3: one 32-byte slot per 4 KiB data block
//! - Data: 32-byte aligned, ciphertext and hash interleaved (twice the size)

use crate::{IseError, IseResult};
use serde::{Deserialize, Serialize};

/// Size of the anti-rollback counter region
pub const COUNTER_SIZE: u32 = 64;
/// Size of the level-1 hash region
pub const LEVEL1_SIZE: u32 = 512;
/// Data bytes covered by one level-2 slot
pub const LEVEL2_BLOCK_SIZE: u32 = 512 * 1024;
/// Size of one level-2 slot
pub const LEVEL2_SLOT_SIZE: u32 = 1024;
/// Data bytes covered by one level-3 slot
pub const LEVEL3_BLOCK_SIZE: u32 = 4 * 1024;
/// Size of one level-3 slot
pub const LEVEL3_SLOT_SIZE: u32 = 32;
/// Granularity of the data shadow
pub const DATA_ALIGN: u32 = 32;

/// Largest secure window whose data shadow still fits a 32-bit offset
pub const MAX_AREA_SIZE: u32 = 0x4000_0000;

/// Storage areas making up the MED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MedRegion {
    /// Anti-rollback counter
    Counter,
    /// Level-1 hash
    Level1,
    /// Level-2 hash table
    Level2,
    /// Level-3 hash table
    Level3,
    /// Ciphertext and hash shadow
    Data,
}

impl MedRegion {
    /// Every region, counter first
    pub const ALL: [MedRegion; 5] = [
        MedRegion::Counter,
        MedRegion::Level1,
        MedRegion::Level2,
        MedRegion::Level3,
        MedRegion::Data,
    ];
}

/// Byte range inside one storage area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedRange {
    /// Start offset within the area
    pub offset: u32,
    /// Length in bytes
    pub length: u32,
}

impl MedRange {
    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.length as u64
    }

    /// Check if `other` lies entirely inside this range
    pub fn contains(&self, other: &MedRange) -> bool {
        other.offset >= self.offset && other.end() <= self.end()
    }
}

/// Change notification reported by the ISE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedRewriteRequest {
    /// Absolute offset of the changed data
    pub offset: u32,
    /// Length of the changed data
    pub length: u32,
}

impl MedRewriteRequest {
    /// Parse big-endian `(offset, length)` pairs from a rewrite-info payload
    ///
    /// Trailing bytes that do not form a full pair are ignored; the second
    /// value reports how many there were.
    pub fn parse_payload(payload: &[u8]) -> (Vec<MedRewriteRequest>, usize) {
        let chunks = payload.chunks_exact(8);
        let trailing = chunks.remainder().len();
        let requests = chunks
            .map(|pair| MedRewriteRequest {
                offset: u32::from_be_bytes([pair[0], pair[1], pair[2], pair[3]]),
                length: u32::from_be_bytes([pair[4], pair[5], pair[6], pair[7]]),
            })
            .collect();
        (requests, trailing)
    }

    /// Encode as a rewrite-info payload pair
    pub fn to_payload(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.offset.to_be_bytes());
        out[4..].copy_from_slice(&self.length.to_be_bytes());
        out
    }
}

/// Ranges to re-persist for one rewrite request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedRewritePlan {
    /// Range in the data shadow
    pub data_range: MedRange,
    /// Range in the level-1 area
    pub level1_range: MedRange,
    /// Range in the level-2 area
    pub level2_range: MedRange,
    /// Range in the level-3 area
    pub level3_range: MedRange,
}

impl MedRewritePlan {
    /// Ranges in persistence order, leaves before roots
    pub fn ranges(&self) -> [(MedRegion, MedRange); 4] {
        [
            (MedRegion::Data, self.data_range),
            (MedRegion::Level3, self.level3_range),
            (MedRegion::Level2, self.level2_range),
            (MedRegion::Level1, self.level1_range),
        ]
    }
}

/// Placement of the secure window and the MED storage areas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedLayout {
    /// Absolute start of the secure data window
    pub window_base: u32,
    /// Size of the secure data window
    pub area_size: u32,
    /// Offset of the counter inside its area
    pub counter_base: u32,
    /// Offset of the level-1 hash inside its area
    pub level1_base: u32,
    /// Offset of the level-2 table inside its area
    pub level2_base: u32,
    /// Offset of the level-3 table inside its area
    pub level3_base: u32,
    /// Offset of the data shadow inside its area
    pub data_base: u32,
}

impl Default for MedLayout {
    fn default() -> Self {
        MedLayout::with_area_size(0x0200_0000)
    }
}

impl MedLayout {
    /// Layout with a zero-based window of `area_size` bytes
    pub fn with_area_size(area_size: u32) -> Self {
        MedLayout {
            window_base: 0,
            area_size,
            counter_base: 0,
            level1_base: 0,
            level2_base: 0,
            level3_base: 0,
            data_base: 0,
        }
    }

    /// Extent of `region` inside its storage area
    pub fn region_extent(&self, region: MedRegion) -> MedRange {
        let area = self.area_size as u64;
        let (offset, length) = match region {
            MedRegion::Counter => (self.counter_base, COUNTER_SIZE as u64),
            MedRegion::Level1 => (self.level1_base, LEVEL1_SIZE as u64),
            MedRegion::Level2 => (
                self.level2_base,
                area.div_ceil(LEVEL2_BLOCK_SIZE as u64) * LEVEL2_SLOT_SIZE as u64,
            ),
            MedRegion::Level3 => (
                self.level3_base,
                area.div_ceil(LEVEL3_BLOCK_SIZE as u64) * LEVEL3_SLOT_SIZE as u64,
            ),
            MedRegion::Data => (
                self.data_base,
                2 * area.div_ceil(DATA_ALIGN as u64) * DATA_ALIGN as u64,
            ),
        };
        MedRange {
            offset,
            length: length as u32,
        }
    }

    /// Check that every area fits a 32-bit offset
    pub fn validate(&self) -> IseResult<()> {
        if self.area_size == 0 || self.area_size > MAX_AREA_SIZE {
            return Err(IseError::InvalidConfig(format!(
                "MED area size {:#x} outside 1..={:#x}",
                self.area_size, MAX_AREA_SIZE
            )));
        }
        if self.window_base as u64 + self.area_size as u64 > u32::MAX as u64 + 1 {
            return Err(IseError::InvalidConfig("MED window wraps the address space".into()));
        }
        for region in MedRegion::ALL {
            if self.region_extent(region).end() > u32::MAX as u64 {
                return Err(IseError::InvalidConfig(format!("{:?} area exceeds 32 bits", region)));
            }
        }
        Ok(())
    }
}

/// Compute the ranges to re-persist after the ISE rewrote `request`
///
/// `request` must lie entirely inside the secure window; anything else is
/// rejected rather than narrowed.
pub fn plan(request: MedRewriteRequest, layout: &MedLayout) -> IseResult<MedRewritePlan> {
    let out_of_range = || IseError::OutOfRange {
        offset: request.offset,
        length: request.length,
    };

    let base = layout.window_base as u64;
    let size = layout.area_size as u64;
    let start = request.offset as u64;
    let end = start + request.length as u64;

    if start < base || start >= base + size || end > base + size {
        return Err(out_of_range());
    }

    let rel_start = start - base;
    let rel_end = end - base;

    let level1_range = MedRange {
        offset: layout.level1_base,
        length: LEVEL1_SIZE,
    };

    let level2_range = covering_slots(
        rel_start,
        rel_end,
        size,
        LEVEL2_BLOCK_SIZE,
        LEVEL2_SLOT_SIZE,
        layout.level2_base,
    )
    .ok_or_else(out_of_range)?;

    let level3_range = covering_slots(
        rel_start,
        rel_end,
        size,
        LEVEL3_BLOCK_SIZE,
        LEVEL3_SLOT_SIZE,
        layout.level3_base,
    )
    .ok_or_else(out_of_range)?;

    let align = DATA_ALIGN as u64;
    let aligned_start = rel_start / align * align;
    let aligned_end = rel_end.div_ceil(align) * align;
    let data_range = to_range(
        layout.data_base as u64 + 2 * aligned_start,
        2 * (aligned_end - aligned_start),
    )
    .ok_or_else(out_of_range)?;

    Ok(MedRewritePlan {
        data_range,
        level1_range,
        level2_range,
        level3_range,
    })
}

/// Metadata slots covering the closed span `[start, end]`
///
/// An address exactly on a block boundary belongs to both neighbouring
/// blocks. The last slot is capped at the end of the window.
fn covering_slots(
    start: u64,
    end: u64,
    area_size: u64,
    block: u32,
    slot: u32,
    base: u32,
) -> Option<MedRange> {
    let block = block as u64;
    let slot = slot as u64;
    let slots = area_size.div_ceil(block);

    let first = start.saturating_sub(1) / block;
    let last = (end / block).min(slots - 1);

    to_range(base as u64 + first * slot, (last - first + 1) * slot)
}

fn to_range(offset: u64, length: u64) -> Option<MedRange> {
    Some(MedRange {
        offset: u32::try_from(offset).ok()?,
        length: u32::try_from(length).ok()?,
    })
}
