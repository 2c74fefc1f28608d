//! Frame codec
//!
//! Every message crossing the FIFO is a single header word followed by the
//! payload packed big-endian, four bytes per word:
//!
//! ```text
//! bits[31:16] = MAGIC
//! bits[15:0]  = payload length in bytes
//! followed by ceil(length / 4) payload words
//! ```

use crate::{IseError, IseResult};
use zeroize::Zeroizing;

/// Sentinel distinguishing real frames from stale FIFO contents
pub const MAGIC: u16 = 0x15E5;

/// Largest length the 16-bit header field can carry
pub const MAX_ENCODABLE_LENGTH: usize = u16::MAX as usize;

/// Pack `MAGIC` and `length` into a header word
pub fn encode_header(length: u16) -> u32 {
    ((MAGIC as u32) << 16) | length as u32
}

/// Extract the payload length, rejecting headers without the sentinel
pub fn decode_header(word: u32) -> IseResult<u16> {
    let found = (word >> 16) as u16;
    if found != MAGIC {
        return Err(IseError::InvalidMagic { found });
    }
    Ok(word as u16)
}

/// Decode a header and enforce the payload limit in one step
///
/// An oversized length is as untrustworthy as a bad sentinel, so both
/// come back as errors that demand a FIFO clear.
pub fn decode_header_bounded(word: u32, max_payload: usize) -> IseResult<usize> {
    let length = decode_header(word)? as usize;
    if length > max_payload {
        return Err(IseError::FrameTooLarge {
            length,
            max: max_payload,
        });
    }
    Ok(length)
}

/// Number of FIFO words needed for `length` payload bytes
pub fn payload_words(length: usize) -> usize {
    length.div_ceil(4)
}

/// Pack bytes into big-endian words, zero padding the tail
pub fn pack_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_be_bytes(word)
        })
        .collect()
}

/// Unpack big-endian words, keeping only the first `length` bytes
pub fn unpack_words(words: &[u32], length: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for word in words {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    bytes.truncate(length);
    bytes
}

/// One framed message
///
/// The payload is wiped when the frame is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Zeroizing<Vec<u8>>,
}

impl Frame {
    /// Build a frame, rejecting payloads above `max_payload`
    pub fn new(payload: Vec<u8>, max_payload: usize) -> IseResult<Self> {
        let max = max_payload.min(MAX_ENCODABLE_LENGTH);
        if payload.len() > max {
            return Err(IseError::FrameTooLarge {
                length: payload.len(),
                max,
            });
        }
        Ok(Frame {
            payload: Zeroizing::new(payload),
        })
    }

    /// Build a frame whose payload is a sequence of big-endian words
    pub fn from_payload_words(words: &[u32], max_payload: usize) -> IseResult<Self> {
        let payload = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        Frame::new(payload, max_payload)
    }

    /// Payload length in bytes
    pub fn length(&self) -> u16 {
        self.payload.len() as u16
    }

    /// Payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the frame, returning its payload
    pub fn into_payload(self) -> Zeroizing<Vec<u8>> {
        self.payload
    }

    /// Header word followed by the packed payload
    pub fn to_words(&self) -> Vec<u32> {
        let mut words = Vec::with_capacity(1 + payload_words(self.payload.len()));
        words.push(encode_header(self.length()));
        words.extend(pack_bytes(&self.payload));
        words
    }

    /// Decode a complete frame from a word buffer
    ///
    /// The buffer must hold the header and every payload word it declares.
    pub fn decode(words: &[u32], max_payload: usize) -> IseResult<Self> {
        let (&header, body) = words.split_first().ok_or(IseError::InvalidMagic { found: 0 })?;
        let length = decode_header_bounded(header, max_payload)?;
        let needed = payload_words(length);
        if body.len() < needed {
            return Err(IseError::BufferTooSmall {
                needed: needed * 4,
                available: body.len() * 4,
            });
        }
        Ok(Frame {
            payload: Zeroizing::new(unpack_words(&body[..needed], length)),
        })
    }

    /// Payload as big-endian words (trailing partial word zero padded)
    pub fn payload_as_words(&self) -> Zeroizing<Vec<u32>> {
        Zeroizing::new(pack_bytes(&self.payload))
    }
}
