use byteorder::{BigEndian, ByteOrder};

use crate::ebml;
use crate::error::{Result, WebmError};

/// SimpleBlock flag marking a keyframe.
pub const FLAG_KEYFRAME: u8 = 0x80;
/// Lacing bits shared by Block and SimpleBlock.
pub const FLAG_LACING_MASK: u8 = 0x06;

/// Fixed part of a Block or SimpleBlock body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    pub track: u64,
    /// Timecode relative to the enclosing cluster, in ticks.
    pub relative_timecode: i16,
    pub flags: u8,
    /// Offset of the frame payload within the body.
    pub payload_offset: usize,
}

impl BlockHeader {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let (track, track_len, _) = ebml::read_vint(body)?.ok_or(WebmError::TruncatedBlock)?;
        let rest = &body[track_len..];
        if rest.len() < 3 {
            return Err(WebmError::TruncatedBlock);
        }
        let header = BlockHeader {
            track,
            relative_timecode: BigEndian::read_i16(rest),
            flags: rest[2],
            payload_offset: track_len + 3,
        };
        if header.flags & FLAG_LACING_MASK != 0 {
            return Err(WebmError::LacingNotSupported(track));
        }
        Ok(header)
    }
}
