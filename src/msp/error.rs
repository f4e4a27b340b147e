use thiserror::Error;

use crate::logutil::hex_snippet;

/// Corruption detected while scanning the byte stream for frames.
///
/// None of these mean the link is gone: the framer has already skipped past the
/// offending bytes and the caller keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error(
        "invalid CRC 0x{checksum:02x}, expecting 0x{expected:02x} in cmd {code} with payload {}",
        hex_snippet(.payload, 64)
    )]
    ChecksumMismatch {
        code: u16,
        payload: Vec<u8>,
        checksum: u8,
        expected: u8,
    },

    /// Byte after `$` was neither `M` (v1) nor `X` (v2).
    #[error("unknown MSP frame marker 0x{0:02x}")]
    UnknownMarker(u8),

    /// Byte seen while waiting for a `$` frame start.
    #[error("out of band MSP byte 0x{0:02x}")]
    OutOfBand(u8),

    #[error("invalid MSP direction char 0x{0:02x}")]
    InvalidDirection(u8),

    /// v2 header claims more payload than any board sends.
    #[error("MSP v2 frame {code} claims {len} payload bytes")]
    PayloadTooLarge { code: u16, len: usize },
}

impl ProtocolError {
    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self, ProtocolError::ChecksumMismatch { .. })
    }
}

/// Failure while reading typed values out of a frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// Fewer bytes remain than the requested value needs. Variable-length record
    /// lists use this as their terminator.
    #[error("payload exhausted: needed {needed} bytes, {remaining} remaining")]
    Exhausted { needed: usize, remaining: usize },

    #[error("channel map {0:?} does not map roll/pitch/yaw/throttle onto channels 0-3")]
    InvalidChannelMap([u8; 8]),
}

impl PayloadError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PayloadError::Exhausted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("command {0} does not fit the MSP v1 8-bit command field")]
    CommandOutOfRange(u16),

    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
}
