//! MSP wire framing.
//!
//! ```text
//! v1: '$' 'M' dir len:u8 cmd:u8 payload[len] xor
//! v2: '$' 'X' dir flags:u8 cmd:u16le len:u16le payload[len] crc8_dvb_s2
//! ```
//!
//! [`MspFramer`] is an incremental decoder that can be fed arbitrary chunks off
//! the serial port and yields whole frames as they complete. Corrupt input is
//! reported as a [`ProtocolError`] after the offending bytes have been dropped,
//! so scanning simply resumes with the next call.
use std::io::Read;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use super::crc::{crc8_dvb_s2, xor_checksum};
use super::error::{EncodeError, ProtocolError};
use super::frame::{Direction, Frame, Version};

const V1_HEADER_LEN: usize = 5;
const V2_HEADER_LEN: usize = 8;
pub const V1_MAX_PAYLOAD: usize = u8::MAX as usize;
pub const V2_MAX_PAYLOAD: usize = u16::MAX as usize;
/// Largest v2 payload the decoder accepts. Firmware receive buffers are far
/// smaller, so a bigger length field means a corrupt header.
pub const V2_MAX_DECODE_PAYLOAD: usize = 4096;

/// Encode a host-to-board frame.
pub fn encode(version: Version, code: u16, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    encode_frame(version, Direction::ToBoard, code, payload)
}

pub fn encode_v1(code: u16, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    encode(Version::V1, code, payload)
}

pub fn encode_v2(flags: u8, code: u16, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    encode_v2_frame(Direction::ToBoard, flags, code, payload)
}

/// Encode a frame with an explicit direction byte. Board-side replies are built
/// this way in tests and simulators.
pub fn encode_frame(
    version: Version,
    direction: Direction,
    code: u16,
    payload: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    match version {
        Version::V1 => {
            let cmd = u8::try_from(code).map_err(|_| EncodeError::CommandOutOfRange(code))?;
            if payload.len() > V1_MAX_PAYLOAD {
                return Err(EncodeError::PayloadTooLarge {
                    len: payload.len(),
                    max: V1_MAX_PAYLOAD,
                });
            }
            let mut buf = BytesMut::with_capacity(V1_HEADER_LEN + payload.len() + 1);
            buf.put_slice(&[b'$', b'M', direction.as_byte()]);
            buf.put_u8(payload.len() as u8);
            buf.put_u8(cmd);
            buf.put_slice(payload);
            let checksum = xor_checksum(&buf[3..]);
            buf.put_u8(checksum);
            Ok(buf.to_vec())
        }
        Version::V2 => encode_v2_frame(direction, 0, code, payload),
    }
}

fn encode_v2_frame(
    direction: Direction,
    flags: u8,
    code: u16,
    payload: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    if payload.len() > V2_MAX_PAYLOAD {
        return Err(EncodeError::PayloadTooLarge {
            len: payload.len(),
            max: V2_MAX_PAYLOAD,
        });
    }
    let mut buf = BytesMut::with_capacity(V2_HEADER_LEN + payload.len() + 1);
    buf.put_slice(&[b'$', b'X', direction.as_byte()]);
    buf.put_u8(flags);
    buf.put_u16_le(code);
    buf.put_u16_le(payload.len() as u16);
    buf.put_slice(payload);
    let checksum = crc8_dvb_s2(&buf[3..]);
    buf.put_u8(checksum);
    Ok(buf.to_vec())
}

/// Incremental MSP v1/v2 frame decoder.
pub struct MspFramer {
    buf: BytesMut,
}

impl MspFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Drop anything buffered, e.g. after the link was lost mid-frame.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame or corruption event, or `None` if more bytes are
    /// needed.
    pub fn next_frame(&mut self) -> Option<Result<Frame, ProtocolError>> {
        let first = *self.buf.first()?;
        if first != b'$' {
            self.buf.advance(1);
            return Some(Err(ProtocolError::OutOfBand(first)));
        }
        let marker = *self.buf.get(1)?;
        match marker {
            b'M' => self.next_v1(),
            b'X' => self.next_v2(),
            other => {
                // Only the '$' is dropped; the marker byte may start the next frame.
                self.buf.advance(1);
                Some(Err(ProtocolError::UnknownMarker(other)))
            }
        }
    }

    fn direction(&mut self) -> Option<Result<Direction, ProtocolError>> {
        let raw = *self.buf.get(2)?;
        match Direction::from_byte(raw) {
            Some(d) => Some(Ok(d)),
            None => {
                self.buf.advance(1);
                Some(Err(ProtocolError::InvalidDirection(raw)))
            }
        }
    }

    fn next_v1(&mut self) -> Option<Result<Frame, ProtocolError>> {
        let direction = match self.direction()? {
            Ok(d) => d,
            Err(e) => return Some(Err(e)),
        };
        if self.buf.len() < V1_HEADER_LEN {
            return None;
        }
        let len = self.buf[3] as usize;
        let code = self.buf[4] as u16;
        let total = V1_HEADER_LEN + len + 1;
        if self.buf.len() < total {
            return None;
        }
        let expected = xor_checksum(&self.buf[3..V1_HEADER_LEN + len]);
        let checksum = self.buf[total - 1];
        let frame = self.buf.split_to(total);
        let payload = frame[V1_HEADER_LEN..V1_HEADER_LEN + len].to_vec();
        if checksum != expected {
            return Some(Err(ProtocolError::ChecksumMismatch {
                code,
                payload,
                checksum,
                expected,
            }));
        }
        Some(Ok(Frame::with_header(code, direction, Version::V1, payload)))
    }

    fn next_v2(&mut self) -> Option<Result<Frame, ProtocolError>> {
        let direction = match self.direction()? {
            Ok(d) => d,
            Err(e) => return Some(Err(e)),
        };
        if self.buf.len() < V2_HEADER_LEN {
            return None;
        }
        let code = u16::from_le_bytes([self.buf[4], self.buf[5]]);
        let len = u16::from_le_bytes([self.buf[6], self.buf[7]]) as usize;
        if len > V2_MAX_DECODE_PAYLOAD {
            self.buf.advance(1);
            return Some(Err(ProtocolError::PayloadTooLarge { code, len }));
        }
        let total = V2_HEADER_LEN + len + 1;
        if self.buf.len() < total {
            return None;
        }
        let expected = crc8_dvb_s2(&self.buf[3..V2_HEADER_LEN + len]);
        let checksum = self.buf[total - 1];
        let frame = self.buf.split_to(total);
        let payload = frame[V2_HEADER_LEN..V2_HEADER_LEN + len].to_vec();
        if checksum != expected {
            return Some(Err(ProtocolError::ChecksumMismatch {
                code,
                payload,
                checksum,
                expected,
            }));
        }
        Some(Ok(Frame::with_header(code, direction, Version::V2, payload)))
    }
}

impl Default for MspFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum ReadFrameError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Blocking decode of exactly one frame (or one corruption event) from a byte
/// source. Reads one byte at a time so nothing past the frame is consumed.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Frame, ReadFrameError> {
    let mut framer = MspFramer::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        framer.push(&byte);
        if let Some(result) = framer.next_frame() {
            return Ok(result?);
        }
    }
}
