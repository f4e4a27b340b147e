use super::error::PayloadError;
use super::value::MspDecode;

/// Wire format variant a frame was carried in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    V1,
    V2,
}

impl Version {
    /// Byte following `$` on the wire.
    pub fn marker(self) -> u8 {
        match self {
            Version::V1 => b'M',
            Version::V2 => b'X',
        }
    }
}

/// Direction byte of a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// `<`, host to board.
    ToBoard,
    /// `>`, board to host.
    FromBoard,
    /// `!`, the board rejected the command.
    Error,
}

impl Direction {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'<' => Some(Direction::ToBoard),
            b'>' => Some(Direction::FromBoard),
            b'!' => Some(Direction::Error),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Direction::ToBoard => b'<',
            Direction::FromBoard => b'>',
            Direction::Error => b'!',
        }
    }
}

/// One decoded MSP message.
///
/// The payload is immutable; `read` advances an internal cursor so handlers can
/// pull typed fields off the front in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u16,
    pub direction: Direction,
    pub version: Version,
    payload: Vec<u8>,
    pos: usize,
}

impl Frame {
    pub fn new(code: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            direction: Direction::FromBoard,
            version: Version::V1,
            payload: payload.into(),
            pos: 0,
        }
    }

    pub(crate) fn with_header(
        code: u16,
        direction: Direction,
        version: Version,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            code,
            direction,
            version,
            payload,
            pos: 0,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn bytes_remaining(&self) -> usize {
        self.payload.len() - self.pos
    }

    /// Decode the next value of type `T` and advance the cursor past it.
    pub fn read<T: MspDecode>(&mut self) -> Result<T, PayloadError> {
        T::decode(self)
    }

    /// Take the next `n` raw bytes.
    pub fn take(&mut self, n: usize) -> Result<&[u8], PayloadError> {
        let remaining = self.bytes_remaining();
        if remaining < n {
            return Err(PayloadError::Exhausted {
                needed: n,
                remaining,
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.payload[start..self.pos])
    }

    /// Take everything after the cursor.
    pub fn rest(&mut self) -> &[u8] {
        let start = self.pos;
        self.pos = self.payload.len();
        &self.payload[start..]
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }
}
