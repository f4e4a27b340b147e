//! Typed payload (de)serialization.
//!
//! Every shape that can travel in an MSP payload implements [`MspEncode`] and/or
//! [`MspDecode`]. Integers are little-endian; fixed arrays and records are
//! encoded element by element in declaration order with no padding. New record
//! layouts are added with [`msp_record!`](crate::msp_record) and need no change
//! here.

pub use bytes::BytesMut;
use bytes::BufMut;

use super::error::PayloadError;
use super::frame::Frame;

pub trait MspEncode {
    fn encode(&self, buf: &mut BytesMut);
}

pub trait MspDecode: Sized {
    fn decode(frame: &mut Frame) -> Result<Self, PayloadError>;
}

/// Encode a value into a fresh payload buffer.
pub fn encode_to_vec<T: MspEncode + ?Sized>(value: &T) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(16);
    value.encode(&mut buf);
    buf.to_vec()
}

/// Read records of type `T` until the payload runs out.
///
/// A trailing partial record is treated as the end of the list, the same way a
/// clean end is.
pub fn decode_until_exhausted<T: MspDecode>(frame: &mut Frame) -> Result<Vec<T>, PayloadError> {
    let mut out = Vec::new();
    while frame.bytes_remaining() > 0 {
        match T::decode(frame) {
            Ok(v) => out.push(v),
            Err(e) if e.is_exhausted() => break,
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

impl MspEncode for u8 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(*self);
    }
}

impl MspEncode for u16 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(*self);
    }
}

impl MspEncode for u32 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(*self);
    }
}

impl MspDecode for u8 {
    fn decode(frame: &mut Frame) -> Result<Self, PayloadError> {
        Ok(frame.take(1)?[0])
    }
}

impl MspDecode for u16 {
    fn decode(frame: &mut Frame) -> Result<Self, PayloadError> {
        let b = frame.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }
}

impl MspDecode for u32 {
    fn decode(frame: &mut Frame) -> Result<Self, PayloadError> {
        let b = frame.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

impl<T: MspEncode, const N: usize> MspEncode for [T; N] {
    fn encode(&self, buf: &mut BytesMut) {
        self.as_slice().encode(buf);
    }
}

impl<T: MspEncode> MspEncode for [T] {
    fn encode(&self, buf: &mut BytesMut) {
        for item in self {
            item.encode(buf);
        }
    }
}

impl<T: MspEncode> MspEncode for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        self.as_slice().encode(buf);
    }
}

impl<T: MspEncode + ?Sized> MspEncode for &T {
    fn encode(&self, buf: &mut BytesMut) {
        (**self).encode(buf);
    }
}

impl<T: MspDecode, const N: usize> MspDecode for [T; N] {
    fn decode(frame: &mut Frame) -> Result<Self, PayloadError> {
        let items = (0..N)
            .map(|_| T::decode(frame))
            .collect::<Result<Vec<T>, _>>()?;
        match items.try_into() {
            Ok(array) => Ok(array),
            Err(_) => unreachable!("collected exactly N elements"),
        }
    }
}

/// Commands without arguments.
impl MspEncode for () {
    fn encode(&self, _buf: &mut BytesMut) {}
}

macro_rules! tuple_encode {
    ($($name:ident . $idx:tt),+) => {
        impl<$($name: MspEncode),+> MspEncode for ($($name,)+) {
            fn encode(&self, buf: &mut BytesMut) {
                $( self.$idx.encode(buf); )+
            }
        }
    };
}

tuple_encode!(A.0);
tuple_encode!(A.0, B.1);
tuple_encode!(A.0, B.1, C.2);
tuple_encode!(A.0, B.1, C.2, D.3);

/// Implement [`MspEncode`] and [`MspDecode`] for a plain struct by walking its
/// fields in the listed order.
///
/// ```
/// use msp_tool::msp_record;
///
/// pub struct Motor {
///     pub index: u8,
///     pub throttle: u16,
/// }
/// msp_record!(Motor { index, throttle });
/// ```
#[macro_export]
macro_rules! msp_record {
    ($ty:ident { $($field:ident),+ $(,)? }) => {
        impl $crate::msp::value::MspEncode for $ty {
            fn encode(&self, buf: &mut $crate::msp::value::BytesMut) {
                $( $crate::msp::value::MspEncode::encode(&self.$field, buf); )+
            }
        }

        impl $crate::msp::value::MspDecode for $ty {
            fn decode(
                frame: &mut $crate::msp::Frame,
            ) -> ::std::result::Result<Self, $crate::msp::PayloadError> {
                Ok(Self {
                    $( $field: $crate::msp::value::MspDecode::decode(frame)?, )+
                })
            }
        }
    };
}
