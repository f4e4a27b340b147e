//! # MSP protocol
//!
//! Framing, checksums and typed payload coding for the MultiWii Serial Protocol
//! spoken by Betaflight, Cleanflight and INAV flight controllers. Nothing in here
//! knows what a command means; see [`crate::fc`] for that.
//!
//! ```rust
//! use msp_tool::msp::{self, MspFramer};
//!
//! let bytes = msp::encode_v1(msp::MSP_FC_VARIANT, &[]).unwrap();
//! let mut framer = MspFramer::new();
//! framer.push(&bytes);
//! let frame = framer.next_frame().unwrap().unwrap();
//! assert_eq!(frame.code, msp::MSP_FC_VARIANT);
//! ```

pub mod codec;
pub mod crc;
pub mod error;
pub mod frame;
pub mod types;
pub mod value;

pub use codec::{encode, encode_frame, encode_v1, encode_v2, read_frame, MspFramer, ReadFrameError};
pub use error::{EncodeError, PayloadError, ProtocolError};
pub use frame::{Direction, Frame, Version};
pub use types::{ChannelMap, Pid, PidAxis, PidSet, SerialConfig, PID_LAYOUT, PID_PAYLOAD_LEN};
pub use value::{MspDecode, MspEncode};

pub const MSP_API_VERSION: u16 = 1;
pub const MSP_FC_VARIANT: u16 = 2;
pub const MSP_FC_VERSION: u16 = 3;
pub const MSP_BOARD_INFO: u16 = 4;
pub const MSP_BUILD_INFO: u16 = 5;

pub const MSP_FEATURE: u16 = 36;
pub const MSP_SET_FEATURE: u16 = 37;

pub const MSP_CF_SERIAL_CONFIG: u16 = 54;
pub const MSP_SET_CF_SERIAL_CONFIG: u16 = 55;

pub const MSP_RX_MAP: u16 = 64;

pub const MSP_REBOOT: u16 = 68;

pub const MSP_PID: u16 = 112;

pub const MSP_SET_RAW_RC: u16 = 200;
pub const MSP_SET_PID: u16 = 202;

pub const MSP_EEPROM_WRITE: u16 = 250;

pub const MSP_DEBUG_MSG: u16 = 253;

/// `FEATURE_DEBUG_TRACE` in the MSP_FEATURE bitmask.
pub const FEATURE_DEBUG_TRACE: u32 = 1 << 31;

pub const SERIAL_FUNCTION_MSP: u16 = 1 << 0;
pub const SERIAL_FUNCTION_DEBUG_TRACE: u16 = 1 << 15;

/// Byte that makes the firmware's serial handler jump to the bootloader.
pub const REBOOT_CHARACTER: u8 = b'R';

/// Commands sent, in order, right after every (re)connect.
pub const IDENTIFICATION_SEQUENCE: [u16; 8] = [
    MSP_API_VERSION,
    MSP_FC_VARIANT,
    MSP_FC_VERSION,
    MSP_BOARD_INFO,
    MSP_BUILD_INFO,
    MSP_FEATURE,
    MSP_CF_SERIAL_CONFIG,
    MSP_RX_MAP,
];
