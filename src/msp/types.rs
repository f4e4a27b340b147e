use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use super::error::PayloadError;
use crate::msp_record;

/// One entry of MSP_CF_SERIAL_CONFIG, one per physical UART on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SerialConfig {
    pub identifier: u8,
    pub function_mask: u16,
    pub msp_baud_index: u8,
    pub gps_baud_index: u8,
    pub telemetry_baud_index: u8,
    /// Blackbox baud index on Betaflight.
    pub peripheral_baud_index: u8,
}

msp_record!(SerialConfig {
    identifier,
    function_mask,
    msp_baud_index,
    gps_baud_index,
    telemetry_baud_index,
    peripheral_baud_index,
});

impl SerialConfig {
    pub fn has_functions(&self, mask: u16) -> bool {
        self.function_mask & mask == mask
    }
}

/// Axis a PID coefficient group belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PidAxis {
    Roll,
    Pitch,
    Yaw,
    Alt,
    Vel,
    Mag,
    Pos,
    PosR,
    NavR,
}

impl PidAxis {
    pub fn name(self) -> &'static str {
        match self {
            PidAxis::Roll => "roll",
            PidAxis::Pitch => "pitch",
            PidAxis::Yaw => "yaw",
            PidAxis::Alt => "alt",
            PidAxis::Vel => "vel",
            PidAxis::Mag => "mag",
            PidAxis::Pos => "pos",
            PidAxis::PosR => "posR",
            PidAxis::NavR => "navR",
        }
    }
}

impl fmt::Display for PidAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Size of the MSP_PID payload.
pub const PID_PAYLOAD_LEN: usize = 30;

/// How MSP_PID is sliced: axis, the flight-surface label reported for it, and
/// its byte range in the payload.
///
/// The yaw slice is labelled "pitch" and is two bytes wide. Both look like an
/// upstream typo but are kept as-is until confirmed against firmware.
pub const PID_LAYOUT: [(PidAxis, &str, Range<usize>); 9] = [
    (PidAxis::Roll, "roll", 0..3),
    (PidAxis::Pitch, "pitch", 3..6),
    (PidAxis::Yaw, "pitch", 6..8),
    (PidAxis::Alt, "alt", 8..11),
    (PidAxis::Vel, "vel", 11..14),
    (PidAxis::Mag, "mag", 14..15),
    (PidAxis::Pos, "pos", 15..16),
    (PidAxis::PosR, "posR", 16..19),
    (PidAxis::NavR, "navR", 19..22),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pid {
    pub flight_surface: &'static str,
    pub values: Vec<u8>,
}

/// Full PID table as last fetched from the board.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PidSet {
    pids: BTreeMap<PidAxis, Pid>,
}

impl PidSet {
    pub fn from_payload(raw: &[u8; PID_PAYLOAD_LEN]) -> Self {
        let pids = PID_LAYOUT
            .iter()
            .map(|(axis, label, range)| {
                (
                    *axis,
                    Pid {
                        flight_surface: *label,
                        values: raw[range.clone()].to_vec(),
                    },
                )
            })
            .collect();
        Self { pids }
    }

    pub fn get(&self, axis: PidAxis) -> Option<&Pid> {
        self.pids.get(&axis)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PidAxis, &Pid)> {
        self.pids.iter().map(|(axis, pid)| (*axis, pid))
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }
}

/// MSP_RX_MAP: for roll, pitch, yaw, throttle and AUX1-4, the physical RC
/// channel carrying it. Stored verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMap([u8; 8]);

impl ChannelMap {
    pub fn new(raw: [u8; 8]) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> [u8; 8] {
        self.0
    }

    /// Physical slots for roll, pitch, yaw and throttle. Only valid when the
    /// first four entries are a permutation of 0..4.
    pub fn stick_slots(&self) -> Result<[usize; 4], PayloadError> {
        let mut seen = [false; 4];
        let mut slots = [0usize; 4];
        for (i, &ch) in self.0[..4].iter().enumerate() {
            let ch = ch as usize;
            if ch >= 4 || seen[ch] {
                return Err(PayloadError::InvalidChannelMap(self.0));
            }
            seen[ch] = true;
            slots[i] = ch;
        }
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msp::value::{decode_until_exhausted, encode_to_vec};
    use crate::msp::Frame;

    #[test]
    fn serial_config_is_seven_bytes() {
        let cfg = SerialConfig {
            identifier: 20,
            function_mask: 0x8001,
            msp_baud_index: 5,
            ..Default::default()
        };
        let bytes = encode_to_vec(&cfg);
        assert_eq!(bytes, vec![20, 0x01, 0x80, 5, 0, 0, 0]);
        assert!(cfg.has_functions(0x8001));
        assert!(!cfg.has_functions(0x0002));
    }

    #[test]
    fn serial_config_list_decodes_all_ports() {
        let ports = vec![
            SerialConfig { identifier: 0, function_mask: 1, ..Default::default() },
            SerialConfig { identifier: 1, function_mask: 0, ..Default::default() },
            SerialConfig { identifier: 2, function_mask: 4, ..Default::default() },
        ];
        let mut frame = Frame::new(54, encode_to_vec(&ports));
        let decoded: Vec<SerialConfig> = decode_until_exhausted(&mut frame).unwrap();
        assert_eq!(decoded, ports);
    }

    #[test]
    fn pid_layout_slices_payload() {
        let mut raw = [0u8; PID_PAYLOAD_LEN];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = i as u8;
        }
        let set = PidSet::from_payload(&raw);
        assert_eq!(set.len(), 9);
        assert_eq!(set.get(PidAxis::Roll).unwrap().values, vec![0, 1, 2]);
        let yaw = set.get(PidAxis::Yaw).unwrap();
        assert_eq!(yaw.values, vec![6, 7]);
        assert_eq!(yaw.flight_surface, "pitch");
        assert_eq!(set.get(PidAxis::Mag).unwrap().values, vec![14]);
        assert_eq!(set.get(PidAxis::NavR).unwrap().values, vec![19, 20, 21]);
    }

    #[test]
    fn channel_map_requires_stick_permutation() {
        let map = ChannelMap::new([1, 0, 3, 2, 4, 5, 6, 7]);
        assert_eq!(map.stick_slots().unwrap(), [1, 0, 3, 2]);

        let dup = ChannelMap::new([0, 0, 1, 2, 4, 5, 6, 7]);
        assert!(dup.stick_slots().is_err());
        let out_of_range = ChannelMap::new([0, 1, 2, 6, 4, 5, 3, 7]);
        assert!(out_of_range.stick_slots().is_err());
    }
}
