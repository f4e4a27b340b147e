//! What the session knows about the board on the other end, and how each
//! incoming MSP response updates it.
//!
//! [`BoardState::handle_frame`] is pure: it mutates the state and returns the
//! [`Effect`]s (narration lines, commands to send, PID sets to hand out) for the
//! caller to carry out.
use log::{debug, warn};

use crate::logutil::{firmware_text, hex_snippet};
use crate::msp::value::{decode_until_exhausted, encode_to_vec};
use crate::msp::*;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardIdentity {
    pub variant: String,
    pub version_major: u8,
    pub version_minor: u8,
    pub version_patch: u8,
    pub board_id: String,
    pub target_name: Option<String>,
    pub features: u32,
    pub channel_map: Option<ChannelMap>,
}

impl BoardIdentity {
    /// Variant, major version and board id have all arrived.
    pub fn is_identified(&self) -> bool {
        !self.variant.is_empty() && self.version_major != 0 && !self.board_id.is_empty()
    }

    pub fn version_at_least(&self, major: u8, minor: u8, patch: u8) -> bool {
        (self.version_major, self.version_minor, self.version_patch) >= (major, minor, patch)
    }

    /// `INAV 1.9.0 (board SPEV, target SPRACINGF3EVO)`
    pub fn summary(&self) -> Option<String> {
        if !self.is_identified() {
            return None;
        }
        let target = match &self.target_name {
            Some(name) => format!(", target {}", name),
            None => String::new(),
        };
        Some(format!(
            "{} {}.{}.{} (board {}{})",
            self.variant,
            self.version_major,
            self.version_minor,
            self.version_patch,
            self.board_id,
            target
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Line for the operator.
    Notice(String),
    /// Command to write back to the board.
    Send { code: u16, payload: Vec<u8> },
    /// Fresh PID set for a registered consumer.
    Pids(PidSet),
}

impl Effect {
    fn send<T: MspEncode + ?Sized>(code: u16, args: &T) -> Self {
        Effect::Send {
            code,
            payload: encode_to_vec(args),
        }
    }
}

type Handler = fn(&mut BoardState, &mut Frame, &mut Vec<Effect>) -> Result<(), PayloadError>;

/// Response handlers keyed by command code. Codes missing here are reported as
/// unhandled.
const HANDLERS: &[(u16, Handler)] = &[
    (MSP_API_VERSION, BoardState::on_api_version),
    (MSP_FC_VARIANT, BoardState::on_fc_variant),
    (MSP_FC_VERSION, BoardState::on_fc_version),
    (MSP_BOARD_INFO, BoardState::on_board_info),
    (MSP_BUILD_INFO, BoardState::on_build_info),
    (MSP_FEATURE, BoardState::on_feature),
    (MSP_CF_SERIAL_CONFIG, BoardState::on_serial_config),
    (MSP_RX_MAP, BoardState::on_rx_map),
    (MSP_REBOOT, BoardState::on_reboot),
    (MSP_DEBUG_MSG, BoardState::on_debug_msg),
    (MSP_PID, BoardState::on_pid),
    (MSP_SET_FEATURE, BoardState::on_ack),
    (MSP_SET_CF_SERIAL_CONFIG, BoardState::on_ack),
    (MSP_SET_RAW_RC, BoardState::on_ack),
    (MSP_SET_PID, BoardState::on_ack),
    (MSP_EEPROM_WRITE, BoardState::on_ack),
];

#[derive(Debug, Default)]
pub struct BoardState {
    identity: BoardIdentity,
    pids: Option<PidSet>,
    enable_debug_trace: bool,
}

impl BoardState {
    pub fn new(enable_debug_trace: bool) -> Self {
        Self {
            enable_debug_trace,
            ..Self::default()
        }
    }

    pub fn identity(&self) -> &BoardIdentity {
        &self.identity
    }

    pub fn pids(&self) -> Option<&PidSet> {
        self.pids.as_ref()
    }

    /// Forget everything learned from the previous connection.
    pub fn reset(&mut self) {
        self.identity = BoardIdentity::default();
        self.pids = None;
    }

    pub fn has_detected_target_name(&self) -> bool {
        self.identity.target_name.is_some()
    }

    /// Debug trace is only forced on INAV 1.9.0 and later.
    pub fn should_enable_debug_trace(&self) -> bool {
        self.enable_debug_trace
            && self.identity.variant == "INAV"
            && self.identity.version_at_least(1, 9, 0)
    }

    pub fn handle_frame(&mut self, mut frame: Frame) -> Result<Vec<Effect>, PayloadError> {
        let mut effects = Vec::new();
        if frame.direction == Direction::Error {
            effects.push(Effect::Notice(format!("Board rejected MSP command {}", frame.code)));
            return Ok(effects);
        }
        match HANDLERS.iter().find(|(code, _)| *code == frame.code) {
            Some((_, handler)) => handler(self, &mut frame, &mut effects)?,
            None => effects.push(Effect::Notice(format!(
                "Unhandled MSP frame {} with payload [{}]",
                frame.code,
                hex_snippet(frame.payload(), 64)
            ))),
        }
        Ok(effects)
    }

    fn push_summary(&self, out: &mut Vec<Effect>) {
        if let Some(summary) = self.identity.summary() {
            out.push(Effect::Notice(summary));
        }
    }

    fn on_api_version(&mut self, frame: &mut Frame, out: &mut Vec<Effect>) -> Result<(), PayloadError> {
        let [protocol, major, minor] = frame.read::<[u8; 3]>()?;
        out.push(Effect::Notice(format!(
            "MSP API version {}.{} (protocol {})",
            major, minor, protocol
        )));
        Ok(())
    }

    fn on_fc_variant(&mut self, frame: &mut Frame, out: &mut Vec<Effect>) -> Result<(), PayloadError> {
        self.identity.variant = firmware_text(frame.rest());
        self.push_summary(out);
        Ok(())
    }

    fn on_fc_version(&mut self, frame: &mut Frame, out: &mut Vec<Effect>) -> Result<(), PayloadError> {
        let [major, minor, patch] = frame.read::<[u8; 3]>()?;
        self.identity.version_major = major;
        self.identity.version_minor = minor;
        self.identity.version_patch = patch;
        self.push_summary(out);
        Ok(())
    }

    // Board id, hardware revision (2), board type, capabilities, then an
    // optional length-prefixed target name.
    fn on_board_info(&mut self, frame: &mut Frame, out: &mut Vec<Effect>) -> Result<(), PayloadError> {
        let board_id = firmware_text(frame.take(4)?);
        let payload = frame.payload();
        let mut target_name = None;
        if payload.len() >= 9 {
            let len = payload[8] as usize;
            if len > 0 && payload.len() >= 9 + len {
                target_name = Some(firmware_text(&payload[9..9 + len]));
            }
        }
        self.identity.board_id = board_id;
        self.identity.target_name = target_name.filter(|name| !name.is_empty());
        self.push_summary(out);
        Ok(())
    }

    fn on_build_info(&mut self, frame: &mut Frame, out: &mut Vec<Effect>) -> Result<(), PayloadError> {
        let date = firmware_text(frame.take(11)?);
        let time = firmware_text(frame.take(8)?);
        // 7 chars on INAV, 8 on Betaflight.
        let revision = firmware_text(frame.rest());
        out.push(Effect::Notice(format!(
            "Build {} (built on {} @ {})",
            revision, date, time
        )));
        Ok(())
    }

    fn on_feature(&mut self, frame: &mut Frame, out: &mut Vec<Effect>) -> Result<(), PayloadError> {
        let features: u32 = frame.read()?;
        self.identity.features = features;
        if features & FEATURE_DEBUG_TRACE == 0 && self.should_enable_debug_trace() {
            out.push(Effect::Notice("Enabling FEATURE_DEBUG_TRACE".to_string()));
            self.identity.features |= FEATURE_DEBUG_TRACE;
            out.push(Effect::send(MSP_SET_FEATURE, &self.identity.features));
            out.push(Effect::send(MSP_EEPROM_WRITE, &()));
        }
        Ok(())
    }

    fn on_serial_config(&mut self, frame: &mut Frame, out: &mut Vec<Effect>) -> Result<(), PayloadError> {
        if !self.should_enable_debug_trace() {
            return Ok(());
        }
        let mut ports: Vec<SerialConfig> = decode_until_exhausted(frame)?;
        let wanted = SERIAL_FUNCTION_MSP | SERIAL_FUNCTION_DEBUG_TRACE;
        if ports.iter().any(|port| port.has_functions(wanted)) {
            return Ok(());
        }
        match ports.iter_mut().find(|port| port.has_functions(SERIAL_FUNCTION_MSP)) {
            Some(port) => {
                port.function_mask |= SERIAL_FUNCTION_DEBUG_TRACE;
                out.push(Effect::Notice(format!(
                    "Enabling FUNCTION_DEBUG_TRACE on serial port {}",
                    port.identifier
                )));
            }
            None => {
                debug!("No MSP serial port to route debug trace to");
                return Ok(());
            }
        }
        out.push(Effect::send(MSP_SET_CF_SERIAL_CONFIG, &ports));
        out.push(Effect::send(MSP_EEPROM_WRITE, &()));
        Ok(())
    }

    fn on_rx_map(&mut self, frame: &mut Frame, _out: &mut Vec<Effect>) -> Result<(), PayloadError> {
        let map = ChannelMap::new(frame.read::<[u8; 8]>()?);
        if let Err(e) = map.stick_slots() {
            warn!("{}; RC simulation output disabled", e);
        }
        self.identity.channel_map = Some(map);
        Ok(())
    }

    fn on_reboot(&mut self, _frame: &mut Frame, out: &mut Vec<Effect>) -> Result<(), PayloadError> {
        out.push(Effect::Notice("Rebooting board...".to_string()));
        Ok(())
    }

    fn on_debug_msg(&mut self, frame: &mut Frame, out: &mut Vec<Effect>) -> Result<(), PayloadError> {
        out.push(Effect::Notice(format!("[DEBUG] {}", firmware_text(frame.rest()))));
        Ok(())
    }

    fn on_pid(&mut self, frame: &mut Frame, out: &mut Vec<Effect>) -> Result<(), PayloadError> {
        let raw: [u8; PID_PAYLOAD_LEN] = frame.read()?;
        let set = PidSet::from_payload(&raw);
        self.pids = Some(set.clone());
        out.push(Effect::Pids(set));
        Ok(())
    }

    fn on_ack(&mut self, _frame: &mut Frame, _out: &mut Vec<Effect>) -> Result<(), PayloadError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notices(effects: &[Effect]) -> Vec<&str> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Notice(line) => Some(line.as_str()),
                _ => None,
            })
            .collect()
    }

    fn identify(state: &mut BoardState, variant: &str, version: [u8; 3]) {
        state.handle_frame(Frame::new(MSP_FC_VARIANT, variant.as_bytes())).unwrap();
        state.handle_frame(Frame::new(MSP_FC_VERSION, version)).unwrap();
        state.handle_frame(Frame::new(MSP_BOARD_INFO, b"SPEV".to_vec())).unwrap();
    }

    #[test]
    fn api_version_line() {
        let mut state = BoardState::default();
        let effects = state.handle_frame(Frame::new(MSP_API_VERSION, [0u8, 1, 40])).unwrap();
        assert_eq!(notices(&effects), vec!["MSP API version 1.40 (protocol 0)"]);
    }

    #[test]
    fn summary_waits_for_all_identity_fields() {
        let mut state = BoardState::default();
        let effects = state.handle_frame(Frame::new(MSP_FC_VARIANT, b"BTFL".to_vec())).unwrap();
        assert!(effects.is_empty());
        let effects = state.handle_frame(Frame::new(MSP_FC_VERSION, [3u8, 5, 1])).unwrap();
        assert!(effects.is_empty());
        let effects = state.handle_frame(Frame::new(MSP_BOARD_INFO, b"S405".to_vec())).unwrap();
        assert_eq!(notices(&effects), vec!["BTFL 3.5.1 (board S405)"]);

        // Repeated on every identity frame once complete.
        let effects = state.handle_frame(Frame::new(MSP_FC_VERSION, [3u8, 5, 2])).unwrap();
        assert_eq!(notices(&effects), vec!["BTFL 3.5.2 (board S405)"]);
    }

    #[test]
    fn short_board_info_has_no_target() {
        let mut state = BoardState::default();
        state.handle_frame(Frame::new(MSP_BOARD_INFO, b"OMNI".to_vec())).unwrap();
        assert_eq!(state.identity().board_id, "OMNI");
        assert_eq!(state.identity().target_name, None);
        assert!(!state.has_detected_target_name());
    }

    #[test]
    fn board_info_with_target_name() {
        let mut payload = b"SPEV".to_vec();
        payload.extend_from_slice(&[0, 0, 0, 0]);
        payload.push(13);
        payload.extend_from_slice(b"SPRACINGF3EVO");
        let mut state = BoardState::default();
        identify(&mut state, "INAV", [1, 9, 0]);
        let effects = state.handle_frame(Frame::new(MSP_BOARD_INFO, payload)).unwrap();
        assert_eq!(state.identity().target_name.as_deref(), Some("SPRACINGF3EVO"));
        assert_eq!(
            notices(&effects),
            vec!["INAV 1.9.0 (board SPEV, target SPRACINGF3EVO)"]
        );
    }

    #[test]
    fn board_info_with_truncated_target_name() {
        let mut payload = b"SPEV".to_vec();
        payload.extend_from_slice(&[0, 0, 0, 0, 20]);
        payload.extend_from_slice(b"SHORT");
        let mut state = BoardState::default();
        state.handle_frame(Frame::new(MSP_BOARD_INFO, payload)).unwrap();
        assert_eq!(state.identity().target_name, None);
    }

    #[test]
    fn build_info_accepts_both_revision_lengths() {
        let mut state = BoardState::default();
        for revision in ["abc1234", "abcd1234"] {
            let payload = format!("Jan  1 2018{}{}", "12:34:56", revision);
            let effects = state.handle_frame(Frame::new(MSP_BUILD_INFO, payload.into_bytes())).unwrap();
            assert_eq!(
                notices(&effects),
                vec![format!("Build {} (built on Jan  1 2018 @ 12:34:56)", revision)]
            );
        }
    }

    #[test]
    fn short_payload_aborts_only_that_frame() {
        let mut state = BoardState::default();
        let err = state.handle_frame(Frame::new(MSP_FC_VERSION, [1u8])).unwrap_err();
        assert!(err.is_exhausted());
        assert_eq!(state.identity().version_major, 0);
    }

    #[test]
    fn feature_bit_forced_on_new_inav() {
        let mut state = BoardState::new(true);
        identify(&mut state, "INAV", [1, 9, 0]);
        let effects = state.handle_frame(Frame::new(MSP_FEATURE, encode_to_vec(&0x0000_0400u32))).unwrap();
        assert_eq!(state.identity().features, 0x8000_0400);
        assert_eq!(
            effects,
            vec![
                Effect::Notice("Enabling FEATURE_DEBUG_TRACE".to_string()),
                Effect::Send {
                    code: MSP_SET_FEATURE,
                    payload: vec![0x00, 0x04, 0x00, 0x80],
                },
                Effect::Send {
                    code: MSP_EEPROM_WRITE,
                    payload: vec![],
                },
            ]
        );
    }

    #[test]
    fn feature_bit_left_alone_on_old_or_other_firmware() {
        for (variant, version) in [("INAV", [1, 8, 9]), ("BTFL", [3, 5, 0])] {
            let mut state = BoardState::new(true);
            identify(&mut state, variant, version);
            let effects = state.handle_frame(Frame::new(MSP_FEATURE, encode_to_vec(&0u32))).unwrap();
            assert!(effects.is_empty(), "{} {:?}", variant, version);
        }
        let mut state = BoardState::new(false);
        identify(&mut state, "INAV", [2, 0, 0]);
        let effects = state.handle_frame(Frame::new(MSP_FEATURE, encode_to_vec(&0u32))).unwrap();
        assert!(effects.is_empty());
    }

    fn port(identifier: u8, function_mask: u16) -> SerialConfig {
        SerialConfig {
            identifier,
            function_mask,
            msp_baud_index: 5,
            gps_baud_index: 0,
            telemetry_baud_index: 0,
            peripheral_baud_index: 0,
        }
    }

    #[test]
    fn serial_config_routes_debug_trace_to_first_msp_port() {
        let mut state = BoardState::new(true);
        identify(&mut state, "INAV", [1, 9, 1]);
        let ports = vec![port(20, 0), port(0, SERIAL_FUNCTION_MSP), port(1, SERIAL_FUNCTION_MSP)];
        let effects = state
            .handle_frame(Frame::new(MSP_CF_SERIAL_CONFIG, encode_to_vec(&ports)))
            .unwrap();

        let mut expected = ports.clone();
        expected[1].function_mask |= SERIAL_FUNCTION_DEBUG_TRACE;
        assert_eq!(
            effects,
            vec![
                Effect::Notice("Enabling FUNCTION_DEBUG_TRACE on serial port 0".to_string()),
                Effect::Send {
                    code: MSP_SET_CF_SERIAL_CONFIG,
                    payload: encode_to_vec(&expected),
                },
                Effect::Send {
                    code: MSP_EEPROM_WRITE,
                    payload: vec![],
                },
            ]
        );
    }

    #[test]
    fn serial_config_already_routed_is_untouched() {
        let mut state = BoardState::new(true);
        identify(&mut state, "INAV", [1, 9, 1]);
        let ports = vec![port(0, SERIAL_FUNCTION_MSP | SERIAL_FUNCTION_DEBUG_TRACE)];
        let effects = state
            .handle_frame(Frame::new(MSP_CF_SERIAL_CONFIG, encode_to_vec(&ports)))
            .unwrap();
        assert!(effects.is_empty());
    }

    #[test]
    fn rx_map_is_stored_verbatim() {
        let mut state = BoardState::default();
        state.handle_frame(Frame::new(MSP_RX_MAP, [1u8, 2, 3, 0, 4, 5, 6, 7])).unwrap();
        assert_eq!(
            state.identity().channel_map.map(|m| m.raw()),
            Some([1, 2, 3, 0, 4, 5, 6, 7])
        );
    }

    #[test]
    fn pid_frame_replaces_set() {
        let mut state = BoardState::default();
        let raw: Vec<u8> = (0..PID_PAYLOAD_LEN as u8).collect();
        let effects = state.handle_frame(Frame::new(MSP_PID, raw)).unwrap();
        assert_eq!(effects.len(), 1);
        assert!(matches!(&effects[0], Effect::Pids(set) if set.len() == 9));
        let roll = state.pids().unwrap().get(PidAxis::Roll).unwrap();
        assert_eq!(roll.values, vec![0, 1, 2]);
    }

    #[test]
    fn debug_and_reboot_and_acks() {
        let mut state = BoardState::default();
        let effects = state.handle_frame(Frame::new(MSP_DEBUG_MSG, b"gyro ok\0\0".to_vec())).unwrap();
        assert_eq!(notices(&effects), vec!["[DEBUG] gyro ok"]);
        let effects = state.handle_frame(Frame::new(MSP_REBOOT, Vec::new())).unwrap();
        assert_eq!(notices(&effects), vec!["Rebooting board..."]);
        for code in [MSP_SET_FEATURE, MSP_SET_RAW_RC, MSP_EEPROM_WRITE, MSP_SET_PID] {
            assert!(state.handle_frame(Frame::new(code, Vec::new())).unwrap().is_empty());
        }
    }

    #[test]
    fn unknown_and_rejected_commands_are_reported() {
        let mut state = BoardState::default();
        let effects = state.handle_frame(Frame::new(99, [0xdeu8, 0xad])).unwrap();
        assert_eq!(notices(&effects), vec!["Unhandled MSP frame 99 with payload [de ad]"]);

        let mut frame = Frame::new(MSP_FC_VARIANT, b"INAV".to_vec());
        frame.direction = Direction::Error;
        let effects = state.handle_frame(frame).unwrap();
        assert_eq!(notices(&effects), vec!["Board rejected MSP command 2"]);
        assert!(state.identity().variant.is_empty());
    }

    #[test]
    fn reset_clears_identity() {
        let mut state = BoardState::default();
        identify(&mut state, "INAV", [1, 9, 0]);
        assert!(state.identity().is_identified());
        state.reset();
        assert_eq!(state.identity(), &BoardIdentity::default());
    }
}
