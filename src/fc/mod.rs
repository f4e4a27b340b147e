//! # Flight controller session
//!
//! [`FlightController`] is the composition root for one board: it owns the
//! [`Connection`], the [`BoardState`] that dispatch mutates, and the
//! [`StickSimulator`]. Narration for the operator goes out on an unbounded
//! channel returned by [`FlightController::connect`].
//!
//! Tasks:
//! - the read loop, [`FlightController::run`], which also drives reconnection
//! - the RC simulation timer, started by [`FlightController::toggle_rx_simulation`]
//! - whoever feeds key presses in via [`FlightController::press_key`]

pub mod board;
pub mod connection;
pub mod flash;

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::config::Config;
use crate::logutil::escape_log;
use crate::metrics;
use crate::msp::{self, Frame, MspFramer, PidSet, ProtocolError};
use crate::rx::{RxKey, StickSimulator};
use crate::transport::{is_closed, Connector};

pub use board::{BoardIdentity, BoardState, Effect};
use connection::lock;
pub use connection::{Connection, LinkError, LinkState, LinkTiming};
pub use flash::{FlashError, FlashOptions, Flasher};

const READ_BUFFER: usize = 256;
const IDLE_POLL: Duration = Duration::from_millis(1);

/// Receives every PID table the board reports.
pub trait PidReceiver: Send + Sync {
    fn received_pid(&self, pids: &PidSet) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct RxTiming {
    pub key_timeout: Duration,
    pub decay_interval: Duration,
    pub send_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct FcOptions {
    pub port_name: String,
    pub baud_rate: u32,
    pub enable_debug_trace: bool,
    pub link: LinkTiming,
    pub rx: RxTiming,
}

impl FcOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            port_name: config.serial.port.clone(),
            baud_rate: config.serial.baud_rate,
            enable_debug_trace: config.session.enable_debug_trace,
            link: LinkTiming::from_config(config),
            rx: RxTiming {
                key_timeout: Duration::from_millis(config.rx.key_timeout_ms),
                decay_interval: Duration::from_millis(config.rx.decay_interval_ms),
                send_interval: Duration::from_millis(config.rx.send_interval_ms),
            },
        }
    }
}

pub struct FlightController {
    link: Connection,
    board: Mutex<BoardState>,
    sticks: StickSimulator,
    rx: RxTiming,
    // Holding this lock while writing RC frames makes disabling synchronous.
    rx_task: Mutex<Option<JoinHandle<()>>>,
    pid_receiver: Mutex<Option<Arc<dyn PidReceiver>>>,
    notices: mpsc::UnboundedSender<String>,
}

impl FlightController {
    /// Open the port and send the identification requests.
    pub fn connect(
        opts: FcOptions,
        connector: Arc<dyn Connector>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<String>), LinkError> {
        let link = Connection::open(&opts.port_name, opts.baud_rate, connector, opts.link.clone())?;
        let (tx, rx) = mpsc::unbounded_channel();
        let fc = Arc::new(Self {
            link,
            board: Mutex::new(BoardState::new(opts.enable_debug_trace)),
            sticks: StickSimulator::new(opts.rx.key_timeout),
            rx: opts.rx,
            rx_task: Mutex::new(None),
            pid_receiver: Mutex::new(None),
            notices: tx,
        });
        fc.send_identification();
        Ok((fc, rx))
    }

    pub fn connection(&self) -> &Connection {
        &self.link
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub fn identity(&self) -> BoardIdentity {
        lock(&self.board).identity().clone()
    }

    pub fn pids(&self) -> Option<PidSet> {
        lock(&self.board).pids().cloned()
    }

    pub fn has_detected_target_name(&self) -> bool {
        lock(&self.board).has_detected_target_name()
    }

    pub fn detected_target_name(&self) -> Option<String> {
        lock(&self.board).identity().target_name.clone()
    }

    pub fn set_pid_receiver(&self, receiver: Arc<dyn PidReceiver>) {
        *lock(&self.pid_receiver) = Some(receiver);
    }

    fn notice(&self, line: impl Into<String>) {
        let line = line.into();
        debug!("{}", escape_log(&line));
        let _ = self.notices.send(line);
    }

    fn send_identification(&self) {
        for code in msp::IDENTIFICATION_SEQUENCE {
            if let Err(e) = self.link.write_command(code, &()) {
                warn!("Could not request MSP command {}: {}", code, e);
                return;
            }
        }
    }

    /// Read and dispatch frames until [`shutdown`](Self::shutdown). I/O errors
    /// trigger reconnection; only a fatal reconnect error is returned.
    pub async fn run(&self) -> Result<(), LinkError> {
        let mut framer = MspFramer::new();
        let mut buf = [0u8; READ_BUFFER];
        loop {
            if self.link.is_stopping() {
                return Ok(());
            }
            match self.link.read(&mut buf) {
                Ok(0) => {
                    framer.clear();
                    let eof = io::Error::from(io::ErrorKind::UnexpectedEof);
                    if !self.handle_disconnect(eof).await? {
                        return Ok(());
                    }
                }
                Ok(n) => {
                    framer.push(&buf[..n]);
                    while let Some(next) = framer.next_frame() {
                        match next {
                            Ok(frame) => self.dispatch(frame),
                            Err(e) => self.protocol_error(e),
                        }
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) =>
                {
                    sleep(IDLE_POLL).await;
                }
                Err(e) => {
                    framer.clear();
                    if !self.handle_disconnect(e).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_disconnect(&self, err: io::Error) -> Result<bool, LinkError> {
        if self.link.is_stopping() {
            return Ok(false);
        }
        self.notice(format!("Board disconnected ({}), trying to reconnect...", err));
        // Nothing learned from the old board may reach the new handle.
        self.reset();
        if is_closed(&err) {
            self.link.wait_for_disappearance().await;
        }
        if !self.link.reconnect().await? {
            return Ok(false);
        }
        self.notice(format!(
            "Reconnected to {} @ {}bps",
            self.link.port_name(),
            self.link.baud_rate()
        ));
        self.send_identification();
        Ok(true)
    }

    fn reset(&self) {
        lock(&self.board).reset();
        if self.stop_rx_simulation() {
            info!("RC simulation stopped by reconnect");
        }
        self.sticks.reset();
    }

    fn protocol_error(&self, err: ProtocolError) {
        metrics::inc_protocol_errors();
        match err {
            ProtocolError::OutOfBand(byte) => {
                metrics::inc_out_of_band();
                debug!("Out of band byte 0x{:02x}", byte);
            }
            ProtocolError::ChecksumMismatch { .. } => {
                metrics::inc_checksum_errors();
                self.notice(err.to_string());
            }
            other => self.notice(other.to_string()),
        }
    }

    fn dispatch(&self, frame: Frame) {
        metrics::inc_frames_decoded();
        let code = frame.code;
        let result = lock(&self.board).handle_frame(frame);
        match result {
            Ok(effects) => effects.into_iter().for_each(|effect| self.apply(effect)),
            Err(e) => warn!("Dropping MSP frame {}: {}", code, e),
        }
    }

    fn apply(&self, effect: Effect) {
        match effect {
            Effect::Notice(line) => self.notice(line),
            Effect::Send { code, payload } => {
                if let Err(e) = self.link.write_command(code, &payload) {
                    warn!("Could not send MSP command {}: {}", code, e);
                }
            }
            Effect::Pids(pids) => {
                let receiver = lock(&self.pid_receiver).clone();
                if let Some(receiver) = receiver {
                    if let Err(e) = receiver.received_pid(&pids) {
                        warn!("PID receiver failed: {}", e);
                    }
                }
            }
        }
    }

    /// Ask the board to reboot. The request goes through a fresh handle so the
    /// read loop never reads the end of stream.
    pub async fn reboot(&self) -> Result<(), LinkError> {
        let bytes = msp::encode_v1(msp::MSP_REBOOT, &[])?;
        self.link
            .prepare_to_reboot(move |port| port.write_all(&bytes))
            .await
    }

    pub async fn reboot_into_bootloader(&self) -> Result<(), LinkError> {
        self.link
            .prepare_to_reboot(|port| port.write_all(&[msp::REBOOT_CHARACTER]))
            .await
    }

    pub fn get_pids(&self) -> Result<(), LinkError> {
        self.link.write_command(msp::MSP_PID, &())
    }

    /// Upload a raw PID table and persist it.
    pub fn set_pids(&self, values: &[u8]) -> Result<(), LinkError> {
        self.link.write_command(msp::MSP_SET_PID, values)?;
        self.link.write_command(msp::MSP_EEPROM_WRITE, &())
    }

    pub fn press_key(&self, key: RxKey) {
        self.sticks.press(key);
    }

    pub fn sticks(&self) -> &StickSimulator {
        &self.sticks
    }

    pub fn is_simulating_rx(&self) -> bool {
        lock(&self.rx_task).is_some()
    }

    /// Start or stop sending simulated RC channels. Returns whether simulation
    /// is now on. No RC frame is written once this returns `false`.
    pub fn toggle_rx_simulation(self: &Arc<Self>) -> bool {
        let mut task = lock(&self.rx_task);
        if let Some(handle) = task.take() {
            handle.abort();
            return false;
        }
        let fc = Arc::clone(self);
        *task = Some(tokio::spawn(async move { fc.simulate_rx().await }));
        true
    }

    fn stop_rx_simulation(&self) -> bool {
        match lock(&self.rx_task).take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    async fn simulate_rx(&self) {
        let mut decay = interval(self.rx.decay_interval);
        let mut send = interval(self.rx.send_interval);
        decay.set_missed_tick_behavior(MissedTickBehavior::Skip);
        send.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = decay.tick() => self.sticks.decay(),
                _ = send.tick() => {
                    let active = lock(&self.rx_task);
                    if active.is_none() {
                        return;
                    }
                    if let Err(e) = self.send_rc_channels() {
                        debug!("RC frame not sent: {}", e);
                    }
                }
            }
        }
    }

    /// Compose the current sticks through the board's channel map and send them.
    /// Returns `Ok(false)` without writing when no usable channel map is known.
    pub fn send_rc_channels(&self) -> Result<bool, LinkError> {
        let map = lock(&self.board).identity().channel_map;
        let Some(map) = map else {
            return Ok(false);
        };
        let channels = match self.sticks.to_channels(&map) {
            Ok(channels) => channels,
            Err(_) => return Ok(false),
        };
        self.link.write_command(msp::MSP_SET_RAW_RC, &channels)?;
        metrics::inc_rc_frames_sent();
        Ok(true)
    }

    /// Build `target` (or the detected one) in `source_dir`, reboot the board
    /// into DFU and flash it.
    pub async fn flash(
        &self,
        source_dir: &Path,
        target: Option<&str>,
        opts: &FlashOptions,
    ) -> Result<(), FlashError> {
        let target = match target.filter(|t| !t.is_empty()) {
            Some(target) => target.to_string(),
            None => self.detected_target_name().ok_or(FlashError::EmptyTargetName)?,
        };
        let flasher = Flasher::new(opts.clone());
        let dfu_util = flasher.locate_dfu_util()?;

        self.notice(format!("Building binary for {}...", target));
        let binary = flasher.build(source_dir, &target).await?;

        self.notice("Rebooting board in DFU mode...");
        self.reboot_into_bootloader().await?;
        let device = flasher.wait_for_device(&dfu_util).await?;

        let name = binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.notice(format!("Flashing {} via DFU to offset {}...", name, device.offset));
        flasher.write(&dfu_util, &device, &binary).await
    }

    /// Stop simulation, close the port and let [`run`](Self::run) return.
    pub fn shutdown(&self) {
        self.stop_rx_simulation();
        self.link.stop();
    }
}
