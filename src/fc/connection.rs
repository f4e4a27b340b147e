//! Link to the board: owns the single open transport handle and knows how to
//! reconnect and how to hand the port over for a reboot.
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, trace};
use thiserror::Error;
use tokio::time::{sleep, Instant};

use crate::config::Config;
use crate::logutil::hex_snippet;
use crate::metrics;
use crate::msp::value::encode_to_vec;
use crate::msp::{encode_v1, EncodeError, MspEncode};
use crate::transport::{closed_error, Connector, Transport};

const PRESENCE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("board is not connected")]
    NotConnected,

    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Reopening failed in a way retrying cannot fix.
    #[error("unexpected error while reconnecting to {port}: {source}")]
    Fatal { port: String, source: io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct LinkTiming {
    pub reconnect_interval: Duration,
    pub reboot_settle: Duration,
    pub disappear_timeout: Duration,
    /// Wait for the device node to exist before reopening.
    pub presence_check: bool,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl LinkTiming {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reconnect_interval: Duration::from_millis(config.session.reconnect_interval_ms),
            reboot_settle: Duration::from_millis(config.session.reboot_settle_ms),
            disappear_timeout: Duration::from_millis(config.session.disappear_timeout_ms),
            presence_check: config.serial.presence_check,
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Connection {
    port_name: String,
    baud_rate: u32,
    connector: Arc<dyn Connector>,
    timing: LinkTiming,
    // None while disconnected or while a reboot owns the port.
    transport: Mutex<Option<Box<dyn Transport>>>,
    state: Mutex<LinkState>,
    // Held for the whole reboot handover so a reconnect cannot grab the port midway.
    reboot_guard: tokio::sync::Mutex<()>,
    stopping: AtomicBool,
}

impl Connection {
    /// Open the port for the first time.
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        connector: Arc<dyn Connector>,
        timing: LinkTiming,
    ) -> Result<Self, LinkError> {
        let transport = connector.open(port_name, baud_rate)?;
        debug!("Opened {} @ {}bps", port_name, baud_rate);
        Ok(Self {
            port_name: port_name.to_string(),
            baud_rate,
            connector,
            timing,
            transport: Mutex::new(Some(transport)),
            state: Mutex::new(LinkState::Connected),
            reboot_guard: tokio::sync::Mutex::new(()),
            stopping: AtomicBool::new(false),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn state(&self) -> LinkState {
        *lock(&self.state)
    }

    fn set_state(&self, state: LinkState) {
        let mut current = lock(&self.state);
        if *current != state {
            trace!("Link {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    pub fn write_raw(&self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut guard = lock(&self.transport);
        let transport = guard.as_mut().ok_or(LinkError::NotConnected)?;
        transport.write_all(bytes)?;
        transport.flush()?;
        Ok(())
    }

    /// Encode `args` as the payload of a v1 request and send it.
    pub fn write_command<T: MspEncode + ?Sized>(&self, code: u16, args: &T) -> Result<(), LinkError> {
        let payload = encode_to_vec(args);
        let bytes = encode_v1(code, &payload)?;
        trace!("MSP -> cmd {} payload [{}]", code, hex_snippet(&payload, 32));
        self.write_raw(&bytes)
    }

    /// Read from the current handle. An empty slot reads as the closed sentinel.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = lock(&self.transport);
        match guard.as_mut() {
            Some(transport) => transport.read(buf),
            None => Err(closed_error()),
        }
    }

    /// Drop the current handle, if any.
    pub fn close(&self) {
        let old = lock(&self.transport).take();
        if old.is_some() {
            debug!("Closed {}", self.port_name);
        }
        drop(old);
        self.set_state(LinkState::Disconnected);
    }

    /// Stop reconnect attempts and close the port for good.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.close();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// After a deliberate close, give the device node time to go away before
    /// polling for it to come back.
    pub async fn wait_for_disappearance(&self) {
        sleep(self.timing.reboot_settle).await;
        if !self.timing.presence_check {
            return;
        }
        let deadline = Instant::now() + self.timing.disappear_timeout;
        while self.connector.is_present(&self.port_name) && Instant::now() < deadline {
            sleep(PRESENCE_POLL).await;
        }
    }

    /// Reopen the port, retrying until it works. Returns `Ok(false)` if the
    /// connection was stopped meanwhile.
    pub async fn reconnect(&self) -> Result<bool, LinkError> {
        self.close();
        self.set_state(LinkState::Connecting);
        loop {
            if self.is_stopping() {
                self.set_state(LinkState::Disconnected);
                return Ok(false);
            }
            if !self.timing.presence_check || self.connector.is_present(&self.port_name) {
                let _reboot = self.reboot_guard.lock().await;
                match self.connector.open(&self.port_name, self.baud_rate) {
                    Ok(transport) => {
                        *lock(&self.transport) = Some(transport);
                        self.set_state(LinkState::Connected);
                        metrics::inc_reconnects();
                        return Ok(true);
                    }
                    Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                        self.set_state(LinkState::Disconnected);
                        return Err(LinkError::Fatal {
                            port: self.port_name.clone(),
                            source: e,
                        });
                    }
                    Err(e) => trace!("Reopening {} failed: {}", self.port_name, e),
                }
            }
            sleep(self.timing.reconnect_interval).await;
        }
    }

    /// Close the primary handle, wait for the board to settle, then run `action`
    /// against a fresh handle that is closed again afterwards.
    ///
    /// The read loop sees the closed sentinel instead of the end of stream a
    /// rebooting USB CDC device produces, which on macOS resets the USB bus.
    pub async fn prepare_to_reboot<F>(&self, action: F) -> Result<(), LinkError>
    where
        F: FnOnce(&mut dyn Transport) -> io::Result<()> + Send,
    {
        let _reboot = self.reboot_guard.lock().await;
        self.close();
        sleep(self.timing.reboot_settle).await;
        let mut temp = self.connector.open(&self.port_name, self.baud_rate)?;
        let result = action(temp.as_mut()).and_then(|_| temp.flush());
        drop(temp);
        debug!("Reboot handover on {} finished", self.port_name);
        result.map_err(LinkError::from)
    }
}
