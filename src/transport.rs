//! Byte-stream transports the session runs over.
//!
//! A [`Connector`] opens [`Transport`] handles by port name and baud rate. The
//! real one wraps `serialport`; [`scripted`] provides an in-memory stand-in for
//! tests and dry runs.
use std::io::{self, Read, Write};
use std::path::Path;
#[cfg(feature = "serial")]
use std::time::Duration;

/// An open duplex byte stream. Dropping it closes the underlying port.
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> Transport for T {}

pub trait Connector: Send + Sync {
    fn open(&self, port_name: &str, baud_rate: u32) -> io::Result<Box<dyn Transport>>;

    /// Whether the port's device node currently exists.
    fn is_present(&self, port_name: &str) -> bool {
        Path::new(port_name).exists()
    }
}

/// Error used when the session's handle was deliberately closed.
pub fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "port closed")
}

pub fn is_closed(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotConnected
}

/// Opens real serial ports.
#[cfg(feature = "serial")]
#[derive(Debug, Clone)]
pub struct SerialConnector {
    read_timeout: Duration,
}

#[cfg(feature = "serial")]
impl SerialConnector {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

#[cfg(feature = "serial")]
impl Connector for SerialConnector {
    fn open(&self, port_name: &str, baud_rate: u32) -> io::Result<Box<dyn Transport>> {
        log::debug!("Opening serial port {} at {} baud", port_name, baud_rate);
        let mut builder = serialport::new(port_name, baud_rate).timeout(self.read_timeout);
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let port = builder.open().map_err(serial_to_io)?;
        Ok(Box::new(port))
    }
}

#[cfg(feature = "serial")]
fn serial_to_io(err: serialport::Error) -> io::Error {
    let kind = match err.kind() {
        serialport::ErrorKind::NoDevice => io::ErrorKind::NotFound,
        serialport::ErrorKind::InvalidInput => io::ErrorKind::InvalidInput,
        serialport::ErrorKind::Io(kind) => kind,
        serialport::ErrorKind::Unknown => io::ErrorKind::Other,
    };
    io::Error::new(kind, err.description)
}

pub mod scripted {
    //! Scripted in-memory transport.
    //!
    //! Each `open` consumes the next queued session script; reads replay its
    //! steps and every write is recorded per open. When a script runs dry, reads
    //! time out like an idle serial port.
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    use super::{Connector, Transport};

    #[derive(Debug, Clone)]
    pub enum Step {
        Data(Vec<u8>),
        Fail(io::ErrorKind),
    }

    #[derive(Default)]
    struct Shared {
        scripts: VecDeque<VecDeque<Step>>,
        writes: Vec<Vec<u8>>,
        opens: usize,
        failing_opens: usize,
        fatal_open: bool,
        absent: bool,
    }

    #[derive(Clone, Default)]
    pub struct ScriptedConnector {
        shared: Arc<Mutex<Shared>>,
    }

    impl ScriptedConnector {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> MutexGuard<'_, Shared> {
            self.shared.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Queue the read script for the next `open`.
        pub fn push_session(&self, steps: Vec<Step>) {
            self.lock().scripts.push_back(steps.into());
        }

        pub fn fail_next_opens(&self, n: usize) {
            self.lock().failing_opens = n;
        }

        /// Make every following `open` fail with `InvalidInput`.
        pub fn fail_fatally(&self) {
            self.lock().fatal_open = true;
        }

        pub fn set_present(&self, present: bool) {
            self.lock().absent = !present;
        }

        pub fn open_count(&self) -> usize {
            self.lock().opens
        }

        /// Bytes written through the handle returned by the `n`th successful open.
        pub fn writes(&self, n: usize) -> Vec<u8> {
            self.lock().writes.get(n).cloned().unwrap_or_default()
        }
    }

    impl Connector for ScriptedConnector {
        fn open(&self, port_name: &str, _baud_rate: u32) -> io::Result<Box<dyn Transport>> {
            let mut shared = self.lock();
            if shared.fatal_open {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid port {}", port_name),
                ));
            }
            if shared.failing_opens > 0 {
                shared.failing_opens -= 1;
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
            }
            let steps = shared.scripts.pop_front().unwrap_or_default();
            let index = shared.writes.len();
            shared.writes.push(Vec::new());
            shared.opens += 1;
            Ok(Box::new(ScriptedTransport {
                shared: self.shared.clone(),
                index,
                steps,
            }))
        }

        fn is_present(&self, _port_name: &str) -> bool {
            !self.lock().absent
        }
    }

    struct ScriptedTransport {
        shared: Arc<Mutex<Shared>>,
        index: usize,
        steps: VecDeque<Step>,
    }

    impl Read for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Step::Data(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.steps.push_front(Step::Data(data.split_off(n)));
                    }
                    Ok(n)
                }
                Some(Step::Fail(kind)) => {
                    self.steps.push_front(Step::Fail(kind));
                    Err(io::Error::new(kind, "scripted failure"))
                }
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "idle")),
            }
        }
    }

    impl Write for ScriptedTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
            shared.writes[self.index].extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
