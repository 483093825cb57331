//! Line-oriented serial link and the opener that produces it.
//!
//! The transport only talks to these traits, so tests swap in an in-memory fake.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, trace};

use crate::error::TransportError;

#[async_trait]
pub trait SerialLink: Send {
    /// Device path this link was opened on.
    fn port(&self) -> &str;

    /// Drop anything already received so a late reply is never matched to the next command.
    fn clear_input(&mut self) -> io::Result<()>;

    async fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Next line with the terminator and surrounding whitespace stripped.
    async fn read_line(&mut self) -> io::Result<String>;
}

#[async_trait]
pub trait SerialOpener: Send + Sync {
    async fn open(&self, port: &str, baud: u32) -> Result<Box<dyn SerialLink>, TransportError>;
}

/// Real tty opener backed by `tokio-serial`.
pub struct TtyOpener;

struct TtyLink {
    port: String,
    stream: BufReader<SerialStream>,
}

fn map_open_error(port: &str, err: tokio_serial::Error) -> TransportError {
    let lower = err.description.to_lowercase();
    match err.kind {
        tokio_serial::ErrorKind::NoDevice => TransportError::DeviceNotFound { tried: port.to_string() },
        tokio_serial::ErrorKind::Io(io::ErrorKind::NotFound) => {
            TransportError::DeviceNotFound { tried: port.to_string() }
        }
        tokio_serial::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            TransportError::PermissionDenied { port: port.to_string() }
        }
        _ if lower.contains("permission") || lower.contains("denied") || lower.contains("not permitted") => {
            TransportError::PermissionDenied { port: port.to_string() }
        }
        _ if lower.contains("no such file") => TransportError::DeviceNotFound { tried: port.to_string() },
        _ => TransportError::Io(format!("{}: {}", port, err)),
    }
}

#[async_trait]
impl SerialOpener for TtyOpener {
    async fn open(&self, port: &str, baud: u32) -> Result<Box<dyn SerialLink>, TransportError> {
        debug!("Opening serial port {} at {} baud", port, baud);
        // open(2) on a wedged USB CDC device can block; keep it off the reactor so the caller's timeout fires.
        let path = port.to_string();
        let stream = tokio::task::spawn_blocking(move || tokio_serial::new(path, baud).open_native_async())
            .await
            .map_err(|e| TransportError::Io(format!("{}: open task failed: {}", port, e)))?
            .map_err(|e| map_open_error(port, e))?;

        if let Err(e) = stream.clear(ClearBuffer::All) {
            trace!("Could not clear buffers on {}: {}", port, e);
        }

        Ok(Box::new(TtyLink {
            port: port.to_string(),
            stream: BufReader::new(stream),
        }))
    }
}

#[async_trait]
impl SerialLink for TtyLink {
    fn port(&self) -> &str {
        &self.port
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let buffered = self.stream.buffer().len();
        self.stream.consume(buffered);
        self.stream
            .get_ref()
            .clear(ClearBuffer::Input)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await
    }

    async fn read_line(&mut self) -> io::Result<String> {
        let mut buf = String::new();
        let n = self.stream.read_line(&mut buf).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial port closed"));
        }
        Ok(buf.trim().to_string())
    }
}
