use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use crate::rfe_message::{MessageFramer, RfeMessage};

const READ_TIMEOUT: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command '{command}' is too long to frame ({len} bytes)")]
    CommandTooLong { command: String, len: usize },
}

/// Frame a command the way the analyzer expects it: `#`, total length byte, payload.
pub fn frame_command(command: &str) -> Result<Vec<u8>, TerminalError> {
    let len = u8::try_from(command.len() + 2).map_err(|_| TerminalError::CommandTooLong {
        command: command.to_string(),
        len: command.len(),
    })?;

    let mut framed = Vec::with_capacity(command.len() + 2);
    framed.push(b'#');
    framed.push(len);
    framed.extend_from_slice(command.as_bytes());
    Ok(framed)
}

/// A read that returned nothing without the link failing. Signals such as Ctrl-C
/// interrupt a blocked read.
fn is_idle_read(error: &std::io::Error) -> bool {
    matches!(error.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted)
}

/// Byte-level connection to an RF Explorer.
pub struct RfeTerminal {
    serial: Box<dyn SerialPort>,
    framer: MessageFramer,
    port: String,
}

impl std::fmt::Debug for RfeTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RfeTerminal")
            .field("port", &self.port)
            .field("pending", &self.framer.pending())
            .finish_non_exhaustive()
    }
}

impl RfeTerminal {
    /// Open the serial port and discard whatever is still buffered.
    pub fn new(port: &str, baud_rate: u32) -> Result<Self, TerminalError> {
        let serial = serialport::new(port, baud_rate)
            .timeout(READ_TIMEOUT)
            .open()?;
        Self::from_port(serial, port)
    }

    /// Take over an already opened port.
    pub fn from_port(mut serial: Box<dyn SerialPort>, port: &str) -> Result<Self, TerminalError> {
        serial.set_timeout(READ_TIMEOUT)?;

        let mut terminal = Self {
            serial,
            framer: MessageFramer::new(),
            port: port.to_string(),
        };

        terminal.flush()?;
        Ok(terminal)
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Flush the serial buffer
    pub fn flush(&mut self) -> Result<(), TerminalError> {
        self.serial.clear(serialport::ClearBuffer::All)?;
        self.framer = MessageFramer::new();
        Ok(())
    }

    pub fn send_command(&mut self, command: &str) -> Result<(), TerminalError> {
        log::trace!("Sending command '{}' to {}", command, self.port);
        self.serial.write_all(&frame_command(command)?)?;
        self.serial.flush()?;
        Ok(())
    }

    /// Read whatever has arrived and return the complete messages.
    ///
    /// With `wait` set, keep reading until at least one message is complete or the
    /// wait elapsed.
    pub fn read_messages(&mut self, wait: Option<Duration>) -> Result<Vec<RfeMessage>, TerminalError> {
        let started = Instant::now();
        let mut messages = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            match self.serial.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => self.framer.push(&chunk[..n]),
                Err(e) if is_idle_read(&e) => {}
                Err(e) => return Err(e.into()),
            }

            while let Some(message) = self.framer.next_message() {
                messages.push(message);
            }

            let keep_waiting = wait.is_some_and(|w| started.elapsed() < w);
            if !messages.is_empty() || !keep_waiting {
                return Ok(messages);
            }
        }
    }
}
