//! Connection lifecycle of an analyzer: reset, handshake, capability limits, and the
//! queue of sweeps received since the last look.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use crate::device::{DeviceError, SpectrumDevice};
use crate::scan_window::{CapabilityLimits, ScanWindow};
use crate::sweep::Sweep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub reset_timeout: Duration,
    /// Pause after the reset before the device is asked for its configuration.
    pub settle: Duration,
    pub capabilities_timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            reset_timeout: Duration::from_secs(10),
            settle: Duration::from_secs(2),
            capabilities_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Device is not a spectrum analyzer")]
    NotAnalyzer,
}

#[derive(Debug)]
pub struct DeviceSession<D: SpectrumDevice> {
    device: D,
    limits: CapabilityLimits,
    pending: VecDeque<Sweep>,
}

impl<D: SpectrumDevice> DeviceSession<D> {
    /// Reset the device and run the capability handshake.
    ///
    /// The device is closed again when any step fails.
    pub fn open(mut device: D, handshake: &HandshakeConfig) -> Result<Self, SessionError> {
        match Self::handshake(&mut device, handshake) {
            Ok(limits) => {
                log::info!(
                    "Device limits: {}-{}MHz, max span {}MHz",
                    limits.min_frequency_mhz,
                    limits.max_frequency_mhz,
                    limits.max_span_mhz
                );
                Ok(Self {
                    device,
                    limits,
                    pending: VecDeque::new(),
                })
            }
            Err(e) => {
                device.close();
                Err(e)
            }
        }
    }

    fn handshake(device: &mut D, handshake: &HandshakeConfig) -> Result<CapabilityLimits, SessionError> {
        device.reset()?;
        device.await_reset_complete(handshake.reset_timeout)?;
        thread::sleep(handshake.settle);

        device.request_capabilities()?;
        let limits = device.await_capabilities(handshake.capabilities_timeout)?;

        if !device.is_analyzer_mode() {
            return Err(SessionError::NotAnalyzer);
        }
        Ok(limits)
    }

    pub fn limits(&self) -> &CapabilityLimits {
        &self.limits
    }

    pub fn push_configuration(&mut self, window: &ScanWindow) -> Result<(), DeviceError> {
        self.device
            .push_configuration(window.start_mhz(), window.stop_mhz())
    }

    /// Drain pending device messages into the sweep queue, returning how many sweeps arrived.
    pub fn poll_messages(&mut self, blocking: bool) -> Result<usize, DeviceError> {
        let sweeps = self.device.poll_once(blocking)?;
        let received = sweeps.len();
        self.pending.extend(sweeps);
        Ok(received)
    }

    pub fn next_sweep(&mut self) -> Option<Sweep> {
        self.pending.pop_front()
    }

    #[cfg(test)]
    pub(crate) fn device(&self) -> &D {
        &self.device
    }

    pub fn close(mut self) {
        if !self.pending.is_empty() {
            log::debug!("Discarding {} unprocessed sweeps", self.pending.len());
        }
        self.device.close();
    }
}
