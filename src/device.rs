//! The analyzer as seen by the scanner: a [`SpectrumDevice`] trait plus the RF Explorer
//! implementation speaking its serial protocol.

use std::time::{Duration, Instant};

use crate::rfe_message::{AnalyzerConfig, ModelInfo, RfeMessage, MODE_SPECTRUM_ANALYZER};
use crate::rfe_terminal::{RfeTerminal, TerminalError};
use crate::scan_window::CapabilityLimits;
use crate::sweep::{Sweep, SweepSample};

/// How long a blocking poll waits for the next message.
const POLL_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Serial terminal error: {0}")]
    Terminal(#[from] TerminalError),

    #[error("Timed out after {timeout:?} waiting for {waiting_for}")]
    Timeout {
        waiting_for: &'static str,
        timeout: Duration,
    },

    #[error("Device has not reported its configuration yet")]
    NotConfigured,
}

/// Operations the scanner needs from a sweeping analyzer.
pub trait SpectrumDevice {
    fn reset(&mut self) -> Result<(), DeviceError>;

    fn await_reset_complete(&mut self, timeout: Duration) -> Result<(), DeviceError>;

    fn request_capabilities(&mut self) -> Result<(), DeviceError>;

    fn await_capabilities(&mut self, timeout: Duration) -> Result<CapabilityLimits, DeviceError>;

    fn is_analyzer_mode(&self) -> bool;

    /// Ask the device to sweep a new range. Takes effect with some later sweep.
    fn push_configuration(&mut self, start_mhz: f64, stop_mhz: f64) -> Result<(), DeviceError>;

    /// Process incoming messages and return the sweeps completed meanwhile.
    fn poll_once(&mut self, blocking: bool) -> Result<Vec<Sweep>, DeviceError>;

    fn close(&mut self);
}

fn mhz_to_khz(mhz: f64) -> u64 {
    (mhz * 1000.0).round().max(0.0) as u64
}

/// Build the payload of the `C2-F` configuration command.
pub fn configuration_command(start_mhz: f64, stop_mhz: f64, top_dbm: i32, bottom_dbm: i32) -> String {
    format!(
        "C2-F:{:07},{:07},{:04},{:04}",
        mhz_to_khz(start_mhz),
        mhz_to_khz(stop_mhz),
        top_dbm,
        bottom_dbm
    )
}

/// Convert one raw sweep frame using the configuration the device reported last.
pub fn decode_sweep(data: &[u8], config: &AnalyzerConfig) -> Sweep {
    let start_mhz = config.start_mhz();
    let step_mhz = config.step_mhz();
    let samples = data
        .iter()
        .enumerate()
        .map(|(i, raw)| SweepSample::new(start_mhz + step_mhz * i as f64, -f64::from(*raw) / 2.0))
        .collect();
    Sweep::new(start_mhz, samples)
}

#[derive(Debug)]
pub struct RfExplorer {
    terminal: RfeTerminal,
    config: Option<AnalyzerConfig>,
    model: Option<ModelInfo>,
    reset_complete: bool,
}

impl RfExplorer {
    const DEFAULT_TOP_DBM: i32 = -10;
    const DEFAULT_BOTTOM_DBM: i32 = -120;

    pub fn new(terminal: RfeTerminal) -> Self {
        Self {
            terminal,
            config: None,
            model: None,
            reset_complete: false,
        }
    }

    pub fn model(&self) -> Option<&ModelInfo> {
        self.model.as_ref()
    }

    pub fn config(&self) -> Option<&AnalyzerConfig> {
        self.config.as_ref()
    }

    fn handle(&mut self, message: RfeMessage, sweeps: &mut Vec<Sweep>) {
        match message {
            RfeMessage::ResetComplete => {
                log::debug!("Reset completed on {}", self.terminal.port());
                self.reset_complete = true;
            }
            RfeMessage::Config(config) => {
                log::debug!(
                    "Device configuration: start {}kHz, step {}Hz, {} points",
                    config.start_khz,
                    config.step_hz,
                    config.sweep_points
                );
                self.config = Some(config);
            }
            RfeMessage::Model(model) => {
                log::debug!(
                    "Device model {} (expansion {}), firmware {}",
                    model.main_model,
                    model.expansion_model,
                    model.firmware
                );
                self.model = Some(model);
            }
            RfeMessage::Sweep(data) => match &self.config {
                Some(config) => sweeps.push(decode_sweep(&data, config)),
                None => log::debug!("Dropping sweep received before configuration"),
            },
            RfeMessage::Other(line) => log::trace!("Ignoring device message: {}", line),
        }
    }

    /// Process messages until `done` holds or `timeout` elapsed.
    fn pump_until(
        &mut self,
        timeout: Duration,
        waiting_for: &'static str,
        done: impl Fn(&Self) -> bool,
    ) -> Result<Vec<Sweep>, DeviceError> {
        let started = Instant::now();
        let mut sweeps = Vec::new();
        while !done(self) {
            if started.elapsed() >= timeout {
                return Err(DeviceError::Timeout {
                    waiting_for,
                    timeout,
                });
            }
            for message in self.terminal.read_messages(Some(POLL_WAIT))? {
                self.handle(message, &mut sweeps);
            }
        }
        Ok(sweeps)
    }
}

impl SpectrumDevice for RfExplorer {
    fn reset(&mut self) -> Result<(), DeviceError> {
        log::info!("Resetting device...");
        self.reset_complete = false;
        self.terminal.send_command("r")?;
        Ok(())
    }

    fn await_reset_complete(&mut self, timeout: Duration) -> Result<(), DeviceError> {
        self.pump_until(timeout, "reset to complete", |device| device.reset_complete)?;
        Ok(())
    }

    fn request_capabilities(&mut self) -> Result<(), DeviceError> {
        self.config = None;
        self.model = None;
        self.terminal.send_command("C0")?;
        Ok(())
    }

    fn await_capabilities(&mut self, timeout: Duration) -> Result<CapabilityLimits, DeviceError> {
        self.pump_until(timeout, "configuration and model", |device| {
            device.config.is_some() && device.model.is_some()
        })?;

        let config = self.config.as_ref().ok_or(DeviceError::NotConfigured)?;
        Ok(CapabilityLimits::new(
            config.min_frequency_khz / 1000.0,
            config.max_frequency_khz / 1000.0,
            config.max_span_khz / 1000.0,
        ))
    }

    fn is_analyzer_mode(&self) -> bool {
        let generator = self.model.as_ref().is_some_and(ModelInfo::is_signal_generator);
        let analyzer_mode = self
            .config
            .as_ref()
            .is_some_and(|config| config.mode == MODE_SPECTRUM_ANALYZER);
        !generator && analyzer_mode
    }

    fn push_configuration(&mut self, start_mhz: f64, stop_mhz: f64) -> Result<(), DeviceError> {
        let (top, bottom) = self.config.as_ref().map_or(
            (Self::DEFAULT_TOP_DBM, Self::DEFAULT_BOTTOM_DBM),
            |config| (config.amplitude_top_dbm, config.amplitude_bottom_dbm),
        );
        let command = configuration_command(start_mhz, stop_mhz, top, bottom);
        log::debug!("Pushing configuration {}", command);
        self.terminal.send_command(&command)?;
        Ok(())
    }

    fn poll_once(&mut self, blocking: bool) -> Result<Vec<Sweep>, DeviceError> {
        let wait = blocking.then_some(POLL_WAIT);
        let mut sweeps = Vec::new();
        for message in self.terminal.read_messages(wait)? {
            self.handle(message, &mut sweeps);
        }
        Ok(sweeps)
    }

    fn close(&mut self) {
        log::debug!("Closing connection on {}", self.terminal.port());
        if let Err(e) = self.terminal.flush() {
            log::warn!("Failed to flush {}: {}", self.terminal.port(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(start_khz: f64, step_hz: f64) -> AnalyzerConfig {
        AnalyzerConfig {
            start_khz,
            step_hz,
            amplitude_top_dbm: -10,
            amplitude_bottom_dbm: -120,
            sweep_points: 3,
            expansion_active: false,
            mode: MODE_SPECTRUM_ANALYZER,
            min_frequency_khz: 50.0,
            max_frequency_khz: 200_000.0,
            max_span_khz: 10.0,
        }
    }

    #[test]
    fn test_configuration_command() {
        assert_eq!(
            configuration_command(0.05, 0.06, -10, -120),
            "C2-F:0000050,0000060,-010,-120"
        );
        assert_eq!(
            configuration_command(2400.0, 2485.5, 0, -100),
            "C2-F:2400000,2485500,0000,-100"
        );
    }

    #[test]
    fn test_configuration_command_rounds_to_khz() {
        // 0.05 + 0.01 is not exactly 0.06 in binary.
        assert_eq!(
            configuration_command(0.05 + 0.01, 0.05 + 0.02, -10, -120),
            "C2-F:0000060,0000070,-010,-120"
        );
    }

    #[cfg(unix)]
    mod over_pty {
        use super::super::*;
        use serialport::TTYPort;
        use std::io::{Read, Write};

        const TIMEOUT: Duration = Duration::from_secs(1);

        fn connected() -> (TTYPort, RfExplorer) {
            let (master, slave) = TTYPort::pair().unwrap();
            let terminal = RfeTerminal::from_port(Box::new(slave), "pty").unwrap();
            (master, RfExplorer::new(terminal))
        }

        fn config_line(start_khz: u32, mode: u16) -> String {
            format!(
                "#C2-F:{start_khz:07},0005000,-010,-120,0003,0,{mode:03},0000050,0200000,0000010,00003,0000,000\r\n"
            )
        }

        fn sweep_frame(samples: &[u8]) -> Vec<u8> {
            let mut frame = vec![b'$', b'S', samples.len() as u8];
            frame.extend_from_slice(samples);
            frame.extend_from_slice(b"\r\n");
            frame
        }

        fn handshake(master: &mut TTYPort, device: &mut RfExplorer, model: u16, mode: u16) -> CapabilityLimits {
            device.reset().unwrap();
            master.write_all(b"RF Explorer (C) Ariel Rocholl 2010-2020\r\n").unwrap();
            device.await_reset_complete(TIMEOUT).unwrap();

            device.request_capabilities().unwrap();
            master.write_all(config_line(50, mode).as_bytes()).unwrap();
            master
                .write_all(format!("#C2-M:{model:03},255,01.33\r\n").as_bytes())
                .unwrap();
            device.await_capabilities(TIMEOUT).unwrap()
        }

        fn poll_sweeps(device: &mut RfExplorer, count: usize) -> Vec<Sweep> {
            let started = Instant::now();
            let mut sweeps = Vec::new();
            while sweeps.len() < count && started.elapsed() < TIMEOUT {
                sweeps.extend(device.poll_once(true).unwrap());
            }
            sweeps
        }

        #[test]
        fn test_handshake_reads_limits_in_mhz() {
            let (mut master, mut device) = connected();
            let limits = handshake(&mut master, &mut device, 4, MODE_SPECTRUM_ANALYZER);

            assert_eq!(limits, CapabilityLimits::new(0.05, 200.0, 0.01));
            assert!(device.is_analyzer_mode());

            let mut sent = [0u8; 7];
            master.read_exact(&mut sent).unwrap();
            assert_eq!(&sent, b"#\x03r#\x04C0");
        }

        #[test]
        fn test_signal_generator_is_not_an_analyzer() {
            let (mut master, mut device) = connected();
            handshake(&mut master, &mut device, 60, MODE_SPECTRUM_ANALYZER);
            assert!(!device.is_analyzer_mode());
        }

        #[test]
        fn test_other_mode_is_not_an_analyzer() {
            let (mut master, mut device) = connected();
            handshake(&mut master, &mut device, 4, 1);
            assert!(!device.is_analyzer_mode());
        }

        #[test]
        fn test_reset_times_out_without_banner() {
            let (_master, mut device) = connected();
            device.reset().unwrap();
            assert!(matches!(
                device.await_reset_complete(Duration::from_millis(100)),
                Err(DeviceError::Timeout { waiting_for: "reset to complete", .. })
            ));
        }

        #[test]
        fn test_capabilities_time_out_without_model() {
            let (mut master, mut device) = connected();
            device.request_capabilities().unwrap();
            master
                .write_all(config_line(50, MODE_SPECTRUM_ANALYZER).as_bytes())
                .unwrap();
            assert!(matches!(
                device.await_capabilities(Duration::from_millis(200)),
                Err(DeviceError::Timeout { .. })
            ));
        }

        #[test]
        fn test_sweeps_carry_latest_reported_start() {
            let (mut master, mut device) = connected();
            handshake(&mut master, &mut device, 4, MODE_SPECTRUM_ANALYZER);

            master.write_all(&sweep_frame(&[140, 124, 150])).unwrap();
            let sweeps = poll_sweeps(&mut device, 1);
            assert_eq!(sweeps.len(), 1);
            assert_eq!(sweeps[0].reported_start_mhz, 0.05);
            assert_eq!(sweeps[0].samples[1].amplitude_dbm, -62.0);

            device.push_configuration(0.06, 0.07).unwrap();
            master
                .write_all(config_line(60, MODE_SPECTRUM_ANALYZER).as_bytes())
                .unwrap();
            master.write_all(&sweep_frame(&[130, 120, 110])).unwrap();
            let sweeps = poll_sweeps(&mut device, 1);
            assert_eq!(sweeps.len(), 1);
            assert_eq!(sweeps[0].reported_start_mhz, 0.06);
            assert_eq!(sweeps[0].samples[2].amplitude_dbm, -55.0);
        }

        #[test]
        fn test_sweep_before_configuration_is_dropped() {
            let (mut master, mut device) = connected();
            master.write_all(&sweep_frame(&[140, 124, 150])).unwrap();
            assert!(poll_sweeps(&mut device, 1).is_empty());
        }
    }

    #[test]
    fn test_decode_sweep() {
        let sweep = decode_sweep(&[140, 124, 150], &config(50.0, 5000.0));
        assert_eq!(sweep.reported_start_mhz, 0.05);
        assert_eq!(sweep.samples.len(), 3);
        assert_eq!(sweep.samples[0].amplitude_dbm, -70.0);
        assert_eq!(sweep.samples[1].amplitude_dbm, -62.0);
        assert_eq!(sweep.samples[2].amplitude_dbm, -75.0);
        assert!((sweep.samples[1].frequency_mhz - 0.055).abs() < 1e-12);
        assert!((sweep.samples[2].frequency_mhz - 0.060).abs() < 1e-12);
    }
}
