//! The acquisition loop: configure a segment, wait for its sweep, report the peak, step on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::device::{DeviceError, SpectrumDevice};
use crate::scan_window::{step, validate, CeilingPolicy, ScanRequest, ScanWindow, SettingsError, Step};
use crate::session::DeviceSession;
use crate::sweep::{extract_peak, Measurement, PeakSample};
use crate::synchronizer::{SweepSynchronizer, SyncError};
use crate::telemetry::{TelemetryEmitter, TelemetryStats};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScannerConfig {
    pub request: ScanRequest,
    pub ceiling_policy: CeilingPolicy,
    /// How long to wait for a matching sweep before pushing the configuration again.
    pub sync_timeout: Duration,
    /// Consecutive sync timeouts tolerated for one segment.
    pub max_sync_retries: u32,
}

impl ScannerConfig {
    pub fn new(request: ScanRequest) -> Self {
        Self {
            request,
            ceiling_policy: CeilingPolicy::default(),
            sync_timeout: Duration::from_secs(5),
            max_sync_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub segments: u64,
    /// Completed passes over the whole range.
    pub passes: u64,
    pub stale_discarded: u64,
    pub empty_sweeps: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Synchronization error: {0}")]
    Sync(#[from] SyncError),

    #[error("Lost the device: no sweep for {start_mhz}MHz after {attempts} attempts")]
    SyncLost { start_mhz: f64, attempts: u32 },
}

impl ScanError {
    /// Everything but a rejected configuration ends the run with a failure.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Settings(_))
    }
}

pub struct Scanner<D: SpectrumDevice> {
    session: DeviceSession<D>,
    emitter: TelemetryEmitter,
    synchronizer: SweepSynchronizer,
    config: ScannerConfig,
}

impl<D: SpectrumDevice> Scanner<D> {
    pub fn new(session: DeviceSession<D>, emitter: TelemetryEmitter, config: ScannerConfig) -> Self {
        Self {
            session,
            emitter,
            synchronizer: SweepSynchronizer::new(),
            config,
        }
    }

    /// Scan until `shutdown` is raised, the ceiling is hit with [`CeilingPolicy::Terminate`],
    /// or a fatal error occurs.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<ScanSummary, ScanError> {
        let request = self.config.request;
        log::info!("User settings: {}", request);

        let mut window = match validate(&request, self.session.limits()) {
            Ok(window) => window,
            Err(e) => {
                if let SettingsError::SpanExceedsDevice { max, .. } = e {
                    log::error!("Max Span size: {}MHz", max);
                }
                return Err(e.into());
            }
        };
        let mut summary = ScanSummary::default();

        while !shutdown.load(Ordering::SeqCst) {
            let _segment = tracing::debug_span!(
                "segment",
                start_mhz = window.start_mhz(),
                stop_mhz = window.stop_mhz()
            )
            .entered();

            let Some(peak) = self.measure(&window, shutdown, &mut summary)? else {
                break;
            };

            summary.segments += 1;
            log::info!(
                "Freq range[{}]: {}-{}MHz",
                summary.segments,
                window.start_mhz(),
                window.stop_mhz()
            );
            log::info!("     Peak: {:.3}MHz  {}dBm", peak.center_frequency_mhz, peak.amplitude_dbm);
            self.emitter.emit(Measurement::new(&window, peak));

            window = match step(&window, request.ceiling_mhz()) {
                Step::Next(next) => next,
                Step::Collapsed => {
                    summary.passes += 1;
                    match self.config.ceiling_policy {
                        CeilingPolicy::Restart => {
                            log::info!(
                                "Reached {}MHz, restarting from {}MHz",
                                request.ceiling_mhz(),
                                request.start_mhz
                            );
                            validate(&request, self.session.limits())?
                        }
                        CeilingPolicy::Terminate => {
                            log::info!("Reached {}MHz, scan complete", request.ceiling_mhz());
                            break;
                        }
                    }
                }
            };
        }

        summary.stale_discarded = self.synchronizer.discarded();
        Ok(summary)
    }

    /// Configure `window` and wait for the peak of its first usable sweep.
    ///
    /// Returns `Ok(None)` on shutdown.
    fn measure(
        &mut self,
        window: &ScanWindow,
        shutdown: &AtomicBool,
        summary: &mut ScanSummary,
    ) -> Result<Option<PeakSample>, ScanError> {
        self.synchronizer.configure(&mut self.session, window)?;
        let mut attempts = 1;

        loop {
            let sweep = match self.synchronizer.wait_for_match(
                &mut self.session,
                self.config.sync_timeout,
                shutdown,
            ) {
                Ok(Some(sweep)) => sweep,
                Ok(None) => return Ok(None),
                Err(SyncError::Timeout { timeout, .. }) => {
                    if attempts > self.config.max_sync_retries {
                        return Err(ScanError::SyncLost {
                            start_mhz: window.start_mhz(),
                            attempts,
                        });
                    }
                    log::warn!(
                        "No sweep for {} within {:?}, pushing configuration again",
                        window,
                        timeout
                    );
                    attempts += 1;
                    self.synchronizer.configure(&mut self.session, window)?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match extract_peak(&sweep) {
                Ok(peak) => return Ok(Some(peak)),
                Err(e) => {
                    log::warn!("Skipping sweep for {}: {}", window, e);
                    summary.empty_sweeps += 1;
                    self.synchronizer.arm(window);
                }
            }
        }
    }

    /// Flush telemetry and close the device.
    pub fn shutdown(self) -> TelemetryStats {
        let stats = self.emitter.shutdown();
        self.session.close();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan_window::CapabilityLimits;
    use crate::session::tests::{quick_handshake, MockDevice};
    use crate::sweep::{Sweep, SweepSample};
    use crate::telemetry::tests::RecordingSink;

    fn limits() -> CapabilityLimits {
        CapabilityLimits::new(0.05, 200.0, 0.01)
    }

    fn sweep(start: f64, samples: &[(f64, f64)]) -> Sweep {
        Sweep::new(
            start,
            samples.iter().map(|&(f, a)| SweepSample::new(f, a)).collect(),
        )
    }

    fn scanner(
        device: MockDevice,
        request: ScanRequest,
        policy: CeilingPolicy,
    ) -> (Scanner<MockDevice>, RecordingSink) {
        let session = DeviceSession::open(device, &quick_handshake()).unwrap();
        let sink = RecordingSink::default();
        let emitter = TelemetryEmitter::spawn(sink.clone(), 16).unwrap();
        let config = ScannerConfig {
            request,
            ceiling_policy: policy,
            sync_timeout: Duration::from_millis(20),
            max_sync_retries: 2,
        };
        (Scanner::new(session, emitter, config), sink)
    }

    #[test]
    fn test_first_segment_skips_stale_sweep() {
        let device = MockDevice::analyzer(limits()).with_batches(vec![
            vec![sweep(0.0, &[(0.0, -50.0)])],
            vec![sweep(0.05, &[(0.050, -70.0), (0.055, -62.0), (0.060, -75.0)])],
        ]);
        // Ceiling right after the first segment so the run terminates on its own.
        let request = ScanRequest::new(0.01, 0.05, 0.05 + 0.01);
        let (mut scanner, sink) = scanner(device, request, CeilingPolicy::Terminate);

        let summary = scanner.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(summary.segments, 1);
        assert_eq!(summary.passes, 1);
        assert_eq!(summary.stale_discarded, 1);
        assert_eq!(scanner.session.device().pushed.len(), 1);

        let stats = scanner.shutdown();
        assert_eq!(stats.written, 1);
        let written = sink.written.lock().unwrap();
        assert_eq!(written[0].start_mhz, 0.05);
        assert!((written[0].stop_mhz - 0.06).abs() < 1e-12);
        assert_eq!(written[0].peak.center_frequency_mhz, 0.055);
        assert_eq!(written[0].peak.amplitude_dbm, -62.0);
    }

    #[test]
    fn test_steps_through_range_and_terminates() {
        let device = MockDevice::analyzer(limits()).with_batches(vec![
            vec![sweep(0.0, &[(0.0, -50.0)])],
            vec![sweep(0.05, &[(0.050, -70.0), (0.055, -62.0), (0.060, -75.0)])],
            vec![sweep(0.05, &[(0.050, -71.0)]), sweep(0.06, &[(0.061, -90.0), (0.065, -80.0)])],
            vec![sweep(0.07, &[(0.071, -85.0)])],
        ]);
        let request = ScanRequest::new(0.01, 0.05, 0.075);
        let (mut scanner, sink) = scanner(device, request, CeilingPolicy::Terminate);

        let summary = scanner.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(summary.segments, 3);
        assert_eq!(summary.stale_discarded, 2);

        let pushed = scanner.session.device().pushed.clone();
        assert_eq!(pushed.len(), 3);
        assert!((pushed[1].0 - 0.06).abs() < 1e-12);
        assert!((pushed[1].1 - 0.07).abs() < 1e-12);
        // Last segment is clamped to the ceiling.
        assert_eq!(pushed[2].1, 0.075);

        scanner.shutdown();
        assert_eq!(sink.written.lock().unwrap()[1].peak.center_frequency_mhz, 0.065);
    }

    #[test]
    fn test_restart_policy_revalidates_from_start() {
        let device = MockDevice::analyzer(limits()).with_batches(vec![
            vec![sweep(0.05, &[(0.055, -60.0)])],
            vec![sweep(0.05, &[(0.052, -61.0)])],
        ]);
        let request = ScanRequest::new(0.01, 0.05, 0.05 + 0.01);
        let (mut scanner, _sink) = scanner(device, request, CeilingPolicy::Restart);

        // After two segments the mock goes quiet and the retries run out.
        let result = scanner.run(&AtomicBool::new(false));
        assert!(matches!(result, Err(ScanError::SyncLost { attempts: 3, .. })));

        let pushed = &scanner.session.device().pushed;
        // Two measured segments, then the original push plus two retries.
        assert_eq!(pushed.len(), 5);
        assert!(pushed.iter().all(|&(start, _)| start == 0.05));
        scanner.shutdown();
    }

    #[test]
    fn test_empty_sweep_is_skipped() {
        let device = MockDevice::analyzer(limits()).with_batches(vec![
            vec![sweep(0.05, &[])],
            vec![sweep(0.05, &[(0.057, -55.5)])],
        ]);
        let request = ScanRequest::new(0.01, 0.05, 0.05 + 0.01);
        let (mut scanner, sink) = scanner(device, request, CeilingPolicy::Terminate);

        let summary = scanner.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(summary.empty_sweeps, 1);
        assert_eq!(summary.segments, 1);
        assert_eq!(scanner.session.device().pushed.len(), 1);

        scanner.shutdown();
        assert_eq!(sink.written.lock().unwrap()[0].peak.amplitude_dbm, -55.5);
    }

    #[test]
    fn test_invalid_settings_do_not_touch_device() {
        let device = MockDevice::analyzer(limits());
        let request = ScanRequest::new(0.5, 0.05, 200.0);
        let (mut scanner, _sink) = scanner(device, request, CeilingPolicy::Restart);

        let result = scanner.run(&AtomicBool::new(false));
        match result {
            Err(e @ ScanError::Settings(SettingsError::SpanExceedsDevice { .. })) => {
                assert!(!e.is_fatal());
            }
            other => unreachable!("unexpected result {other:?}"),
        }
        assert!(scanner.session.device().pushed.is_empty());
        assert_eq!(scanner.session.device().polls, 0);
        scanner.shutdown();
    }

    #[test]
    fn test_shutdown_before_first_segment() {
        let device = MockDevice::analyzer(limits());
        let request = ScanRequest::new(0.01, 0.05, 200.0);
        let (mut scanner, sink) = scanner(device, request, CeilingPolicy::Restart);

        let summary = scanner.run(&AtomicBool::new(true)).unwrap();
        assert_eq!(summary, ScanSummary::default());
        assert!(scanner.session.device().pushed.is_empty());

        let stats = scanner.shutdown();
        assert_eq!(stats.written, 0);
        assert!(sink.written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_sync_lost_is_fatal() {
        let error = ScanError::SyncLost {
            start_mhz: 1.0,
            attempts: 3,
        };
        assert!(error.is_fatal());
    }
}
