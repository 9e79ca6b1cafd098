//! Waiting for the first sweep taken with the configuration that was just pushed.
//!
//! After a configuration push the analyzer keeps delivering sweeps of the previous
//! range for a while. Those are recognized by their start frequency and dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::device::{DeviceError, SpectrumDevice};
use crate::scan_window::ScanWindow;
use crate::session::DeviceSession;
use crate::sweep::Sweep;

/// How far a sweep's start may be off the requested one and still count as current.
pub const START_TOLERANCE_MHZ: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncState {
    AwaitingMatch { target_start_mhz: f64 },
    Matched,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("No sweep starting at {target_start_mhz}MHz within {timeout:?}")]
    Timeout {
        target_start_mhz: f64,
        timeout: Duration,
    },

    #[error("Synchronizer is not waiting for a configuration")]
    NotArmed,
}

#[derive(Debug)]
pub struct SweepSynchronizer {
    state: SyncState,
    tolerance_mhz: f64,
    discarded: u64,
}

impl Default for SweepSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SweepSynchronizer {
    pub fn new() -> Self {
        Self::with_tolerance(START_TOLERANCE_MHZ)
    }

    pub fn with_tolerance(tolerance_mhz: f64) -> Self {
        Self {
            state: SyncState::Matched,
            tolerance_mhz,
            discarded: 0,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Stale sweeps dropped so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Start waiting for a sweep of `window`.
    pub fn arm(&mut self, window: &ScanWindow) {
        self.state = SyncState::AwaitingMatch {
            target_start_mhz: window.start_mhz(),
        };
    }

    /// Push `window` to the device and wait for its sweeps from now on.
    pub fn configure<D: SpectrumDevice>(
        &mut self,
        session: &mut DeviceSession<D>,
        window: &ScanWindow,
    ) -> Result<(), DeviceError> {
        session.push_configuration(window)?;
        self.arm(window);
        Ok(())
    }

    /// Hand one sweep to the synchronizer. Returns it back if it is the awaited one.
    pub fn offer(&mut self, sweep: Sweep) -> Option<Sweep> {
        let SyncState::AwaitingMatch { target_start_mhz } = self.state else {
            return None;
        };

        if (sweep.reported_start_mhz - target_start_mhz).abs() <= self.tolerance_mhz {
            self.state = SyncState::Matched;
            Some(sweep)
        } else {
            log::debug!(
                "Discarding stale sweep starting at {}MHz, waiting for {}MHz",
                sweep.reported_start_mhz,
                target_start_mhz
            );
            self.discarded += 1;
            None
        }
    }

    /// Poll the session until the awaited sweep shows up.
    ///
    /// Returns `Ok(None)` when `shutdown` got raised while waiting.
    pub fn wait_for_match<D: SpectrumDevice>(
        &mut self,
        session: &mut DeviceSession<D>,
        timeout: Duration,
        shutdown: &AtomicBool,
    ) -> Result<Option<Sweep>, SyncError> {
        let SyncState::AwaitingMatch { target_start_mhz } = self.state else {
            return Err(SyncError::NotArmed);
        };

        let started = Instant::now();
        loop {
            while let Some(sweep) = session.next_sweep() {
                if let Some(sweep) = self.offer(sweep) {
                    return Ok(Some(sweep));
                }
            }

            if shutdown.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if started.elapsed() >= timeout {
                return Err(SyncError::Timeout {
                    target_start_mhz,
                    timeout,
                });
            }

            session.poll_messages(true)?;
        }
    }
}
