use std::time::SystemTime;

use crate::scan_window::ScanWindow;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepSample {
    pub frequency_mhz: f64,
    pub amplitude_dbm: f64,
}

impl SweepSample {
    pub fn new(frequency_mhz: f64, amplitude_dbm: f64) -> Self {
        Self {
            frequency_mhz,
            amplitude_dbm,
        }
    }
}

/// One complete scan returned by the analyzer, tagged with the start frequency
/// the analyzer was configured for when it produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sweep {
    pub reported_start_mhz: f64,
    pub samples: Vec<SweepSample>,
}

impl Sweep {
    pub fn new(reported_start_mhz: f64, samples: Vec<SweepSample>) -> Self {
        Self {
            reported_start_mhz,
            samples,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakSample {
    /// Truncated to kHz resolution.
    pub center_frequency_mhz: f64,
    pub amplitude_dbm: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub start_mhz: f64,
    pub stop_mhz: f64,
    pub peak: PeakSample,
    pub acquired_at: SystemTime,
}

impl Measurement {
    pub fn new(window: &ScanWindow, peak: PeakSample) -> Self {
        Self {
            start_mhz: window.start_mhz(),
            stop_mhz: window.stop_mhz(),
            peak,
            acquired_at: SystemTime::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeakError {
    #[error("Sweep contains no samples")]
    EmptySweep,
}

/// Truncate (not round) a frequency to three decimals.
pub fn truncate_mhz(value: f64) -> f64 {
    (value * 1000.0).floor() / 1000.0
}

/// Find the strongest sample of a sweep. On equal amplitudes the first one wins.
pub fn extract_peak(sweep: &Sweep) -> Result<PeakSample, PeakError> {
    #[cfg(feature = "cpu-profiling")]
    let _span = tracy_client::Client::running()
        .map(|client| client.span(tracy_client::span_location!("extract_peak"), 0));

    let mut samples = sweep.samples.iter();
    let first = samples.next().ok_or(PeakError::EmptySweep)?;
    let peak = samples.fold(first, |best, sample| {
        if sample.amplitude_dbm > best.amplitude_dbm {
            sample
        } else {
            best
        }
    });

    Ok(PeakSample {
        center_frequency_mhz: truncate_mhz(peak.frequency_mhz),
        amplitude_dbm: peak.amplitude_dbm,
    })
}
