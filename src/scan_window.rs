//! Scan window bookkeeping: validating the requested range against the analyzer's
//! limits and stepping segment by segment up to the scan ceiling.

use std::fmt;

/// Frequency bounds reported by the analyzer during the configuration handshake.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapabilityLimits {
    pub min_frequency_mhz: f64,
    pub max_frequency_mhz: f64,
    pub max_span_mhz: f64,
}

impl CapabilityLimits {
    pub fn new(min_frequency_mhz: f64, max_frequency_mhz: f64, max_span_mhz: f64) -> Self {
        Self {
            min_frequency_mhz,
            max_frequency_mhz,
            max_span_mhz,
        }
    }
}

/// The range the operator asked for. `stop_mhz` is also the ceiling the stepper clamps to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanRequest {
    pub span_mhz: f64,
    pub start_mhz: f64,
    pub stop_mhz: f64,
}

impl ScanRequest {
    pub fn new(span_mhz: f64, start_mhz: f64, stop_mhz: f64) -> Self {
        Self {
            span_mhz,
            start_mhz,
            stop_mhz,
        }
    }

    pub fn ceiling_mhz(&self) -> f64 {
        self.stop_mhz
    }
}

impl fmt::Display for ScanRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Span: {}MHz - Start freq: {}MHz - Stop freq: {}MHz",
            self.span_mhz, self.start_mhz, self.stop_mhz
        )
    }
}

/// The segment currently configured on the analyzer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanWindow {
    start_mhz: f64,
    stop_mhz: f64,
    span_mhz: f64,
}

impl ScanWindow {
    pub fn start_mhz(&self) -> f64 {
        self.start_mhz
    }

    pub fn stop_mhz(&self) -> f64 {
        self.stop_mhz
    }

    pub fn span_mhz(&self) -> f64 {
        self.span_mhz
    }

    #[cfg(test)]
    pub(crate) fn from_parts(start_mhz: f64, stop_mhz: f64, span_mhz: f64) -> Self {
        Self {
            start_mhz,
            stop_mhz,
            span_mhz,
        }
    }
}

impl fmt::Display for ScanWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}MHz", self.start_mhz, self.stop_mhz)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("Span {requested}MHz exceeds the device maximum span of {max}MHz")]
    SpanExceedsDevice { requested: f64, max: f64 },

    #[error("Start frequency {requested}MHz is below the device minimum of {min}MHz")]
    StartBelowDevice { requested: f64, min: f64 },

    #[error("Stop frequency {requested}MHz is above the device maximum of {max}MHz")]
    StopAboveDevice { requested: f64, max: f64 },

    #[error("Start {start}MHz plus span {span}MHz overshoots the requested stop of {stop}MHz")]
    SpanOvershootsStop { start: f64, span: f64, stop: f64 },
}

/// Check the requested range against the device limits.
///
/// The checks run in a fixed order and the first failing one is reported.
pub fn validate(request: &ScanRequest, limits: &CapabilityLimits) -> Result<ScanWindow, SettingsError> {
    if request.span_mhz > limits.max_span_mhz {
        return Err(SettingsError::SpanExceedsDevice {
            requested: request.span_mhz,
            max: limits.max_span_mhz,
        });
    }
    if request.start_mhz < limits.min_frequency_mhz {
        return Err(SettingsError::StartBelowDevice {
            requested: request.start_mhz,
            min: limits.min_frequency_mhz,
        });
    }
    if request.stop_mhz > limits.max_frequency_mhz {
        return Err(SettingsError::StopAboveDevice {
            requested: request.stop_mhz,
            max: limits.max_frequency_mhz,
        });
    }
    if request.start_mhz + request.span_mhz > request.stop_mhz {
        return Err(SettingsError::SpanOvershootsStop {
            start: request.start_mhz,
            span: request.span_mhz,
            stop: request.stop_mhz,
        });
    }

    Ok(ScanWindow {
        start_mhz: request.start_mhz,
        stop_mhz: request.start_mhz + request.span_mhz,
        span_mhz: request.span_mhz,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Next(ScanWindow),
    /// The ceiling was reached; the range has to be validated again from the request.
    Collapsed,
}

/// What to do once the stepper reaches the scan ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CeilingPolicy {
    /// Re-validate the original request and sweep the range again.
    #[default]
    Restart,
    /// Stop scanning once the last segment was measured.
    Terminate,
}

/// The analyzer is tuned in whole kHz.
pub const FREQUENCY_RESOLUTION_MHZ: f64 = 0.001;

fn same_khz(a_mhz: f64, b_mhz: f64) -> bool {
    (a_mhz / FREQUENCY_RESOLUTION_MHZ).round() == (b_mhz / FREQUENCY_RESOLUTION_MHZ).round()
}

/// Compute the segment following `previous`, clamped to `ceiling_mhz`.
///
/// A start in the same kHz as the ceiling has reached it.
pub fn step(previous: &ScanWindow, ceiling_mhz: f64) -> Step {
    let start_mhz = previous.stop_mhz;
    let stop_mhz = (start_mhz + previous.span_mhz).min(ceiling_mhz);

    if start_mhz >= stop_mhz || same_khz(start_mhz, ceiling_mhz) {
        return Step::Collapsed;
    }

    Step::Next(ScanWindow {
        start_mhz,
        stop_mhz,
        span_mhz: previous.span_mhz,
    })
}
