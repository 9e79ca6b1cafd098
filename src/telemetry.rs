//! Shipping measurements to the time-series store without holding up acquisition.
//!
//! [`TelemetryEmitter`] owns a bounded queue drained by a background thread that feeds a
//! [`MeasurementSink`]. When the sink falls behind and the queue is full, the oldest
//! queued measurement is dropped to make room for the new one.

use std::fmt::Write as _;
use std::thread::{self, JoinHandle};
use std::time::{Duration, UNIX_EPOCH};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::sweep::Measurement;

pub const DEFAULT_MEASUREMENT: &str = "spectrum_data";
pub const DEFAULT_DEVICE_ID: &str = "rf_explorer";

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] Box<ureq::Error>),

    #[error("Sink rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Neither bucket nor database configured for the sink")]
    MissingBucket,
}

/// Destination for measurements. Writes happen on the emitter's worker thread.
pub trait MeasurementSink: Send + 'static {
    fn write(&mut self, measurement: &Measurement) -> Result<(), SinkError>;
}

impl MeasurementSink for Box<dyn MeasurementSink> {
    fn write(&mut self, measurement: &Measurement) -> Result<(), SinkError> {
        (**self).write(measurement)
    }
}

fn escape_key(value: &str, out: &mut String) {
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Format a measurement as one InfluxDB line protocol record.
pub fn line_protocol(measurement_name: &str, device_id: &str, measurement: &Measurement) -> String {
    let mut line = String::with_capacity(160);
    for c in measurement_name.chars() {
        if matches!(c, ',' | ' ') {
            line.push('\\');
        }
        line.push(c);
    }
    line.push_str(",device=");
    escape_key(device_id, &mut line);

    let timestamp = measurement
        .acquired_at
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    let _ = write!(
        line,
        " start_frequency={},stop_frequency={},peak_amplitude_dbm={},center_frequency={} {}",
        measurement.start_mhz,
        measurement.stop_mhz,
        measurement.peak.amplitude_dbm,
        measurement.peak.center_frequency_mhz,
        timestamp
    );
    line
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxConfig {
    pub host: String,
    pub token: Option<String>,
    pub org: Option<String>,
    pub bucket: Option<String>,
    pub database: Option<String>,
    pub measurement: String,
    pub device_id: String,
    pub timeout: Duration,
}

/// Writes to the InfluxDB v2 HTTP write endpoint.
pub struct InfluxSink {
    agent: ureq::Agent,
    write_url: String,
    token: Option<String>,
    org: Option<String>,
    bucket: String,
    measurement: String,
    device_id: String,
}

impl InfluxSink {
    pub fn new(config: InfluxConfig) -> Result<Self, SinkError> {
        let bucket = config
            .bucket
            .or(config.database)
            .ok_or(SinkError::MissingBucket)?;
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();

        Ok(Self {
            agent,
            write_url: format!("{}/api/v2/write", config.host.trim_end_matches('/')),
            token: config.token,
            org: config.org,
            bucket,
            measurement: config.measurement,
            device_id: config.device_id,
        })
    }
}

impl MeasurementSink for InfluxSink {
    fn write(&mut self, measurement: &Measurement) -> Result<(), SinkError> {
        let body = line_protocol(&self.measurement, &self.device_id, measurement);

        let mut request = self
            .agent
            .post(&self.write_url)
            .query("bucket", &self.bucket)
            .query("precision", "ns")
            .set("Content-Type", "text/plain; charset=utf-8");
        if let Some(org) = &self.org {
            request = request.query("org", org);
        }
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Token {token}"));
        }

        match request.send_string(&body) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, response)) => Err(SinkError::Rejected {
                status,
                body: response.into_string().unwrap_or_default(),
            }),
            Err(e) => Err(Box::new(e).into()),
        }
    }
}

/// Logs measurements instead of storing them, used when no sink host is configured.
pub struct LogSink {
    measurement: String,
    device_id: String,
}

impl LogSink {
    pub fn new(measurement: &str, device_id: &str) -> Self {
        Self {
            measurement: measurement.to_string(),
            device_id: device_id.to_string(),
        }
    }
}

impl MeasurementSink for LogSink {
    fn write(&mut self, measurement: &Measurement) -> Result<(), SinkError> {
        log::info!("{}", line_protocol(&self.measurement, &self.device_id, measurement));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Queued,
    /// Queued after the oldest pending measurement was dropped.
    DisplacedOldest,
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryStats {
    pub written: u64,
    pub failed: u64,
    pub dropped: u64,
}

pub struct TelemetryEmitter {
    sender: Sender<Measurement>,
    evictor: Receiver<Measurement>,
    worker: JoinHandle<TelemetryStats>,
    dropped: u64,
}

impl TelemetryEmitter {
    /// Start the worker thread feeding `sink` from a queue of `capacity` measurements.
    pub fn spawn<S: MeasurementSink>(mut sink: S, capacity: usize) -> std::io::Result<Self> {
        let (sender, receiver) = bounded::<Measurement>(capacity.max(1));
        let evictor = receiver.clone();

        let worker = thread::Builder::new()
            .name("telemetry".to_string())
            .spawn(move || {
                let mut stats = TelemetryStats::default();
                for measurement in receiver {
                    match sink.write(&measurement) {
                        Ok(()) => stats.written += 1,
                        Err(e) => {
                            log::warn!(
                                "Dropping measurement {}-{}MHz: {}",
                                measurement.start_mhz,
                                measurement.stop_mhz,
                                e
                            );
                            stats.failed += 1;
                        }
                    }
                }
                stats
            })?;

        Ok(Self {
            sender,
            evictor,
            worker,
            dropped: 0,
        })
    }

    /// Queue a measurement. Never blocks.
    pub fn emit(&mut self, measurement: Measurement) -> Dispatch {
        let measurement = match self.sender.try_send(measurement) {
            Ok(()) => return Dispatch::Queued,
            Err(TrySendError::Full(measurement)) => measurement,
            Err(TrySendError::Disconnected(_)) => {
                log::error!("Telemetry worker is gone, dropping measurement");
                self.dropped += 1;
                return Dispatch::Dropped;
            }
        };

        let displaced = self.evictor.try_recv().is_ok();
        if displaced {
            log::warn!("Telemetry queue full, dropped oldest measurement");
            self.dropped += 1;
        }

        match self.sender.try_send(measurement) {
            Ok(()) if displaced => Dispatch::DisplacedOldest,
            Ok(()) => Dispatch::Queued,
            Err(_) => {
                self.dropped += 1;
                Dispatch::Dropped
            }
        }
    }

    /// Stop accepting measurements, let the worker flush the queue and wait for it.
    pub fn shutdown(self) -> TelemetryStats {
        let Self {
            sender,
            evictor,
            worker,
            dropped,
        } = self;
        drop(sender);
        drop(evictor);

        let mut stats = worker.join().unwrap_or_else(|_| {
            log::error!("Telemetry worker panicked");
            TelemetryStats::default()
        });
        stats.dropped = dropped;
        stats
    }
}
