//! Argument parsing for running from the command line. Every option can also be set
//! through its environment variable.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use rfe_peakscan::telemetry::{DEFAULT_DEVICE_ID, DEFAULT_MEASUREMENT};
use rfe_peakscan::{CeilingPolicy, HandshakeConfig, InfluxConfig, ScanRequest, ScannerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OnCeiling {
    /// Sweep the range again from the start frequency
    Restart,
    /// Stop after the last segment
    Terminate,
}

impl From<OnCeiling> for CeilingPolicy {
    fn from(value: OnCeiling) -> Self {
        match value {
            OnCeiling::Restart => Self::Restart,
            OnCeiling::Terminate => Self::Terminate,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "rfe-peakscan")]
#[command(version)]
#[command(about = "Scan a frequency range with an RF Explorer and store the peak of every segment")]
pub struct Args {
    /// Serial port of the analyzer, auto-detected when omitted
    #[arg(short, long, env = "RFE_SERIAL_PORT")]
    pub port: Option<String>,

    /// Serial baud rate
    #[arg(short, long, env = "RFE_BAUD_RATE", default_value_t = 500_000)]
    pub baud_rate: u32,

    /// Width of one scan segment in MHz
    #[arg(long, env = "SCAN_SPAN_MHZ", default_value_t = 0.01, value_parser = positive_mhz)]
    pub span_mhz: f64,

    /// First frequency to scan in MHz
    #[arg(long, env = "SCAN_START_MHZ", default_value_t = 0.05, value_parser = finite_mhz)]
    pub start_mhz: f64,

    /// Upper end of the scan in MHz
    #[arg(long, env = "SCAN_STOP_MHZ", default_value_t = 200.0, value_parser = finite_mhz)]
    pub stop_mhz: f64,

    /// What to do once the upper end is reached
    #[arg(long, env = "SCAN_ON_CEILING", value_enum, default_value_t = OnCeiling::Restart)]
    pub on_ceiling: OnCeiling,

    /// InfluxDB URL; measurements are only logged when omitted
    #[arg(long, env = "INFLUXDB_HOST")]
    pub influx_host: Option<String>,

    /// InfluxDB API token
    #[arg(long, env = "INFLUXDB_TOKEN", hide_env_values = true)]
    pub influx_token: Option<String>,

    /// InfluxDB organization
    #[arg(long, env = "INFLUXDB_ORG")]
    pub influx_org: Option<String>,

    /// InfluxDB database, used as bucket when no bucket is given
    #[arg(long, env = "INFLUXDB_DATABASE")]
    pub influx_database: Option<String>,

    /// InfluxDB bucket
    #[arg(long, env = "INFLUXDB_BUCKET")]
    pub influx_bucket: Option<String>,

    /// Measurement name of the written points
    #[arg(long, env = "INFLUXDB_MEASUREMENT", default_value = DEFAULT_MEASUREMENT)]
    pub measurement: String,

    /// Value of the `device` tag
    #[arg(long, env = "RFE_DEVICE_ID", default_value = DEFAULT_DEVICE_ID)]
    pub device_id: String,

    /// Seconds to wait for the reset and the configuration handshake
    #[arg(long, default_value_t = 10)]
    pub handshake_timeout_secs: u64,

    /// Milliseconds to let the device settle after the reset
    #[arg(long, default_value_t = 2000)]
    pub settle_ms: u64,

    /// Seconds to wait for a sweep of a new segment before pushing it again
    #[arg(long, default_value_t = 5)]
    pub sync_timeout_secs: u64,

    /// Pushes of one segment without a sweep before giving up on the device
    #[arg(long, default_value_t = 5)]
    pub max_sync_retries: u32,

    /// Measurements buffered for the sink before the oldest get dropped
    #[arg(long, default_value_t = 256, value_parser = clap::value_parser!(u64).range(1..))]
    pub queue_capacity: u64,

    /// Seconds before a single sink write is abandoned
    #[arg(long, default_value_t = 10)]
    pub sink_timeout_secs: u64,

    /// Show debug information and detailed logs
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn scan_request(&self) -> ScanRequest {
        ScanRequest::new(self.span_mhz, self.start_mhz, self.stop_mhz)
    }

    pub fn handshake(&self) -> HandshakeConfig {
        HandshakeConfig {
            reset_timeout: Duration::from_secs(self.handshake_timeout_secs),
            settle: Duration::from_millis(self.settle_ms),
            capabilities_timeout: Duration::from_secs(self.handshake_timeout_secs),
        }
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            request: self.scan_request(),
            ceiling_policy: self.on_ceiling.into(),
            sync_timeout: Duration::from_secs(self.sync_timeout_secs),
            max_sync_retries: self.max_sync_retries,
        }
    }

    pub fn influx_config(&self) -> Option<InfluxConfig> {
        self.influx_host.as_ref().map(|host| InfluxConfig {
            host: host.clone(),
            token: self.influx_token.clone(),
            org: self.influx_org.clone(),
            bucket: self.influx_bucket.clone(),
            database: self.influx_database.clone(),
            measurement: self.measurement.clone(),
            device_id: self.device_id.clone(),
            timeout: Duration::from_secs(self.sink_timeout_secs),
        })
    }

    pub fn queue_capacity(&self) -> usize {
        usize::try_from(self.queue_capacity).unwrap_or(usize::MAX)
    }
}

fn finite_mhz(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|_| format!("'{s}' is not a frequency"))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err("Frequency must be finite".to_string())
    }
}

fn positive_mhz(s: &str) -> Result<f64, String> {
    let value = finite_mhz(s)?;
    if value > 0.0 {
        Ok(value)
    } else {
        Err("Span must be greater than zero".to_string())
    }
}
