//! # RFE Peakscan
//!
//! Drive an RF Explorer spectrum analyzer across a frequency range one segment at a time,
//! pick the strongest sample of every segment and ship it to a time-series store.
//!
//! ## Features
//!
//! - **Device discovery**: Uses `serialport` to find the analyzer's USB serial bridge
//! - **Bounded handshake**: Reset and configuration waits fail after a timeout instead of hanging
//! - **Stale sweep filtering**: Sweeps left over from the previous range are recognized and dropped
//! - **Segment stepping**: Windows are clamped to the scan ceiling, with a configurable policy
//!   for what happens once it is reached
//! - **Non-blocking telemetry**: Measurements go through a bounded queue to a background writer
//!
//! ## Examples
//!
//! ### Validating and stepping a range
//!
//! ```rust
//! use rfe_peakscan::scan_window::{step, validate, CapabilityLimits, ScanRequest, Step};
//!
//! let limits = CapabilityLimits::new(0.05, 200.0, 0.01);
//! let request = ScanRequest::new(0.01, 0.05, 200.0);
//!
//! let window = validate(&request, &limits)?;
//! match step(&window, request.ceiling_mhz()) {
//!     Step::Next(next) => println!("Next segment: {}", next),
//!     Step::Collapsed => println!("Reached the ceiling"),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Scanning with a connected analyzer
//!
//! ```rust,no_run
//! use rfe_peakscan::{
//!     DeviceSession, HandshakeConfig, LogSink, RfeConnector, ScanRequest, Scanner,
//!     ScannerConfig, TelemetryEmitter,
//! };
//! use std::sync::atomic::AtomicBool;
//!
//! let device = RfeConnector::connect(None, 500_000)?;
//! let session = DeviceSession::open(device, &HandshakeConfig::default())?;
//! let emitter = TelemetryEmitter::spawn(LogSink::new("spectrum_data", "rf_explorer"), 256)?;
//!
//! let config = ScannerConfig::new(ScanRequest::new(0.01, 0.05, 200.0));
//! let mut scanner = Scanner::new(session, emitter, config);
//! let summary = scanner.run(&AtomicBool::new(false));
//! let stats = scanner.shutdown();
//! println!("{:?} {:?}", summary?, stats);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod device;
pub mod rfe_connector;
pub mod rfe_message;
pub mod rfe_terminal;
pub mod scan_window;
pub mod scanner;
pub mod session;
pub mod sweep;
pub mod synchronizer;
pub mod telemetry;

// Re-export the main types for convenience
pub use scan_window::{CapabilityLimits, CeilingPolicy, ScanRequest, ScanWindow, SettingsError, Step};

pub use sweep::{Measurement, PeakError, PeakSample, Sweep, SweepSample};

pub use device::{DeviceError, RfExplorer, SpectrumDevice};

pub use rfe_connector::{ConnectorError, RfeConnector, RfeDevice};

pub use rfe_terminal::{RfeTerminal, TerminalError};

pub use session::{DeviceSession, HandshakeConfig, SessionError};

pub use synchronizer::{SweepSynchronizer, SyncError, SyncState};

pub use telemetry::{
    Dispatch, InfluxConfig, InfluxSink, LogSink, MeasurementSink, SinkError, TelemetryEmitter,
    TelemetryStats,
};

pub use scanner::{ScanError, ScanSummary, Scanner, ScannerConfig};
