mod args;

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use args::Args;
use clap::Parser;
use rfe_peakscan::{
    ConnectorError, DeviceSession, InfluxSink, LogSink, MeasurementSink, RfeConnector, ScanError,
    ScanSummary, Scanner, SessionError, SinkError, TelemetryEmitter,
};

/// Exit code for settings the device cannot scan. Distinct from success so that a
/// supervisor does not restart the scanner with the same rejected settings.
const EXIT_INVALID_SETTINGS: u8 = 2;

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("Connection failed: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Handshake failed: {0}")]
    Session(#[from] SessionError),

    #[error("Telemetry sink: {0}")]
    Sink(#[from] SinkError),

    #[error("{0}")]
    Scan(#[from] ScanError),

    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn run(args: &Args, shutdown: &AtomicBool) -> Result<ScanSummary, AppError> {
    let sink: Box<dyn MeasurementSink> = match args.influx_config() {
        Some(config) => {
            log::info!("Writing measurements to {}", config.host);
            Box::new(InfluxSink::new(config)?)
        }
        None => {
            log::warn!("No InfluxDB host configured, measurements are only logged");
            Box::new(LogSink::new(&args.measurement, &args.device_id))
        }
    };

    match RfeConnector::get_available_devices() {
        Ok(devices) => {
            for device in devices {
                log::info!("Found serial port {} ({})", device.port, device.description);
            }
        }
        Err(e) => log::warn!("Could not list serial ports: {}", e),
    }

    let device = RfeConnector::connect(args.port.as_deref(), args.baud_rate)?;
    let session = DeviceSession::open(device, &args.handshake())?;
    let emitter = TelemetryEmitter::spawn(sink, args.queue_capacity())?;

    let mut scanner = Scanner::new(session, emitter, args.scanner_config());
    let outcome = scanner.run(shutdown);

    log::info!("Flushing telemetry and closing the device");
    let stats = scanner.shutdown();
    log::info!(
        "Telemetry: {} written, {} failed, {} dropped",
        stats.written,
        stats.failed,
        stats.dropped
    );

    outcome.map_err(AppError::from)
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    #[cfg(feature = "cpu-profiling")]
    let _tracy = tracy_client::Client::start();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Shutdown requested");
        handler_flag.store(true, Ordering::SeqCst);
    }) {
        log::error!("{}", AppError::from(e));
        return ExitCode::FAILURE;
    }

    match run(&args, &shutdown) {
        Ok(summary) => {
            log::info!(
                "Scanned {} segments in {} full passes, {} stale sweeps discarded, {} empty sweeps",
                summary.segments,
                summary.passes,
                summary.stale_discarded,
                summary.empty_sweeps
            );
            ExitCode::SUCCESS
        }
        Err(AppError::Scan(e)) if !e.is_fatal() => {
            log::error!("{}", e);
            log::error!("Error: settings are wrong. Please, change and try again");
            ExitCode::from(EXIT_INVALID_SETTINGS)
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
