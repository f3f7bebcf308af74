//! # FC Link
//!
//! Polls an MSP flight controller for telemetry over a serial link and
//! records the resulting snapshots.
//!
//! # Control Flow
//!
//! 1. Load configuration and apply command-line overrides
//! 2. Set up logging (stdout, plus daily files when `[logging] dir` is set)
//! 3. Open the serial port and start a telemetry session
//! 4. Record batches and log a summary periodically until Ctrl+C
//!
//! ```bash
//! cargo run --release -- --config config/default.toml --rate 10
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use fc_link::config::Config;
use fc_link::serial::FcSerial;
use fc_link::session::SessionController;
use fc_link::telemetry::TelemetryRecorder;
use fc_link::transport::Exchanger;

/// Batches between status log lines
const LOG_INTERVAL_BATCHES: u64 = 100;

#[derive(Debug, Parser)]
#[command(name = "fc-link", version, about = "MSP flight controller telemetry link")]
struct Cli {
    /// Configuration file; defaults are used if it does not exist
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Serial device, overriding `[serial] port`
    #[arg(short, long)]
    port: Option<String>,

    /// Telemetry rate in Hz, overriding `[telemetry] rate_hz`
    #[arg(short, long)]
    rate: Option<f32>,

    /// Inject bridged positions as a GPS sensor
    #[arg(long)]
    gps_push: bool,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if cli.config.exists() {
        Config::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        Config::default()
    };

    if let Some(port) = &cli.port {
        config.serial.port = port.clone();
    }
    if let Some(rate) = cli.rate {
        config.telemetry.rate_hz = rate;
    }
    if cli.gps_push {
        config.gps_push.enabled = true;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Install the tracing subscriber; the returned guard must outlive logging
fn init_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.logging.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fc-link.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let _log_guard = init_logging(&config);

    info!("FC Link v{} starting...", env!("CARGO_PKG_VERSION"));
    if !cli.config.exists() {
        info!("{} not found, using defaults", cli.config.display());
    }

    let serial = if config.serial.port.is_empty() {
        FcSerial::open(config.serial.baud_rate)?
    } else {
        FcSerial::open_with_paths(&[config.serial.port.as_str()], config.serial.baud_rate)?
    };
    info!("Flight controller on {}", serial.device_path());

    let transport = std::sync::Arc::new(Exchanger::with_port(serial.into_port()));
    let controller = SessionController::new(transport, config.clone());

    if config.recorder.enabled {
        let recorder = TelemetryRecorder::new(&config.recorder)?;
        tokio::spawn(recorder.run(controller.subscribe()));
    }

    let mut batches = controller.subscribe();
    controller.start(config.telemetry.rate_hz)?;
    if config.gps_push.enabled {
        controller.enable_gps_push();
    }
    info!("Press Ctrl+C to exit");

    let mut received: u64 = 0;
    loop {
        tokio::select! {
            batch = batches.recv() => match batch {
                Ok(batch) => {
                    received += 1;
                    if received % LOG_INTERVAL_BATCHES == 0 {
                        let hud = batch.vfr_hud.unwrap_or_default();
                        let mode = batch.flight.as_ref().map(|f| f.mode.as_str()).unwrap_or("?");
                        info!(
                            "{} batches: mode {}, heading {:.0}, alt {:.1} m, throttle {:.0}%",
                            received, mode, hud.heading, hud.altitude, hud.throttle
                        );
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!("Status logger skipped {} batches", missed),
                Err(RecvError::Closed) => break,
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    controller.disable_gps_push();
    controller.stop();
    info!("Total batches received: {}", received);
    Ok(())
}
