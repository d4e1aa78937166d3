//! Crank/cam signal generator binary.
//!
//! Wires the settings file, the simulation engine, its control handle,
//! the periodic tick loop, and an edge consumer together, then runs until
//! interrupted or until the configured run time elapses.
//!
//! # Startup Sequence
//!
//! 1. Load settings from `cranksim.yaml` (or the path given as the first
//!    argument); a missing file means defaults
//! 2. Initialize structured logging (tracing)
//! 3. Resolve the crank and cam wheels
//! 4. Create the bounded edge queue and spawn its consumer
//! 5. Create the engine and queue configure, RPM, and start on its handle
//! 6. Install the Ctrl-C handler
//! 7. Run the tick loop
//! 8. Log the run summary and the consumer's tally

mod edge_consumer;
mod error;
mod status_callback;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cranksim_core::config::{DEFAULT_SETTINGS_PATH, LoggingSettings, Settings};
use cranksim_core::control::EngineControl;
use cranksim_core::engine::SimulationEngine;
use cranksim_core::runner::{self, RunOptions};
use cranksim_core::sink::ChannelSink;
use cranksim_types::Channel;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::AppError;
use crate::status_callback::StatusLogCallback;

/// Simulated time between status log lines.
const STATUS_PERIOD: Duration = Duration::from_secs(1);

/// Application entry point for the signal generator.
///
/// # Errors
///
/// Returns an error if settings cannot be loaded, the wheels are invalid,
/// or the tick loop cannot run.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load settings.
    let settings_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH), PathBuf::from);
    let settings = Settings::load_or_default(&settings_path).map_err(AppError::from)?;

    // 2. Initialize structured logging.
    init_logging(&settings.logging);
    info!(
        path = %settings_path.display(),
        rpm_max = settings.engine.rpm_max,
        initial_rpm = settings.engine.initial_rpm,
        tick_interval_ms = settings.engine.tick_interval_ms,
        run_seconds = ?settings.engine.run_seconds,
        "cranksim-engine starting"
    );

    // 3. Resolve the wheels.
    let sensors = settings.sensor_config().map_err(AppError::from)?;
    info!(crank = %sensors.crank(), cam = %sensors.cam(), "Sensor wheels resolved");

    // 4. Edge queue and consumer.
    let (sink, receiver) = ChannelSink::bounded(settings.engine.sink_capacity);
    let consumer = tokio::spawn(edge_consumer::drain_edges(receiver));

    // 5. Engine and control handle.
    let mut engine = SimulationEngine::with_limits(sink, settings.engine.limits());
    let control = Arc::new(EngineControl::new());
    control.configure(sensors).map_err(AppError::from)?;
    control.set_target_rpm(settings.engine.initial_rpm);
    control.start().map_err(AppError::from)?;

    // 6. Ctrl-C requests a clean shutdown.
    {
        let control = Arc::clone(&control);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, shutting down");
                    control.request_shutdown();
                }
                Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
            }
        });
    }

    // 7. Run.
    let options = RunOptions {
        max_duration: settings.engine.run_duration(),
        max_tick_dt: Some(settings.engine.max_tick_dt()),
        ..RunOptions::every(settings.engine.tick_interval())
    };
    let mut callback = StatusLogCallback::new(STATUS_PERIOD);
    let summary = runner::run_engine(&mut engine, &control, &options, &mut callback)
        .await
        .map_err(AppError::from)?;
    engine.stop();
    drop(engine);

    // 8. Report.
    runner::log_run_end(&summary);
    let counts = consumer.await.map_err(|e| AppError::Consumer {
        message: format!("{e}"),
    })?;
    info!(
        crank_edges = counts.channel_total(Channel::Crank),
        cam_edges = counts.channel_total(Channel::Cam),
        tally = %counts,
        "cranksim-engine shutdown complete"
    );

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_logging(logging: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}
