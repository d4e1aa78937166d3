//! Periodic tick loop.
//!
//! This module provides [`run_engine`], the async function that owns a
//! [`SimulationEngine`] and drives it from a fixed-rate timer:
//!
//! - **Measured ticks**: each tick advances the engine by the time that
//!   actually elapsed since the previous one, not by the nominal interval,
//!   so a late wake-up never loses shaft travel. A stall longer than
//!   [`RunOptions::max_tick_dt`] is cut short and the skipped time logged.
//! - **Queued control**: changes made through [`EngineControl`] are applied
//!   at the start of the next tick, and a status snapshot is published
//!   after it.
//! - **Bounded runs**: stop after a tick count or a run time.
//! - **Clean shutdown**: [`EngineControl::request_shutdown`] ends the loop
//!   between ticks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cranksim_types::EngineStatus;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::control::EngineControl;
use crate::engine::{SimulationEngine, TickReport};
use crate::sink::OutputSink;

/// Errors that can occur while starting the run loop.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The tick interval was zero.
    #[error("tick interval must be positive, got {interval:?}")]
    InvalidInterval {
        /// The rejected interval.
        interval: Duration,
    },
}

/// Why the run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Shutdown was requested through the control handle.
    ShutdownRequested,
    /// The configured run time elapsed.
    DurationReached,
    /// The configured tick count was reached.
    TickLimitReached,
}

/// Longest measured interval a single tick simulates by default.
pub const DEFAULT_MAX_TICK_DT: Duration = Duration::from_secs(1);

/// Bounds and cadence of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Nominal time between ticks.
    pub tick_interval: Duration,
    /// Stop once this much time has passed since the loop started.
    pub max_duration: Option<Duration>,
    /// Stop after this many ticks.
    pub max_ticks: Option<u64>,
    /// Longest interval one tick may simulate. A longer gap between wake-ups
    /// (a suspended process, a debugger pause) is clamped to this and the
    /// rest is skipped. `None` simulates every gap in full.
    pub max_tick_dt: Option<Duration>,
}

impl RunOptions {
    /// Unbounded run at the given cadence.
    pub const fn every(tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            max_duration: None,
            max_ticks: None,
            max_tick_dt: Some(DEFAULT_MAX_TICK_DT),
        }
    }
}

/// Split a measured interval into the part to simulate and the part to skip.
fn clamp_tick(dt: Duration, max: Option<Duration>) -> (Duration, Duration) {
    match max {
        Some(max) if dt > max => (max, dt.saturating_sub(max)),
        _ => (dt, Duration::ZERO),
    }
}

/// Totals for a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Why the loop ended.
    pub end_reason: EndReason,
    /// Loop iterations, including ones where the engine was idle.
    pub total_ticks: u64,
    /// Edges the sink accepted during the run.
    pub emitted_edges: u64,
    /// Edges the sink refused during the run.
    pub dropped_edges: u64,
    /// Times the engine fell back to a safe state.
    pub resets: u64,
    /// Wall-clock start of the run.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end of the run.
    pub ended_at: DateTime<Utc>,
    /// Engine status after the last tick.
    pub final_status: EngineStatus,
}

/// Callback invoked after each tick.
pub trait TickCallback: Send {
    /// Called with the tick's report and the status published for it.
    fn on_tick(&mut self, report: &TickReport, status: &EngineStatus);
}

/// A callback that does nothing.
pub struct NoOpCallback;

impl TickCallback for NoOpCallback {
    fn on_tick(&mut self, _report: &TickReport, _status: &EngineStatus) {}
}

/// Drive `engine` until shutdown or a bound is reached.
///
/// # Errors
///
/// Returns [`RunnerError::InvalidInterval`] if `options.tick_interval` is
/// zero.
pub async fn run_engine<S: OutputSink>(
    engine: &mut SimulationEngine<S>,
    control: &Arc<EngineControl>,
    options: &RunOptions,
    callback: &mut dyn TickCallback,
) -> Result<RunSummary, RunnerError> {
    if options.tick_interval.is_zero() {
        return Err(RunnerError::InvalidInterval {
            interval: options.tick_interval,
        });
    }

    info!(
        tick_interval_ms = options.tick_interval.as_millis(),
        max_duration = ?options.max_duration,
        max_ticks = ?options.max_ticks,
        max_tick_dt = ?options.max_tick_dt,
        "Run loop starting"
    );

    let started_at = Utc::now();
    let mut interval = tokio::time::interval(options.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and marks time zero.
    interval.tick().await;
    let started = Instant::now();
    let mut last = started;

    control.apply_pending(engine);
    control.publish(engine.get_status());

    let mut total_ticks: u64 = 0;
    let mut emitted_edges: u64 = 0;
    let mut dropped_edges: u64 = 0;
    let mut resets: u64 = 0;

    let end_reason = loop {
        tokio::select! {
            biased;
            () = control.shutdown_requested() => {
                info!("Shutdown requested");
                break EndReason::ShutdownRequested;
            }
            _ = interval.tick() => {}
        }

        let now = Instant::now();
        let (dt, skipped) = clamp_tick(now.saturating_duration_since(last), options.max_tick_dt);
        last = now;
        if !skipped.is_zero() {
            warn!(
                skipped_ms = skipped.as_millis(),
                simulated_ms = dt.as_millis(),
                "Tick interval stalled; skipping the excess"
            );
        }

        control.apply_pending(engine);
        let report = engine.tick(dt);
        let status = engine.get_status();
        control.publish(status.clone());
        callback.on_tick(&report, &status);

        total_ticks = total_ticks.saturating_add(1);
        emitted_edges = emitted_edges.saturating_add(report.emitted);
        dropped_edges = dropped_edges.saturating_add(report.dropped);
        if report.reset {
            resets = resets.saturating_add(1);
        }

        if options.max_ticks.is_some_and(|max| total_ticks >= max) {
            info!(total_ticks, "Tick limit reached");
            break EndReason::TickLimitReached;
        }
        if options
            .max_duration
            .is_some_and(|max| now.saturating_duration_since(started) >= max)
        {
            info!(total_ticks, "Run time limit reached");
            break EndReason::DurationReached;
        }
    };

    let final_status = engine.get_status();
    control.publish(final_status.clone());

    Ok(RunSummary {
        end_reason,
        total_ticks,
        emitted_edges,
        dropped_edges,
        resets,
        started_at,
        ended_at: Utc::now(),
        final_status,
    })
}

/// Log the end of a run.
pub fn log_run_end(summary: &RunSummary) {
    info!(
        reason = ?summary.end_reason,
        total_ticks = summary.total_ticks,
        emitted = summary.emitted_edges,
        dropped = summary.dropped_edges,
        started_at = %summary.started_at.to_rfc3339(),
        ended_at = %summary.ended_at.to_rfc3339(),
        crank_angle = summary.final_status.crank_angle,
        cam_angle = summary.final_status.cam_angle,
        "Run ended"
    );
    if summary.dropped_edges > 0 {
        warn!(
            dropped = summary.dropped_edges,
            "Output sink could not keep up; edges were dropped"
        );
    }
    if summary.resets > 0 {
        warn!(resets = summary.resets, "Engine reset to a safe state during the run");
    }
}
