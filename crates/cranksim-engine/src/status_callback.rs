//! Tick callback that reports engine status periodically.
//!
//! Logs a status line once per report period of simulated uptime instead
//! of once per tick, so a 10 ms cadence does not flood the log. Uptime
//! restarts with the engine, and so does the report schedule.

use std::time::Duration;

use cranksim_core::engine::TickReport;
use cranksim_core::runner::TickCallback;
use cranksim_types::EngineStatus;
use tracing::{info, warn};

/// Callback that logs engine status at a fixed uptime period.
pub struct StatusLogCallback {
    period: Duration,
    next_report: Duration,
    last_uptime: Duration,
}

impl StatusLogCallback {
    /// Report every `period` of engine uptime.
    pub const fn new(period: Duration) -> Self {
        Self {
            period,
            next_report: period,
            last_uptime: Duration::ZERO,
        }
    }
}

impl TickCallback for StatusLogCallback {
    fn on_tick(&mut self, report: &TickReport, status: &EngineStatus) {
        if report.reset {
            warn!(ticks = status.ticks, "Engine fell back to zero phase and speed");
        }
        if status.uptime < self.last_uptime {
            self.next_report = self.period;
        }
        self.last_uptime = status.uptime;
        if status.uptime < self.next_report {
            return;
        }
        self.next_report = status.uptime.saturating_add(self.period);
        info!(
            uptime_s = status.uptime.as_secs_f64(),
            rpm = status.rpm,
            current_rpm = status.current_rpm,
            crank_angle = status.crank_angle,
            cam_angle = status.cam_angle,
            crank_enabled = status.crank_enabled,
            cam_enabled = status.cam_enabled,
            dropped = status.dropped_edges,
            "Engine status"
        );
    }
}
