//! Simulation engine: the tick-driven facade over clock, scheduler, and sink.
//!
//! The engine owns all simulation state. It has two states, `Idle` and
//! `Running`; sensor geometry can only be replaced while `Idle`. Each
//! [`tick`](SimulationEngine::tick) advances the phase clock by `dt` at the
//! engine's current speed, asks the edge scheduler for the crank and cam
//! crossings of that interval, and streams them to the output sink in
//! timestamp order without collecting them first.
//!
//! # Design Principles
//!
//! - Bad input never reaches the clock: RPM is clamped at the setter and
//!   geometry is validated before it is stored.
//! - The tick path never blocks. Edges a sink refuses are dropped and
//!   counted.
//! - An internal clock failure is logged and the engine falls back to zero
//!   phase and zero speed instead of emitting corrupted edges.

use std::time::Duration;

use cranksim_types::{Channel, EngineStatus};
use tracing::{debug, error, info, warn};

use crate::clock::PhaseClock;
use crate::pattern::ConfigError;
use crate::scheduler::{ChannelEdges, EdgeScheduler, TickEdges, TickWindow};
use crate::sensor::{self, SensorConfig};
use crate::sink::{OutputSink, SinkError};

/// Default RPM ceiling.
pub const DEFAULT_RPM_MAX: f64 = 8000.0;

/// Errors returned by engine commands.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// `configure` was called while the engine was running.
    #[error("sensor configuration cannot change while the engine is running")]
    ConfigurationWhileRunning,

    /// `start` was called before any sensor configuration was accepted.
    #[error("engine has no sensor configuration")]
    NotConfigured,

    /// The sensor configuration failed validation.
    #[error("invalid sensor configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Not generating edges. Configuration may change.
    #[default]
    Idle,
    /// Generating edges on every tick.
    Running,
}

/// Speed limits applied by the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineLimits {
    /// Highest accepted target RPM.
    pub rpm_max: f64,
    /// Maximum rate of change of the current RPM, in RPM per second.
    /// `None` applies a new target in full on the next tick.
    pub rpm_slew_rpm_per_s: Option<f64>,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            rpm_max: DEFAULT_RPM_MAX,
            rpm_slew_rpm_per_s: None,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Crank sector boundaries crossed, emitted or not.
    pub crank_crossings: u64,
    /// Cam sector boundaries crossed, emitted or not.
    pub cam_crossings: u64,
    /// Edges the sink accepted.
    pub emitted: u64,
    /// Edges the sink refused.
    pub dropped: u64,
    /// Whether the clock failed and the engine fell back to a safe state.
    pub reset: bool,
}

impl TickReport {
    /// Whether the tick did nothing (engine idle or stationary).
    pub const fn is_quiet(&self) -> bool {
        self.crank_crossings == 0 && self.cam_crossings == 0 && !self.reset
    }
}

/// Crank/cam signal generator.
#[derive(Debug)]
pub struct SimulationEngine<S> {
    limits: EngineLimits,
    sink: S,
    sensors: Option<SensorConfig>,
    state: EngineState,
    target_rpm: f64,
    current_rpm: f64,
    crank_enabled: bool,
    cam_enabled: bool,
    clock: PhaseClock,
    /// Simulated time since the engine was created.
    timeline: Duration,
    /// Timeline position of the last advance.
    last_tick_time: Option<Duration>,
    /// Simulated time spent running since the last start.
    uptime: Duration,
    ticks: u64,
    emitted_edges: u64,
    dropped_edges: u64,
}

impl<S: OutputSink> SimulationEngine<S> {
    /// Create an idle, unconfigured engine with default limits.
    pub fn new(sink: S) -> Self {
        Self::with_limits(sink, EngineLimits::default())
    }

    /// Create an idle, unconfigured engine.
    pub fn with_limits(sink: S, limits: EngineLimits) -> Self {
        Self {
            limits: sanitize_limits(limits),
            sink,
            sensors: None,
            state: EngineState::Idle,
            target_rpm: 0.0,
            current_rpm: 0.0,
            crank_enabled: true,
            cam_enabled: true,
            clock: PhaseClock::new(),
            timeline: Duration::ZERO,
            last_tick_time: None,
            uptime: Duration::ZERO,
            ticks: 0,
            emitted_edges: 0,
            dropped_edges: 0,
        }
    }

    /// Replace the sensor geometry.
    ///
    /// Only valid while idle. On any error the previous configuration and
    /// the shaft position are left untouched.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ConfigurationWhileRunning`] if the engine is running.
    /// - [`EngineError::Config`] if the configuration fails validation.
    pub fn configure(&mut self, config: SensorConfig) -> Result<(), EngineError> {
        if self.state == EngineState::Running {
            warn!("rejected sensor configuration while running");
            return Err(EngineError::ConfigurationWhileRunning);
        }
        if let Err(err) = sensor::validate(&config) {
            warn!(error = %err, "rejected invalid sensor configuration");
            return Err(err.into());
        }
        info!(crank = %config.crank(), cam = %config.cam(), "sensor configuration accepted");
        self.sensors = Some(config);
        Ok(())
    }

    /// Begin generating edges. A no-op if already running.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotConfigured`] if no configuration has been
    /// accepted yet.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.sensors.is_none() {
            warn!("start requested before configuration");
            return Err(EngineError::NotConfigured);
        }
        if self.state == EngineState::Running {
            return Ok(());
        }
        self.state = EngineState::Running;
        self.last_tick_time = Some(self.timeline);
        self.uptime = Duration::ZERO;
        info!(rpm = self.target_rpm, "engine started");
        Ok(())
    }

    /// Stop generating edges. Idempotent. The target RPM is kept.
    pub fn stop(&mut self) {
        if self.state == EngineState::Running {
            self.state = EngineState::Idle;
            info!(
                ticks = self.ticks,
                emitted = self.emitted_edges,
                dropped = self.dropped_edges,
                "engine stopped"
            );
        }
    }

    /// Set the target speed, clamped to `[0, rpm_max]`. NaN counts as 0.
    ///
    /// Takes effect on the next tick. Returns the value actually applied.
    pub fn set_target_rpm(&mut self, rpm: f64) -> f64 {
        let applied = clamp_rpm(rpm, self.limits.rpm_max);
        if rpm.is_nan() || (applied - rpm).abs() > f64::EPSILON {
            warn!(requested = rpm, applied, "target rpm clamped");
        }
        self.target_rpm = applied;
        debug!(rpm = applied, "target rpm set");
        applied
    }

    /// Gate edge output on one channel. Shaft tracking continues either way.
    pub fn set_channel_enabled(&mut self, channel: Channel, enabled: bool) {
        match channel {
            Channel::Crank => self.crank_enabled = enabled,
            Channel::Cam => self.cam_enabled = enabled,
        }
        debug!(%channel, enabled, "channel output gate changed");
    }

    /// Advance the simulation by `dt` and emit the crossed edges.
    ///
    /// Does nothing unless the engine is running.
    pub fn tick(&mut self, dt: Duration) -> TickReport {
        if self.state != EngineState::Running {
            return TickReport::default();
        }
        let Some(sensors) = self.sensors.as_ref() else {
            return TickReport::default();
        };

        self.current_rpm = slew_toward(
            self.current_rpm,
            self.target_rpm,
            self.limits.rpm_slew_rpm_per_s,
            dt,
        );

        let sweep = match self.clock.advance(dt, self.current_rpm) {
            Ok(sweep) => sweep,
            Err(err) => {
                error!(error = %err, ?dt, rpm = self.current_rpm, "phase clock failed; resetting to zero phase and speed");
                self.clock.reset();
                self.target_rpm = 0.0;
                self.current_rpm = 0.0;
                self.finish_tick(dt);
                return TickReport {
                    reset: true,
                    ..TickReport::default()
                };
            }
        };

        let window = TickWindow {
            start: self.timeline,
            duration: dt,
        };
        let crank_crossings = EdgeScheduler::boundary_count(&sweep, sensors.crank());
        let cam_crossings = EdgeScheduler::boundary_count(&sweep, sensors.cam());
        let edges = TickEdges::new([
            ChannelEdges::new(
                &sweep,
                sensors.crank(),
                Channel::Crank,
                self.crank_enabled,
                window,
            ),
            ChannelEdges::new(&sweep, sensors.cam(), Channel::Cam, self.cam_enabled, window),
        ]);

        let mut report = TickReport {
            crank_crossings,
            cam_crossings,
            ..TickReport::default()
        };
        let mut last_failure: Option<SinkError> = None;
        for edge in edges {
            match self.sink.emit(edge) {
                Ok(()) => report.emitted = report.emitted.saturating_add(1),
                Err(err) => {
                    report.dropped = report.dropped.saturating_add(1);
                    last_failure = Some(err);
                }
            }
        }
        if let Some(err) = last_failure {
            warn!(dropped = report.dropped, error = %err, "output sink refused edges");
        }

        self.emitted_edges = self.emitted_edges.saturating_add(report.emitted);
        self.dropped_edges = self.dropped_edges.saturating_add(report.dropped);
        self.finish_tick(dt);

        debug!(
            crank = crank_crossings,
            cam = cam_crossings,
            emitted = report.emitted,
            crank_angle = self.clock.crank_degrees(),
            cam_angle = self.clock.cam_degrees(),
            "tick"
        );
        report
    }

    /// Snapshot of the engine. Pure read.
    pub fn get_status(&self) -> EngineStatus {
        EngineStatus {
            running: self.state == EngineState::Running,
            configured: self.sensors.is_some(),
            rpm: self.target_rpm,
            current_rpm: self.current_rpm,
            crank_enabled: self.crank_enabled,
            cam_enabled: self.cam_enabled,
            crank_angle: self.clock.crank_degrees(),
            cam_angle: self.clock.cam_degrees(),
            ticks: self.ticks,
            dropped_edges: self.dropped_edges,
            uptime: self.uptime,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Whether the engine is running.
    pub fn is_running(&self) -> bool {
        self.state == EngineState::Running
    }

    /// Accepted sensor configuration, if any.
    pub const fn sensors(&self) -> Option<&SensorConfig> {
        self.sensors.as_ref()
    }

    /// Speed limits in force.
    pub const fn limits(&self) -> EngineLimits {
        self.limits
    }

    /// Phase clock, for angle inspection.
    pub const fn clock(&self) -> &PhaseClock {
        &self.clock
    }

    /// Target RPM.
    pub const fn target_rpm(&self) -> f64 {
        self.target_rpm
    }

    /// RPM used for the most recent advance.
    pub const fn current_rpm(&self) -> f64 {
        self.current_rpm
    }

    /// Whether `channel` currently emits edges.
    pub const fn channel_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Crank => self.crank_enabled,
            Channel::Cam => self.cam_enabled,
        }
    }

    /// Timeline position of the most recent advance, or of `start` if no
    /// tick has run since.
    pub const fn last_tick_time(&self) -> Option<Duration> {
        self.last_tick_time
    }

    /// Edges accepted by the sink since creation.
    pub const fn emitted_edges(&self) -> u64 {
        self.emitted_edges
    }

    /// Edges refused by the sink since creation.
    pub const fn dropped_edges(&self) -> u64 {
        self.dropped_edges
    }

    /// Output sink.
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Output sink, mutably (e.g. to drain a recorder).
    pub const fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Consume the engine and return its sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    fn finish_tick(&mut self, dt: Duration) {
        self.timeline = self.timeline.saturating_add(dt);
        self.uptime = self.uptime.saturating_add(dt);
        self.last_tick_time = Some(self.timeline);
        self.ticks = self.ticks.saturating_add(1);
    }
}

/// Clamp a requested speed into `[0, rpm_max]`, mapping NaN to 0.
fn clamp_rpm(rpm: f64, rpm_max: f64) -> f64 {
    if rpm.is_nan() {
        return 0.0;
    }
    rpm.clamp(0.0, rpm_max)
}

/// Keep limits usable: a bad ceiling falls back to the default and a bad
/// slew rate disables slewing.
fn sanitize_limits(limits: EngineLimits) -> EngineLimits {
    let rpm_max = if limits.rpm_max.is_finite() && limits.rpm_max >= 0.0 {
        limits.rpm_max
    } else {
        warn!(rpm_max = limits.rpm_max, "invalid rpm ceiling, using default");
        DEFAULT_RPM_MAX
    };
    let rpm_slew_rpm_per_s = limits
        .rpm_slew_rpm_per_s
        .filter(|slew| slew.is_finite() && *slew > 0.0);
    EngineLimits {
        rpm_max,
        rpm_slew_rpm_per_s,
    }
}

/// Move `current` toward `target` by at most `slew * dt`.
fn slew_toward(current: f64, target: f64, slew: Option<f64>, dt: Duration) -> f64 {
    let Some(rate) = slew else {
        return target;
    };
    let max_step = rate * dt.as_secs_f64();
    let gap = target - current;
    if gap.abs() <= max_step {
        target
    } else {
        max_step.copysign(gap) + current
    }
}
