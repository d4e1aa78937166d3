//! Cross-task control handle for a running engine.
//!
//! The engine itself is owned by a single tick task. Other tasks (a UI, a
//! test harness) talk to it through an [`EngineControl`] shared via
//! [`Arc`](std::sync::Arc): mutators record the request in a pending-change
//! slot, and the tick task drains the slot at the start of its next tick.
//! The tick task in turn publishes a status snapshot after every tick.
//!
//! # Architecture
//!
//! The pending slot and the snapshot each sit behind a
//! [`std::sync::Mutex`] that is never held across a tick. The pending slot
//! also records whether the engine was running and configured when it was
//! last drained; the drain updates both under the same lock, so a mutator
//! always decides against the engine state its request will actually meet.
//! The published snapshot is for display only and may lag by one tick.
//!
//! Shutdown uses an [`AtomicBool`] plus a [`Notify`] so the runner can wake
//! promptly instead of waiting out its interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use cranksim_types::{Channel, EngineStatus};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::engine::{EngineError, SimulationEngine};
use crate::sensor::{self, SensorConfig};
use crate::sink::OutputSink;

/// Requested lifecycle transition, last request wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunRequest {
    Start,
    Stop,
}

/// Changes recorded since the last tick.
#[derive(Debug, Default)]
struct PendingChanges {
    sensors: Option<SensorConfig>,
    run: Option<RunRequest>,
    target_rpm: Option<f64>,
    crank_enabled: Option<bool>,
    cam_enabled: Option<bool>,
}

impl PendingChanges {
    const fn is_empty(&self) -> bool {
        self.sensors.is_none()
            && self.run.is_none()
            && self.target_rpm.is_none()
            && self.crank_enabled.is_none()
            && self.cam_enabled.is_none()
    }
}

/// Queue plus the engine lifecycle it will be applied to.
#[derive(Debug, Default)]
struct ControlState {
    /// Engine was running after the last drain.
    engine_running: bool,
    /// Engine held a sensor configuration after the last drain.
    engine_configured: bool,
    /// Changes waiting for the next tick.
    pending: PendingChanges,
}

impl ControlState {
    /// Whether the engine will be running once the queue is drained.
    const fn will_run(&self) -> bool {
        match self.pending.run {
            Some(RunRequest::Start) => true,
            Some(RunRequest::Stop) => false,
            None => self.engine_running,
        }
    }
}

/// Shared control surface for an engine owned by another task.
#[derive(Debug, Default)]
pub struct EngineControl {
    /// Queued changes and the engine state they apply to.
    state: Mutex<ControlState>,

    /// Snapshot published by the tick task.
    status: Mutex<EngineStatus>,

    /// Whether the runner should exit.
    shutdown_requested: AtomicBool,

    /// Wakes the runner when shutdown is requested.
    shutdown_notify: Notify,
}

impl EngineControl {
    /// Create a handle with an idle, unconfigured status.
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Mutators
    // -----------------------------------------------------------------------

    /// Queue a sensor configuration change.
    ///
    /// The configuration is validated immediately. It is accepted if the
    /// engine is idle, or if a stop is already queued.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Config`] if validation fails.
    /// - [`EngineError::ConfigurationWhileRunning`] if the engine is running
    ///   (or a start is queued) and no stop is queued.
    pub fn configure(&self, config: SensorConfig) -> Result<(), EngineError> {
        sensor::validate(&config)?;
        let mut state = self.state();
        if state.will_run() {
            warn!("rejected queued sensor configuration while running");
            return Err(EngineError::ConfigurationWhileRunning);
        }
        state.pending.sensors = Some(config);
        Ok(())
    }

    /// Queue a start.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotConfigured`] if the engine has no
    /// configuration and none is queued.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut state = self.state();
        if !state.engine_configured && state.pending.sensors.is_none() {
            return Err(EngineError::NotConfigured);
        }
        state.pending.run = Some(RunRequest::Start);
        Ok(())
    }

    /// Queue a stop. Takes effect before the next tick runs.
    pub fn stop(&self) {
        self.state().pending.run = Some(RunRequest::Stop);
    }

    /// Queue a target speed. Clamping happens when the engine applies it.
    pub fn set_target_rpm(&self, rpm: f64) {
        self.state().pending.target_rpm = Some(rpm);
    }

    /// Queue an output gate change for one channel.
    pub fn set_channel_enabled(&self, channel: Channel, enabled: bool) {
        let mut state = self.state();
        match channel {
            Channel::Crank => state.pending.crank_enabled = Some(enabled),
            Channel::Cam => state.pending.cam_enabled = Some(enabled),
        }
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// Latest snapshot published by the tick task.
    pub fn status(&self) -> EngineStatus {
        lock(&self.status).clone()
    }

    /// Replace the published snapshot.
    pub fn publish(&self, status: EngineStatus) {
        *lock(&self.status) = status;
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Ask the runner to exit after its current tick.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
        self.shutdown_notify.notify_one();
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Resolve once shutdown has been requested.
    pub async fn shutdown_requested(&self) {
        while !self.is_shutdown_requested() {
            self.shutdown_notify.notified().await;
        }
    }

    // -----------------------------------------------------------------------
    // Tick task side
    // -----------------------------------------------------------------------

    /// Apply every queued change to `engine`, in the order stop,
    /// configure, start, speed, gates, then record the engine's lifecycle
    /// for the next round of requests. Returns `true` if anything was
    /// queued.
    ///
    /// The queue stays locked until the lifecycle is recorded. Failures are
    /// logged; a configuration the engine rejects leaves the previous one in
    /// place.
    pub fn apply_pending<S: OutputSink>(&self, engine: &mut SimulationEngine<S>) -> bool {
        let mut state = self.state();
        let changes = std::mem::take(&mut state.pending);
        let queued = !changes.is_empty();
        if queued {
            Self::apply_changes(changes, engine);
        }
        state.engine_running = engine.is_running();
        state.engine_configured = engine.sensors().is_some();
        queued
    }

    fn apply_changes<S: OutputSink>(changes: PendingChanges, engine: &mut SimulationEngine<S>) {
        if changes.run == Some(RunRequest::Stop) {
            engine.stop();
        }
        if let Some(config) = changes.sensors {
            if let Err(err) = engine.configure(config) {
                warn!(error = %err, "queued sensor configuration not applied");
            }
        }
        if changes.run == Some(RunRequest::Start) {
            if let Err(err) = engine.start() {
                warn!(error = %err, "queued start not applied");
            }
        }
        if let Some(rpm) = changes.target_rpm {
            engine.set_target_rpm(rpm);
        }
        if let Some(enabled) = changes.crank_enabled {
            engine.set_channel_enabled(Channel::Crank, enabled);
        }
        if let Some(enabled) = changes.cam_enabled {
            engine.set_channel_enabled(Channel::Cam, enabled);
        }
        debug!("applied queued engine changes");
    }

    fn state(&self) -> MutexGuard<'_, ControlState> {
        lock(&self.state)
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
