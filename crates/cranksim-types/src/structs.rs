//! Edge events and status snapshots.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::enums::{Channel, Level};

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// A single digital transition on one sensor channel.
///
/// Produced by the edge scheduler, handed to an output sink immediately and
/// never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Channel the edge belongs to.
    pub channel: Channel,
    /// Level of the sector being entered.
    pub level: Level,
    /// Index of the sector being entered within its tooth pattern.
    pub tooth_index: usize,
    /// Position on the engine's simulated timeline, interpolated within the
    /// tick that produced the edge.
    pub timestamp: Duration,
}

// ---------------------------------------------------------------------------
// EngineStatus
// ---------------------------------------------------------------------------

/// Point-in-time view of the simulation engine, as shown by the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Whether the engine is in the `Running` state.
    pub running: bool,
    /// Whether a sensor configuration has been accepted.
    pub configured: bool,
    /// Target engine speed in RPM.
    pub rpm: f64,
    /// Speed the phase clock actually used on the last tick. Equals `rpm`
    /// unless RPM slew limiting is enabled.
    pub current_rpm: f64,
    /// Crank output gate.
    pub crank_enabled: bool,
    /// Cam output gate.
    pub cam_enabled: bool,
    /// Crankshaft angle in degrees, `[0, 360)`.
    pub crank_angle: f64,
    /// Camshaft angle in degrees, `[0, 360)`.
    pub cam_angle: f64,
    /// Number of ticks executed while running.
    pub ticks: u64,
    /// Edges the sink refused because it was full.
    pub dropped_edges: u64,
    /// Simulated time elapsed while running.
    pub uptime: Duration,
}
