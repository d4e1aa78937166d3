//! Crank/cam phase clock.
//!
//! The clock is the single source of truth for shaft position. It converts
//! elapsed time and engine speed into crank advance and derives the cam
//! position from the crank, so the two can never drift apart.
//!
//! # Design Principles
//!
//! - Position is counted in integer micro-degrees. The sub-micro-degree part
//!   of each advance is carried to the next one, so splitting a time span
//!   into more ticks never changes where the crank ends up.
//! - Only the position within the current four-stroke cycle (720 crank
//!   degrees) is stored, together with a completed-cycle counter. Because
//!   the cycle is a whole number of crank and cam revolutions, wrapping it
//!   loses no phase: the cam angle is always half the unwrapped crank angle.
//! - Crank speed in degrees per second is `rpm * 6` (`rpm * 360 / 60`).

use std::time::Duration;

use crate::pattern::{MICRODEGREES_PER_DEGREE, REVOLUTION_MICRODEGREES};

/// Crank micro-degrees in one four-stroke cycle (one cam revolution).
pub const CYCLE_MICRODEGREES: u64 = 2 * REVOLUTION_MICRODEGREES;

/// Crank degrees per second for one RPM.
const DEGREES_PER_SECOND_PER_RPM: f64 = 6.0;

/// Fastest representable crank speed, far above any physical engine.
const MAX_MICRODEGREES_PER_SECOND: f64 = 1e18;

/// Nanoseconds per second, the denominator of the carried remainder.
const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// Errors that can occur while advancing the clock.
///
/// These are internal invariant violations: the engine never lets bad input
/// reach the clock, and recovers by resetting to a safe state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PhaseError {
    /// Speed was NaN, infinite, or negative.
    #[error("engine speed {rpm} rpm is not a finite non-negative number")]
    InvalidSpeed {
        /// The rejected speed.
        rpm: f64,
    },

    /// The advance does not fit the position accumulator.
    #[error("crank advance overflowed the position accumulator")]
    Overflow,
}

/// Crank travel during one tick.
///
/// Positions are crank micro-degrees since the last clock reset, so both
/// wheels can lay their patterns out on one unwrapped axis: the crank
/// pattern repeats every 360 degrees of it, the cam pattern is read over
/// the 720 degree cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AngularSweep {
    /// Crank position at the start of the tick, in micro-degrees since the
    /// last reset.
    pub start: u64,
    /// Micro-degrees travelled during the tick, possibly many revolutions.
    pub advanced: u64,
}

impl AngularSweep {
    /// Shaft position at the end of the tick (not wrapped).
    pub const fn end(&self) -> u64 {
        self.start.saturating_add(self.advanced)
    }

    /// Whether the shaft did not move.
    pub const fn is_stationary(&self) -> bool {
        self.advanced == 0
    }

    /// `(old_crank, new_crank, old_cam, new_cam)` in wrapped degrees.
    pub fn angles(&self) -> (f64, f64, f64, f64) {
        let end = self.end();
        (
            wrapped_degrees(self.start),
            wrapped_degrees(end),
            wrapped_degrees(self.start.checked_div(2).unwrap_or(0)),
            wrapped_degrees(end.checked_div(2).unwrap_or(0)),
        )
    }
}

/// Phase-locked crank/cam position tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseClock {
    /// Crank position within the current cycle, `[0, CYCLE_MICRODEGREES)`.
    position: u64,

    /// Completed four-stroke cycles since the last reset.
    cycles: u64,

    /// Carried remainder of the last advance, in micro-degree nanoseconds
    /// per second (always below one micro-degree).
    residue: u128,
}

impl PhaseClock {
    /// Create a clock at crank 0, cam 0.
    pub const fn new() -> Self {
        Self {
            position: 0,
            cycles: 0,
            residue: 0,
        }
    }

    /// Advance by `dt` at a constant `rpm`.
    ///
    /// Returns the crank sweep for the tick. At 0 RPM the sweep is
    /// stationary and the position is unchanged.
    ///
    /// # Errors
    ///
    /// - [`PhaseError::InvalidSpeed`] if `rpm` is not finite or negative.
    /// - [`PhaseError::Overflow`] if the advance cannot be represented.
    ///
    /// On error the clock is left unchanged.
    pub fn advance(&mut self, dt: Duration, rpm: f64) -> Result<AngularSweep, PhaseError> {
        let velocity = microdegrees_per_second(rpm)?;

        let numerator = u128::from(velocity)
            .checked_mul(dt.as_nanos())
            .and_then(|scaled| scaled.checked_add(self.residue))
            .ok_or(PhaseError::Overflow)?;
        let advanced = numerator
            .checked_div(NANOS_PER_SECOND)
            .and_then(|whole| u64::try_from(whole).ok())
            .ok_or(PhaseError::Overflow)?;
        let residue = numerator
            .checked_rem(NANOS_PER_SECOND)
            .ok_or(PhaseError::Overflow)?;

        let start = self.unwrapped_position().ok_or(PhaseError::Overflow)?;
        if start.checked_add(advanced).is_none() {
            return Err(PhaseError::Overflow);
        }
        let within = self
            .position
            .checked_add(advanced)
            .ok_or(PhaseError::Overflow)?;
        let completed = within
            .checked_div(CYCLE_MICRODEGREES)
            .ok_or(PhaseError::Overflow)?;
        let cycles = self
            .cycles
            .checked_add(completed)
            .ok_or(PhaseError::Overflow)?;
        let position = within
            .checked_rem(CYCLE_MICRODEGREES)
            .ok_or(PhaseError::Overflow)?;

        self.position = position;
        self.cycles = cycles;
        self.residue = residue;

        Ok(AngularSweep { start, advanced })
    }

    /// Crank micro-degrees since the last reset, or `None` if that no
    /// longer fits in a `u64`.
    pub fn unwrapped_position(&self) -> Option<u64> {
        self.cycles
            .checked_mul(CYCLE_MICRODEGREES)
            .and_then(|base| base.checked_add(self.position))
    }

    /// Return to crank 0, cam 0 with no carried remainder.
    pub const fn reset(&mut self) {
        self.position = 0;
        self.cycles = 0;
        self.residue = 0;
    }

    /// Crank position within the current cycle, in micro-degrees.
    pub const fn cycle_position(&self) -> u64 {
        self.position
    }

    /// Completed four-stroke cycles since the last reset.
    pub const fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Crankshaft angle in `[0, 360)` degrees.
    pub fn crank_degrees(&self) -> f64 {
        wrapped_degrees(self.position)
    }

    /// Camshaft angle in `[0, 360)` degrees: half the unwrapped crank angle.
    pub fn cam_degrees(&self) -> f64 {
        wrapped_degrees(self.position.checked_div(2).unwrap_or(0))
    }

    /// Crank angle without wrapping, in degrees since the last reset.
    #[allow(clippy::cast_precision_loss)]
    pub fn unwrapped_crank_degrees(&self) -> f64 {
        let cycle_degrees = (CYCLE_MICRODEGREES / MICRODEGREES_PER_DEGREE) as f64;
        (self.cycles as f64).mul_add(cycle_degrees, to_degrees(self.position))
    }
}

/// Crank speed for `rpm`, in micro-degrees per second.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn microdegrees_per_second(rpm: f64) -> Result<u64, PhaseError> {
    if !rpm.is_finite() || rpm < 0.0 {
        return Err(PhaseError::InvalidSpeed { rpm });
    }
    let scaled = (rpm * DEGREES_PER_SECOND_PER_RPM * 1e6).round();
    if scaled > MAX_MICRODEGREES_PER_SECOND {
        return Err(PhaseError::Overflow);
    }
    Ok(scaled as u64)
}

/// Micro-degrees to degrees.
#[allow(clippy::cast_precision_loss)]
fn to_degrees(microdegrees: u64) -> f64 {
    microdegrees as f64 / 1e6
}

/// Micro-degrees to degrees wrapped into one revolution.
fn wrapped_degrees(microdegrees: u64) -> f64 {
    to_degrees(
        microdegrees
            .checked_rem(REVOLUTION_MICRODEGREES)
            .unwrap_or(0),
    )
}
