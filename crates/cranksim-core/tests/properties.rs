//! Property-based tests for the phase clock and edge scheduler.
//!
//! Properties checked:
//! - Tick-size invariance: any split of a time span into ticks yields the
//!   same per-channel edge sequence and the same final angles.
//! - Closed-form count: `boundary_count` equals the number of edges the
//!   scheduler enumerates, for arbitrary sweeps and wheel widths.
//! - Whole revolutions: any tooth count fitting a revolution gives exactly
//!   that many edges per revolution, wherever the sweep starts.
//! - Phase lock: the cam angle is always half the unwrapped crank angle.
//! - Gating: a disabled channel emits nothing but keeps its phase.

#![allow(clippy::unwrap_used, clippy::float_cmp)]

use std::time::Duration;

use cranksim_core::clock::{AngularSweep, PhaseClock};
use cranksim_core::engine::SimulationEngine;
use cranksim_core::pattern::{REVOLUTION_MICRODEGREES, ToothPattern};
use cranksim_core::scheduler::{EdgeScheduler, TickWindow};
use cranksim_core::sensor::SensorConfig;
use cranksim_core::sink::RecordingSink;
use cranksim_types::{Channel, Level};
use proptest::prelude::*;

fn engine_config() -> ProptestConfig {
    ProptestConfig {
        cases: 128,
        max_shrink_iters: 2000,
        ..ProptestConfig::default()
    }
}

fn running_engine(rpm: f64) -> SimulationEngine<RecordingSink> {
    let mut engine = SimulationEngine::new(RecordingSink::new());
    engine.configure(SensorConfig::default_wheels()).unwrap();
    engine.set_target_rpm(rpm);
    engine.start().unwrap();
    engine
}

/// Tick lengths between 1 µs and 40 ms.
fn tick_strategy() -> impl Strategy<Value = Duration> {
    (1_000u64..40_000_000).prop_map(Duration::from_nanos)
}

fn ticks_strategy() -> impl Strategy<Value = Vec<Duration>> {
    prop::collection::vec(tick_strategy(), 1..40)
}

/// Tooth widths in degrees: divisors of 360, fractional divisors of 720,
/// and a few that divide neither.
fn tooth_width_strategy() -> impl Strategy<Value = f64> {
    prop::sample::select(vec![
        0.5,
        1.0,
        3.0,
        6.0,
        7.0,
        10.0,
        12.0,
        13.5,
        360.0 / 27.0,
        360.0 / 7.0,
        720.0 / 7.0,
        45.0,
        100.0,
        360.0,
        720.0,
    ])
}

fn sweep_strategy() -> impl Strategy<Value = AngularSweep> {
    (0u64..720_000_000, 0u64..2_000_000_000)
        .prop_map(|(start, advanced)| AngularSweep { start, advanced })
}

fn channel_trace(
    engine: &SimulationEngine<RecordingSink>,
    channel: Channel,
) -> Vec<(usize, Level)> {
    engine
        .sink()
        .on_channel(channel)
        .map(|edge| (edge.tooth_index, edge.level))
        .collect()
}

proptest! {
    #![proptest_config(engine_config())]

    /// Splitting a span into ticks never changes the edges or the angles.
    #[test]
    fn edges_are_invariant_to_tick_size(
        rpm in 1.0f64..8000.0,
        ticks in ticks_strategy(),
    ) {
        let mut chunked = running_engine(rpm);
        for dt in &ticks {
            chunked.tick(*dt);
        }
        let mut whole = running_engine(rpm);
        whole.tick(ticks.iter().sum());

        for channel in Channel::ALL {
            prop_assert_eq!(channel_trace(&chunked, channel), channel_trace(&whole, channel));
        }
        prop_assert_eq!(chunked.clock(), whole.clock());

        let stamps: Vec<Duration> = chunked.sink().edges().iter().map(|e| e.timestamp).collect();
        prop_assert!(stamps.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    /// The closed-form count matches enumeration.
    #[test]
    fn boundary_count_matches_enumeration(
        sweep in sweep_strategy(),
        width in tooth_width_strategy(),
        sectors in prop::collection::vec(any::<bool>(), 1..24),
    ) {
        let pattern = ToothPattern::from_explicit_sectors(width, sectors).unwrap();
        let window = TickWindow { start: Duration::ZERO, duration: Duration::from_millis(10) };
        let edges = EdgeScheduler::events_for(&sweep, &pattern, Channel::Cam, true, window);
        prop_assert_eq!(
            u64::try_from(edges.len()).unwrap(),
            EdgeScheduler::boundary_count(&sweep, &pattern)
        );
        prop_assert!(edges.iter().all(|e| e.timestamp <= window.end()));
        prop_assert!(edges.iter().all(|e| e.tooth_index < pattern.len()));
    }

    /// Counting over two adjacent sweeps equals counting over their union.
    #[test]
    fn boundary_count_is_additive(
        start in 0u64..720_000_000,
        first in 0u64..1_000_000_000,
        second in 0u64..1_000_000_000,
        width in tooth_width_strategy(),
    ) {
        let pattern = ToothPattern::from_explicit_sectors(width, vec![true]).unwrap();
        let a = AngularSweep { start, advanced: first };
        let b = AngularSweep { start: a.end(), advanced: second };
        let union = AngularSweep { start, advanced: first + second };
        prop_assert_eq!(
            EdgeScheduler::boundary_count(&a, &pattern) + EdgeScheduler::boundary_count(&b, &pattern),
            EdgeScheduler::boundary_count(&union, &pattern)
        );
    }

    /// Tooth counts that do not divide a micro-degree revolution still close
    /// exactly on it.
    #[test]
    fn whole_revolutions_hold_whole_tooth_counts(
        teeth in prop::sample::select(vec![7u32, 27, 36, 60, 360, 1080]),
        offset in 0u64..50,
        revolutions in 1u64..50,
    ) {
        let pattern = ToothPattern::from_missing_teeth(360.0 / f64::from(teeth), 1).unwrap();
        let sweep = AngularSweep {
            start: offset * REVOLUTION_MICRODEGREES,
            advanced: revolutions * REVOLUTION_MICRODEGREES,
        };
        let teeth = u64::from(teeth);
        prop_assert_eq!(EdgeScheduler::boundary_count(&sweep, &pattern), revolutions * teeth);

        let window = TickWindow { start: Duration::ZERO, duration: Duration::from_secs(1) };
        let edges = EdgeScheduler::events_for(&sweep, &pattern, Channel::Crank, true, window);
        prop_assert_eq!(edges.iter().filter(|e| e.level == Level::Low).count(), usize::try_from(revolutions).unwrap());
        prop_assert!(edges.windows(2).all(|pair| pair[0].timestamp < pair[1].timestamp));
    }

    /// The cam sits at half the unwrapped crank angle after any speed profile.
    #[test]
    fn cam_is_phase_locked_to_crank(
        steps in prop::collection::vec((tick_strategy(), 0.0f64..8000.0), 1..60),
    ) {
        let mut clock = PhaseClock::new();
        for (dt, rpm) in steps {
            clock.advance(dt, rpm).unwrap();
            let expected = (clock.unwrapped_crank_degrees() / 2.0).rem_euclid(360.0);
            let error = (clock.cam_degrees() - expected).abs();
            prop_assert!(error < 1e-6 || (360.0 - error) < 1e-6, "cam {} vs {}", clock.cam_degrees(), expected);
            prop_assert!(clock.crank_degrees() >= 0.0 && clock.crank_degrees() < 360.0);
            prop_assert!(clock.cam_degrees() >= 0.0 && clock.cam_degrees() < 360.0);
        }
    }

    /// A gated channel stays silent but resumes exactly where continuous
    /// tracking would be.
    #[test]
    fn gating_preserves_phase(
        rpm in 100.0f64..8000.0,
        plan in prop::collection::vec((tick_strategy(), any::<bool>()), 1..30),
    ) {
        let mut gated = running_engine(rpm);
        let mut reference = running_engine(rpm);
        for (dt, enabled) in plan {
            gated.set_channel_enabled(Channel::Cam, enabled);
            gated.tick(dt);
            reference.tick(dt);

            let seen: Vec<_> = gated.sink_mut().take();
            let expected: Vec<_> = reference
                .sink_mut()
                .take()
                .into_iter()
                .filter(|e| enabled || e.channel == Channel::Crank)
                .collect();
            prop_assert_eq!(seen, expected);
        }
        prop_assert_eq!(gated.clock(), reference.clock());
    }
}
