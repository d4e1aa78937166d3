//! Edge scheduler: sector-boundary crossings for one tick.
//!
//! Given how far the crank moved during a tick, the scheduler finds every
//! sector boundary each wheel crossed and turns each one into an [`Edge`].
//! It never steps through the sweep degree by degree: the number of
//! crossings comes from a closed-form count on the unwrapped position, so a
//! coarse tick at high RPM produces exactly the edges that many fine ticks
//! would.
//!
//! # Boundary grid
//!
//! Both wheels are laid out on the unwrapped crank axis, in crank degrees.
//! Boundary `k` sits at `floor(k * pitch)` and enters sector `k mod len`, so
//! a pattern simply repeats for as long as the shaft turns. A crank pattern
//! whose span is 360 degrees restarts with every revolution; the stock
//! 144 degree cam pattern fits five times into each 720 degree cycle.
//! Because the pitch is an exact fraction (see
//! [`SectorPitch`](crate::pattern::SectorPitch)), a wheel whose tooth width
//! divides the cycle closes on itself without drift.
//!
//! The number of boundaries at or before position `x` is
//!
//! ```text
//! P(x) = ceil((x + 1) * denominator / numerator)
//! ```
//!
//! and a sweep `(start, start + advanced]` crosses `P(end) - P(start)` of
//! them.
//!
//! # Memory
//!
//! Edges are produced lazily. [`ChannelEdges`] walks one wheel and
//! [`TickEdges`] merges wheels in timestamp order, buffering only edges
//! that share a timestamp. A long tick costs time per edge but no memory
//! per edge.

use std::collections::VecDeque;
use std::iter::Peekable;
use std::time::Duration;

use cranksim_types::{Channel, Edge, Level};

use crate::clock::AngularSweep;
use crate::pattern::ToothPattern;

/// Simulated-time span covered by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickWindow {
    /// Timeline position at the start of the tick.
    pub start: Duration,
    /// Length of the tick.
    pub duration: Duration,
}

impl TickWindow {
    /// Timeline position at the end of the tick.
    pub fn end(&self) -> Duration {
        self.start.saturating_add(self.duration)
    }
}

/// Stateless entry points for one channel at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeScheduler;

impl EdgeScheduler {
    /// Number of sector boundaries crossed by `sweep`, without emitting them.
    pub fn boundary_count(sweep: &AngularSweep, pattern: &ToothPattern) -> u64 {
        let pitch = pattern.pitch();
        pitch
            .boundaries_through(sweep.end())
            .saturating_sub(pitch.boundaries_through(sweep.start))
    }

    /// Ordered edges crossed by `sweep` on `channel`.
    ///
    /// Each crossing yields one edge whose level is that of the sector being
    /// entered, timestamped by linear interpolation inside `window`. Edges
    /// that land on the same timestamp are ordered by tooth index. When
    /// `enabled` is `false` the result is empty; the caller's clock has
    /// already advanced, so phase is preserved for re-enabling.
    pub fn events_for(
        sweep: &AngularSweep,
        pattern: &ToothPattern,
        channel: Channel,
        enabled: bool,
        window: TickWindow,
    ) -> Vec<Edge> {
        TickEdges::new([ChannelEdges::new(sweep, pattern, channel, enabled, window)]).collect()
    }
}

/// Lazy walk over the boundaries one wheel crosses in a sweep, in position
/// order.
#[derive(Debug, Clone)]
pub struct ChannelEdges<'a> {
    pattern: &'a ToothPattern,
    channel: Channel,
    sweep: AngularSweep,
    window: TickWindow,
    /// Grid index of the next boundary.
    next_boundary: u64,
    /// Boundaries still to yield.
    remaining: u64,
}

impl<'a> ChannelEdges<'a> {
    /// Walk `sweep` on `pattern`. A disabled channel yields nothing.
    pub fn new(
        sweep: &AngularSweep,
        pattern: &'a ToothPattern,
        channel: Channel,
        enabled: bool,
        window: TickWindow,
    ) -> Self {
        let remaining = if enabled {
            EdgeScheduler::boundary_count(sweep, pattern)
        } else {
            0
        };
        Self {
            pattern,
            channel,
            sweep: *sweep,
            window,
            next_boundary: pattern.pitch().boundaries_through(sweep.start),
            remaining,
        }
    }

    /// Edges not yet yielded.
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Iterator for ChannelEdges<'_> {
    type Item = Edge;

    fn next(&mut self) -> Option<Edge> {
        if self.remaining == 0 {
            return None;
        }
        let boundary = self.next_boundary;
        self.next_boundary = boundary.saturating_add(1);
        self.remaining = self.remaining.saturating_sub(1);

        let position = self.pattern.pitch().boundary_position(boundary);
        let sector = u64::try_from(self.pattern.len())
            .ok()
            .and_then(|len| boundary.checked_rem(len))
            .and_then(|index| usize::try_from(index).ok())
            .unwrap_or(0);
        Some(Edge {
            channel: self.channel,
            level: Level::from(self.pattern.is_present(sector)),
            tooth_index: sector,
            timestamp: interpolate(&self.sweep, position, self.window),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining).ok();
        (remaining.unwrap_or(usize::MAX), remaining)
    }
}

/// Lazy timestamp-ordered merge of several [`ChannelEdges`].
///
/// Edges sharing a timestamp are ordered by channel (crank first), then
/// by tooth index. Only such a group is ever buffered.
#[derive(Debug)]
pub struct TickEdges<'a> {
    sources: Vec<Peekable<ChannelEdges<'a>>>,
    tied: VecDeque<Edge>,
}

impl<'a> TickEdges<'a> {
    /// Merge `sources`.
    pub fn new(sources: impl IntoIterator<Item = ChannelEdges<'a>>) -> Self {
        Self {
            sources: sources.into_iter().map(Iterator::peekable).collect(),
            tied: VecDeque::new(),
        }
    }

    fn next_timestamp(&mut self) -> Option<Duration> {
        self.sources
            .iter_mut()
            .filter_map(|source| source.peek().map(|edge| edge.timestamp))
            .min()
    }

    fn pop_earliest(&mut self) -> Option<Edge> {
        let mut earliest: Option<(usize, Duration)> = None;
        for (slot, source) in self.sources.iter_mut().enumerate() {
            if let Some(edge) = source.peek() {
                if earliest.is_none_or(|(_, at)| edge.timestamp < at) {
                    earliest = Some((slot, edge.timestamp));
                }
            }
        }
        let (slot, _) = earliest?;
        self.sources.get_mut(slot)?.next()
    }
}

impl Iterator for TickEdges<'_> {
    type Item = Edge;

    fn next(&mut self) -> Option<Edge> {
        if self.tied.is_empty() {
            let first = self.pop_earliest()?;
            let at = first.timestamp;
            self.tied.push_back(first);
            while self.next_timestamp() == Some(at) {
                match self.pop_earliest() {
                    Some(edge) => self.tied.push_back(edge),
                    None => break,
                }
            }
            if self.tied.len() > 1 {
                self.tied
                    .make_contiguous()
                    .sort_by_key(|edge| (edge.channel, edge.tooth_index));
            }
        }
        self.tied.pop_front()
    }
}

/// Timeline position of a boundary, proportional to how far into the sweep
/// it lies.
fn interpolate(sweep: &AngularSweep, position: u64, window: TickWindow) -> Duration {
    let offset = u128::from(position.saturating_sub(sweep.start));
    let span = u128::from(sweep.advanced.max(1));
    let nanos = window
        .duration
        .as_nanos()
        .saturating_mul(offset)
        .checked_div(span)
        .unwrap_or(0);
    let nanos = u64::try_from(nanos).unwrap_or(u64::MAX);
    window.start.saturating_add(Duration::from_nanos(nanos))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pattern::MICRODEGREES_PER_DEGREE;

    const fn deg(degrees: u64) -> u64 {
        degrees * MICRODEGREES_PER_DEGREE
    }

    fn sweep(start_deg: u64, advanced_deg: u64) -> AngularSweep {
        AngularSweep {
            start: deg(start_deg),
            advanced: deg(advanced_deg),
        }
    }

    fn window_ms(start: u64, duration: u64) -> TickWindow {
        TickWindow {
            start: Duration::from_millis(start),
            duration: Duration::from_millis(duration),
        }
    }

    fn teeth(edges: &[Edge]) -> Vec<(usize, Level)> {
        edges.iter().map(|e| (e.tooth_index, e.level)).collect()
    }

    #[test]
    fn ten_revolutions_of_sixty_minus_two() {
        let wheel = ToothPattern::sixty_minus_two();
        let travel = sweep(0, 3_600);
        let edges =
            EdgeScheduler::events_for(&travel, &wheel, Channel::Crank, true, window_ms(0, 1_000));

        assert_eq!(EdgeScheduler::boundary_count(&travel, &wheel), 600);
        assert_eq!(edges.len(), 600);
        assert_eq!(edges.iter().filter(|e| e.level == Level::High).count(), 580);
        assert_eq!(edges.iter().filter(|e| e.level == Level::Low).count(), 20);

        let first = edges.first().unwrap();
        assert_eq!(first.tooth_index, 1);
        assert_eq!(first.timestamp, Duration::from_nanos(1_666_666));

        let last = edges.last().unwrap();
        assert_eq!(last.tooth_index, 0);
        assert_eq!(last.level, Level::High);
        assert_eq!(last.timestamp, Duration::from_secs(1));
    }

    #[test]
    fn gap_sectors_emit_low() {
        let wheel = ToothPattern::sixty_minus_two();
        // 342 -> 366 degrees crosses 348 (58), 354 (59), 360 (0), 366 (1).
        let edges = EdgeScheduler::events_for(
            &sweep(342, 24),
            &wheel,
            Channel::Crank,
            true,
            window_ms(0, 4),
        );
        assert_eq!(
            teeth(&edges),
            vec![
                (58, Level::Low),
                (59, Level::Low),
                (0, Level::High),
                (1, Level::High)
            ]
        );
    }

    #[test]
    fn start_boundary_is_excluded_end_boundary_included() {
        let wheel = ToothPattern::sixty_minus_two();
        let edges = EdgeScheduler::events_for(
            &sweep(6, 6),
            &wheel,
            Channel::Crank,
            true,
            window_ms(100, 10),
        );
        assert_eq!(edges.len(), 1);
        let edge = edges.first().unwrap();
        assert_eq!(edge.tooth_index, 2);
        assert_eq!(edge.timestamp, Duration::from_millis(110));
    }

    #[test]
    fn timestamps_interpolate_within_the_tick() {
        let wheel = ToothPattern::sixty_minus_two();
        let edges = EdgeScheduler::events_for(
            &sweep(0, 60),
            &wheel,
            Channel::Crank,
            true,
            window_ms(1_000, 10),
        );
        let stamps: Vec<Duration> = edges.iter().map(|e| e.timestamp).collect();
        let expected: Vec<Duration> = (1..=10)
            .map(|n| Duration::from_millis(1_000 + n))
            .collect();
        assert_eq!(stamps, expected);
    }

    #[test]
    fn stationary_sweep_is_empty() {
        let wheel = ToothPattern::sixty_minus_two();
        let still = sweep(123, 0);
        assert_eq!(EdgeScheduler::boundary_count(&still, &wheel), 0);
        assert!(
            EdgeScheduler::events_for(&still, &wheel, Channel::Crank, true, window_ms(0, 10))
                .is_empty()
        );
    }

    #[test]
    fn disabled_channel_counts_but_emits_nothing() {
        let wheel = ToothPattern::sixty_minus_two();
        let travel = sweep(0, 90);
        assert_eq!(EdgeScheduler::boundary_count(&travel, &wheel), 15);
        let walk = ChannelEdges::new(&travel, &wheel, Channel::Crank, false, window_ms(0, 10));
        assert_eq!(walk.remaining(), 0);
        assert!(
            EdgeScheduler::events_for(&travel, &wheel, Channel::Crank, false, window_ms(0, 10))
                .is_empty()
        );
    }

    #[test]
    fn cam_pattern_repeats_five_times_per_cycle() {
        let cam = ToothPattern::default_cam();
        let edges = EdgeScheduler::events_for(
            &sweep(0, 720),
            &cam,
            Channel::Cam,
            true,
            window_ms(0, 120),
        );
        // 720 crank degrees over 12 degree sectors.
        assert_eq!(edges.len(), 60);
        let indices: Vec<usize> = edges.iter().map(|e| e.tooth_index).collect();
        assert_eq!(indices.get(10..14).unwrap(), &[11, 0, 1, 2]);
        assert_eq!(indices.get(48..60).unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 0]);
        // The absent lobe is entered once per repetition.
        assert_eq!(edges.iter().filter(|e| e.level == Level::Low).count(), 5);
        assert_eq!(edges.last().unwrap().timestamp, Duration::from_millis(120));
    }

    #[test]
    fn non_dividing_width_repeats_without_restart() {
        let odd = ToothPattern::from_explicit_sectors(7.0, vec![true, false]).unwrap();
        // Boundaries every 7 degrees: 357 is k = 51, 364 is k = 52.
        let travel = sweep(350, 14);
        let edges =
            EdgeScheduler::events_for(&travel, &odd, Channel::Cam, true, window_ms(0, 14));
        assert_eq!(teeth(&edges), vec![(1, Level::Low), (0, Level::High)]);
        assert_eq!(EdgeScheduler::boundary_count(&travel, &odd), 2);
    }

    #[test]
    fn seven_tooth_wheel_has_seven_edges_per_revolution() {
        let wheel = ToothPattern::from_missing_teeth(360.0 / 7.0, 1).unwrap();
        let travel = sweep(0, 720);
        let edges =
            EdgeScheduler::events_for(&travel, &wheel, Channel::Crank, true, window_ms(0, 200));

        assert_eq!(EdgeScheduler::boundary_count(&sweep(0, 360), &wheel), 7);
        assert_eq!(edges.len(), 14);
        let indices: Vec<usize> = edges.iter().map(|e| e.tooth_index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5, 6, 0, 1, 2, 3, 4, 5, 6, 0]);
        assert_eq!(edges.iter().filter(|e| e.level == Level::Low).count(), 2);
        // No two edges share a timestamp, and each revolution ends on time.
        assert!(edges.windows(2).all(|pair| pair[0].timestamp < pair[1].timestamp));
        assert_eq!(edges.get(6).unwrap().timestamp, Duration::from_millis(100));
        assert_eq!(edges.last().unwrap().timestamp, Duration::from_millis(200));
    }

    #[test]
    fn equal_timestamps_order_by_tooth_index() {
        let wheel = ToothPattern::from_explicit_sectors(1.0, vec![true; 4]).unwrap();
        // Boundaries at 3, 4, 5, 6 degrees squeezed into one nanosecond.
        let window = TickWindow {
            start: Duration::ZERO,
            duration: Duration::from_nanos(1),
        };
        let edges = EdgeScheduler::events_for(&sweep(2, 4), &wheel, Channel::Crank, true, window);
        let indices: Vec<usize> = edges.iter().map(|e| e.tooth_index).collect();
        assert_eq!(indices, vec![0, 1, 3, 2]);
        assert_eq!(edges.last().unwrap().timestamp, Duration::from_nanos(1));
    }

    #[test]
    fn merged_channels_put_crank_first_on_ties() {
        let crank = ToothPattern::sixty_minus_two();
        let cam = ToothPattern::default_cam();
        let travel = sweep(0, 12);
        let window = window_ms(0, 12);
        let merged: Vec<(Channel, usize, Duration)> = TickEdges::new([
            ChannelEdges::new(&travel, &crank, Channel::Crank, true, window),
            ChannelEdges::new(&travel, &cam, Channel::Cam, true, window),
        ])
        .map(|e| (e.channel, e.tooth_index, e.timestamp))
        .collect();
        assert_eq!(
            merged,
            vec![
                (Channel::Crank, 1, Duration::from_millis(6)),
                (Channel::Crank, 2, Duration::from_millis(12)),
                (Channel::Cam, 1, Duration::from_millis(12)),
            ]
        );
    }

    #[test]
    fn long_sweep_is_walked_lazily() {
        let wheel = ToothPattern::sixty_minus_two();
        // One hour at 8000 rpm.
        let travel = AngularSweep {
            start: 0,
            advanced: deg(172_800_000),
        };
        let mut walk = ChannelEdges::new(
            &travel,
            &wheel,
            Channel::Crank,
            true,
            TickWindow {
                start: Duration::ZERO,
                duration: Duration::from_secs(3_600),
            },
        );
        assert_eq!(walk.remaining(), 28_800_000);
        assert_eq!(walk.size_hint(), (28_800_000, Some(28_800_000)));
        let first = walk.next().unwrap();
        assert_eq!(first.tooth_index, 1);
        assert_eq!(first.timestamp, Duration::from_nanos(125_000));
        assert_eq!(walk.remaining(), 28_799_999);
    }

    #[test]
    fn split_sweeps_match_a_single_sweep() {
        let wheel = ToothPattern::sixty_minus_two();
        let whole = EdgeScheduler::events_for(
            &sweep(17, 1_000),
            &wheel,
            Channel::Crank,
            true,
            window_ms(0, 1_000),
        );
        let mut parts = Vec::new();
        for n in 0..10 {
            let part = AngularSweep {
                start: deg(17 + n * 100),
                advanced: deg(100),
            };
            parts.extend(EdgeScheduler::events_for(
                &part,
                &wheel,
                Channel::Crank,
                true,
                window_ms(n * 100, 100),
            ));
        }
        assert_eq!(whole, parts);
    }
}
