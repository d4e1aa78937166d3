//! Output sinks: where edges go after the scheduler produces them.
//!
//! The engine calls [`OutputSink::emit`] from its tick path, so every sink
//! must return immediately. A sink that cannot take an edge right now
//! reports [`SinkError::Full`]; the engine drops the edge and counts it
//! rather than stalling the clock.
//!
//! Adapters provided here:
//!
//! - [`RecordingSink`]: keeps every edge in memory (simulation and tests).
//! - [`CountingSink`]: per-channel, per-level tallies.
//! - [`ChannelSink`]: bounded `tokio` queue feeding another task.
//! - [`PinSink`]: drives one [`OutputPin`] per channel to the edge level.

use std::fmt;
use std::time::Duration;

use cranksim_types::{Channel, Edge, Level};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Errors a sink can report for a single edge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The sink has no room for the edge right now.
    #[error("output sink is full")]
    Full,

    /// The consumer behind the sink has gone away.
    #[error("output sink consumer disconnected")]
    Disconnected,

    /// A hardware pin refused the write.
    #[error("{channel} pin write failed: {reason}")]
    Pin {
        /// Channel whose pin failed.
        channel: Channel,
        /// Driver-reported failure.
        reason: String,
    },
}

/// Destination for generated edges.
pub trait OutputSink {
    /// Accept one edge. Must not block.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the edge could not be delivered.
    fn emit(&mut self, edge: Edge) -> Result<(), SinkError>;
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn emit(&mut self, edge: Edge) -> Result<(), SinkError> {
        (**self).emit(edge)
    }
}

impl<S: OutputSink + ?Sized> OutputSink for &mut S {
    fn emit(&mut self, edge: Edge) -> Result<(), SinkError> {
        (**self).emit(edge)
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// Keeps emitted edges in order, optionally up to a fixed capacity.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    edges: Vec<Edge>,
    capacity: Option<usize>,
}

impl RecordingSink {
    /// Unbounded recorder.
    pub const fn new() -> Self {
        Self {
            edges: Vec::new(),
            capacity: None,
        }
    }

    /// Recorder that reports [`SinkError::Full`] once it holds `capacity`
    /// edges.
    pub const fn bounded(capacity: usize) -> Self {
        Self {
            edges: Vec::new(),
            capacity: Some(capacity),
        }
    }

    /// Edges recorded so far, oldest first.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Remove and return everything recorded so far.
    pub fn take(&mut self) -> Vec<Edge> {
        std::mem::take(&mut self.edges)
    }

    /// Recorded edges on one channel.
    pub fn on_channel(&self, channel: Channel) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |edge| edge.channel == channel)
    }

    /// Number of recorded edges.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl OutputSink for RecordingSink {
    fn emit(&mut self, edge: Edge) -> Result<(), SinkError> {
        if self
            .capacity
            .is_some_and(|capacity| self.edges.len() >= capacity)
        {
            return Err(SinkError::Full);
        }
        self.edges.push(edge);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CountingSink
// ---------------------------------------------------------------------------

/// Tallies edges by channel and level without keeping them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountingSink {
    crank_high: u64,
    crank_low: u64,
    cam_high: u64,
    cam_low: u64,
    last_timestamp: Option<Duration>,
}

impl CountingSink {
    /// Empty tally.
    pub const fn new() -> Self {
        Self {
            crank_high: 0,
            crank_low: 0,
            cam_high: 0,
            cam_low: 0,
            last_timestamp: None,
        }
    }

    /// Edges seen on `channel` at `level`.
    pub const fn count(&self, channel: Channel, level: Level) -> u64 {
        match (channel, level) {
            (Channel::Crank, Level::High) => self.crank_high,
            (Channel::Crank, Level::Low) => self.crank_low,
            (Channel::Cam, Level::High) => self.cam_high,
            (Channel::Cam, Level::Low) => self.cam_low,
        }
    }

    /// Edges seen on `channel` at either level.
    pub const fn channel_total(&self, channel: Channel) -> u64 {
        self.count(channel, Level::High)
            .saturating_add(self.count(channel, Level::Low))
    }

    /// Edges seen on all channels.
    pub const fn total(&self) -> u64 {
        self.channel_total(Channel::Crank)
            .saturating_add(self.channel_total(Channel::Cam))
    }

    /// Timestamp of the most recent edge.
    pub const fn last_timestamp(&self) -> Option<Duration> {
        self.last_timestamp
    }

    /// Record one edge.
    pub const fn record(&mut self, edge: &Edge) {
        let slot = match (edge.channel, edge.level) {
            (Channel::Crank, Level::High) => &mut self.crank_high,
            (Channel::Crank, Level::Low) => &mut self.crank_low,
            (Channel::Cam, Level::High) => &mut self.cam_high,
            (Channel::Cam, Level::Low) => &mut self.cam_low,
        };
        *slot = slot.saturating_add(1);
        self.last_timestamp = Some(edge.timestamp);
    }
}

impl OutputSink for CountingSink {
    fn emit(&mut self, edge: Edge) -> Result<(), SinkError> {
        self.record(&edge);
        Ok(())
    }
}

impl fmt::Display for CountingSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "crank {} high / {} low, cam {} high / {} low",
            self.crank_high, self.crank_low, self.cam_high, self.cam_low
        )
    }
}

// ---------------------------------------------------------------------------
// ChannelSink
// ---------------------------------------------------------------------------

/// Hands edges to another task over a bounded `tokio` channel.
///
/// Uses `try_send` only, so a slow consumer makes edges drop instead of
/// blocking the tick.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<Edge>,
}

impl ChannelSink {
    /// Wrap an existing sender.
    pub const fn new(sender: mpsc::Sender<Edge>) -> Self {
        Self { sender }
    }

    /// Create a sink and the receiver that drains it.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Edge>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(sender), receiver)
    }
}

impl OutputSink for ChannelSink {
    fn emit(&mut self, edge: Edge) -> Result<(), SinkError> {
        self.sender.try_send(edge).map_err(|err| match err {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Disconnected,
        })
    }
}

// ---------------------------------------------------------------------------
// PinSink
// ---------------------------------------------------------------------------

/// Minimal digital output an on-device driver provides.
pub trait OutputPin {
    /// Driver error type.
    type Error: fmt::Display;

    /// Drive the pin to logic 1.
    ///
    /// # Errors
    ///
    /// Returns the driver's error if the write fails.
    fn set_high(&mut self) -> Result<(), Self::Error>;

    /// Drive the pin to logic 0.
    ///
    /// # Errors
    ///
    /// Returns the driver's error if the write fails.
    fn set_low(&mut self) -> Result<(), Self::Error>;

    /// Current output level.
    fn is_high(&self) -> bool;
}

/// Drives a crank pin and a cam pin to the level of each edge.
///
/// An edge carries the level of the sector being entered, not a toggle.
/// On a 60-2 wheel the crank pin therefore rises once after the gap and
/// stays high across all present teeth, then falls for the two missing
/// ones: one pulse per revolution, not a square wave per tooth. Hardware
/// that expects per-tooth transitions needs a driver that toggles on each
/// `High` edge instead.
#[derive(Debug)]
pub struct PinSink<P> {
    crank: P,
    cam: P,
}

impl<P: OutputPin> PinSink<P> {
    /// Pair the two output pins.
    pub const fn new(crank: P, cam: P) -> Self {
        Self { crank, cam }
    }

    /// Pin driven for `channel`.
    pub const fn pin(&self, channel: Channel) -> &P {
        match channel {
            Channel::Crank => &self.crank,
            Channel::Cam => &self.cam,
        }
    }

    /// Release the pins.
    pub fn into_pins(self) -> (P, P) {
        (self.crank, self.cam)
    }
}

impl<P: OutputPin> OutputSink for PinSink<P> {
    fn emit(&mut self, edge: Edge) -> Result<(), SinkError> {
        let pin = match edge.channel {
            Channel::Crank => &mut self.crank,
            Channel::Cam => &mut self.cam,
        };
        let written = match edge.level {
            Level::High => pin.set_high(),
            Level::Low => pin.set_low(),
        };
        written.map_err(|err| SinkError::Pin {
            channel: edge.channel,
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn edge(channel: Channel, level: Level, tooth_index: usize) -> Edge {
        Edge {
            channel,
            level,
            tooth_index,
            timestamp: Duration::from_micros(u64::try_from(tooth_index).unwrap()),
        }
    }

    /// Output pin that can be told to fail.
    #[derive(Debug, Default)]
    struct MockPin {
        high: bool,
        writes: usize,
        broken: bool,
    }

    impl OutputPin for MockPin {
        type Error = &'static str;

        fn set_high(&mut self) -> Result<(), Self::Error> {
            if self.broken {
                return Err("pin not configured as output");
            }
            self.high = true;
            self.writes += 1;
            Ok(())
        }

        fn set_low(&mut self) -> Result<(), Self::Error> {
            if self.broken {
                return Err("pin not configured as output");
            }
            self.high = false;
            self.writes += 1;
            Ok(())
        }

        fn is_high(&self) -> bool {
            self.high
        }
    }

    #[test]
    fn recording_sink_keeps_order() {
        let mut sink = RecordingSink::new();
        sink.emit(edge(Channel::Crank, Level::High, 1)).unwrap();
        sink.emit(edge(Channel::Cam, Level::Low, 6)).unwrap();
        sink.emit(edge(Channel::Crank, Level::High, 2)).unwrap();

        let indices: Vec<usize> = sink.edges().iter().map(|e| e.tooth_index).collect();
        assert_eq!(indices, vec![1, 6, 2]);
        assert_eq!(sink.on_channel(Channel::Crank).count(), 2);

        let taken = sink.take();
        assert_eq!(taken.len(), 3);
        assert!(sink.is_empty());
    }

    #[test]
    fn bounded_recording_sink_reports_full() {
        let mut sink = RecordingSink::bounded(1);
        sink.emit(edge(Channel::Crank, Level::High, 1)).unwrap();
        assert_eq!(
            sink.emit(edge(Channel::Crank, Level::High, 2)),
            Err(SinkError::Full)
        );
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn counting_sink_tallies_by_channel_and_level() {
        let mut sink = CountingSink::new();
        for index in 0..5 {
            sink.emit(edge(Channel::Crank, Level::High, index)).unwrap();
        }
        sink.emit(edge(Channel::Crank, Level::Low, 58)).unwrap();
        sink.emit(edge(Channel::Cam, Level::Low, 6)).unwrap();

        assert_eq!(sink.count(Channel::Crank, Level::High), 5);
        assert_eq!(sink.count(Channel::Crank, Level::Low), 1);
        assert_eq!(sink.channel_total(Channel::Cam), 1);
        assert_eq!(sink.total(), 7);
        assert_eq!(sink.last_timestamp(), Some(Duration::from_micros(6)));
        assert_eq!(sink.to_string(), "crank 5 high / 1 low, cam 0 high / 1 low");
    }

    #[tokio::test]
    async fn channel_sink_drops_when_full_and_detects_close() {
        let (mut sink, mut receiver) = ChannelSink::bounded(2);
        sink.emit(edge(Channel::Crank, Level::High, 1)).unwrap();
        sink.emit(edge(Channel::Crank, Level::High, 2)).unwrap();
        assert_eq!(
            sink.emit(edge(Channel::Crank, Level::High, 3)),
            Err(SinkError::Full)
        );

        assert_eq!(receiver.recv().await.unwrap().tooth_index, 1);
        sink.emit(edge(Channel::Crank, Level::High, 4)).unwrap();

        drop(receiver);
        assert_eq!(
            sink.emit(edge(Channel::Crank, Level::High, 5)),
            Err(SinkError::Disconnected)
        );
    }

    #[test]
    fn pin_sink_follows_edge_levels() {
        let mut sink = PinSink::new(MockPin::default(), MockPin::default());
        sink.emit(edge(Channel::Crank, Level::High, 1)).unwrap();
        sink.emit(edge(Channel::Cam, Level::High, 0)).unwrap();
        sink.emit(edge(Channel::Cam, Level::Low, 6)).unwrap();

        assert!(sink.pin(Channel::Crank).is_high());
        assert!(!sink.pin(Channel::Cam).is_high());

        let (crank, cam) = sink.into_pins();
        assert_eq!(crank.writes, 1);
        assert_eq!(cam.writes, 2);
    }

    #[test]
    fn crank_pin_only_falls_in_the_gap() {
        let mut sink = PinSink::new(MockPin::default(), MockPin::default());
        let mut transitions = 0;
        let mut was_high = false;
        for tooth in (1..60).chain(0..2) {
            let present = tooth < 58;
            sink.emit(edge(Channel::Crank, Level::from(present), tooth))
                .unwrap();
            let high = sink.pin(Channel::Crank).is_high();
            if high != was_high {
                transitions += 1;
            }
            was_high = high;
            assert_eq!(high, present, "tooth {tooth}");
        }
        // Rise on tooth 1, fall entering 58, rise again entering 0.
        assert_eq!(transitions, 3);
    }

    #[test]
    fn pin_failure_names_the_channel() {
        let broken = MockPin {
            broken: true,
            ..MockPin::default()
        };
        let mut sink = PinSink::new(MockPin::default(), broken);
        let err = sink.emit(edge(Channel::Cam, Level::High, 0)).unwrap_err();
        assert_eq!(
            err,
            SinkError::Pin {
                channel: Channel::Cam,
                reason: "pin not configured as output".to_owned(),
            }
        );
        assert!(err.to_string().starts_with("cam pin write failed"));
    }
}
