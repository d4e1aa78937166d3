//! Consumer side of the bounded edge queue.
//!
//! Stands in for the on-device pin driver: drains every edge the engine
//! queued and tallies it, so the end-of-run report shows what a scope on
//! the sensor lines would have seen.

use cranksim_core::sink::CountingSink;
use cranksim_types::Edge;
use tokio::sync::mpsc;
use tracing::trace;

/// Drain `receiver` until every sender is gone, returning the tally.
pub async fn drain_edges(mut receiver: mpsc::Receiver<Edge>) -> CountingSink {
    let mut counts = CountingSink::new();
    while let Some(edge) = receiver.recv().await {
        trace!(
            channel = %edge.channel,
            level = %edge.level,
            tooth = edge.tooth_index,
            at = ?edge.timestamp,
            "edge"
        );
        counts.record(&edge);
    }
    counts
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use cranksim_core::sink::{ChannelSink, OutputSink};
    use cranksim_types::{Channel, Level};

    use super::*;

    #[tokio::test]
    async fn tallies_everything_queued_before_close() {
        let (mut sink, receiver) = ChannelSink::bounded(8);
        let consumer = tokio::spawn(drain_edges(receiver));

        for tooth_index in 0..3 {
            sink.emit(Edge {
                channel: Channel::Crank,
                level: Level::High,
                tooth_index,
                timestamp: Duration::from_millis(1),
            })
            .unwrap();
        }
        sink.emit(Edge {
            channel: Channel::Cam,
            level: Level::Low,
            tooth_index: 6,
            timestamp: Duration::from_millis(2),
        })
        .unwrap();
        drop(sink);

        let counts = consumer.await.unwrap();
        assert_eq!(counts.count(Channel::Crank, Level::High), 3);
        assert_eq!(counts.count(Channel::Cam, Level::Low), 1);
        assert_eq!(counts.last_timestamp(), Some(Duration::from_millis(2)));
    }
}
