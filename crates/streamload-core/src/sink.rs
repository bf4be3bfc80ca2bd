//! Metrics sink: the write-only side of the channel to the aggregator

use async_trait::async_trait;
use streamload_common::{LoadError, Result};
use tokio::sync::mpsc;

use crate::event::MetricEvent;

/// Accepts metric events from any number of drivers concurrently.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn publish(&self, event: MetricEvent) -> Result<()>;
}

/// Sender half of [`metrics_channel`]. Cheap to clone, one per driver.
#[derive(Debug, Clone)]
pub enum ChannelSink {
    Bounded(mpsc::Sender<MetricEvent>),
    Unbounded(mpsc::UnboundedSender<MetricEvent>),
}

#[derive(Debug)]
pub enum MetricsReceiver {
    Bounded(mpsc::Receiver<MetricEvent>),
    Unbounded(mpsc::UnboundedReceiver<MetricEvent>),
}

/// Creates an in-process metrics queue.
///
/// `None` gives an unbounded queue where publishing never waits. `Some(n)`
/// bounds the queue at `n` events and publishing waits for capacity.
pub fn metrics_channel(buffer: Option<usize>) -> (ChannelSink, MetricsReceiver) {
    match buffer {
        Some(n) => {
            let (tx, rx) = mpsc::channel(n.max(1));
            (ChannelSink::Bounded(tx), MetricsReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (ChannelSink::Unbounded(tx), MetricsReceiver::Unbounded(rx))
        }
    }
}

#[async_trait]
impl MetricsSink for ChannelSink {
    async fn publish(&self, event: MetricEvent) -> Result<()> {
        match self {
            ChannelSink::Bounded(tx) => tx.send(event).await.map_err(|_| LoadError::SinkClosed),
            ChannelSink::Unbounded(tx) => tx.send(event).map_err(|_| LoadError::SinkClosed),
        }
    }
}

impl MetricsReceiver {
    /// Next event, or `None` once every sink handle is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<MetricEvent> {
        match self {
            MetricsReceiver::Bounded(rx) => rx.recv().await,
            MetricsReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    pub fn try_recv(&mut self) -> Option<MetricEvent> {
        match self {
            MetricsReceiver::Bounded(rx) => rx.try_recv().ok(),
            MetricsReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}
