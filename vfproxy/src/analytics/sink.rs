//! Destinations for extracted analytics records.

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::models::AnalyticsRecord;

/// Receives one record per successfully proxied interaction.
///
/// Implementations must not block: they run on the request path after the response body has
/// been read but before it is returned to the client.
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, record: AnalyticsRecord);
}

/// Writes every record as a single structured log event on the `vfproxy::analytics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AnalyticsSink for LogSink {
    fn record(&self, record: AnalyticsRecord) {
        match serde_json::to_string(&record) {
            Ok(json) => info!(
                target: "vfproxy::analytics",
                session = record.headers.session.as_deref(),
                action_type = record.action_type.as_deref(),
                record = %json,
                "Turn analytics"
            ),
            Err(e) => warn!(error = %e, "Failed to serialize analytics record"),
        }
    }
}

/// Forwards records over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<AnalyticsRecord>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AnalyticsRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl AnalyticsSink for ChannelSink {
    fn record(&self, record: AnalyticsRecord) {
        if self.sender.send(record).is_err() {
            warn!("Analytics receiver dropped, discarding record");
        }
    }
}
