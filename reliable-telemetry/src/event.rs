//! Notifications delivered to the application.
//!
//! Each sender or receiver owns one [`EventSink`]; events arrive on the paired
//! unbounded receiver in the order they were emitted.  Emission never blocks
//! the owning task.

use tokio::sync::mpsc;

use crate::record::TelemetryRecord;
use crate::stats::StatsSnapshot;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A received, interpolated or fallback record for the consumer.
    TelemetryReceived(TelemetryRecord),
    /// The receiver started (`true`) or stopped (`false`) listening.
    ConnectionStatusChanged(bool),
    /// A counter changed.
    StatisticsUpdated(StatsSnapshot),
    /// The pending entry for this sequence number was acknowledged.
    AckReceived(u32),
    /// The record with this sequence number ran out of retransmissions.
    PacketTimeout(u32),
    /// A non-fatal socket failure.
    TransportError(String),
}

/// Consumer side of an [`EventSink`].
pub type EventStream = mpsc::UnboundedReceiver<Event>;

/// Producer side of the event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    pub fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver `event`.  A consumer that went away is not an error.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}
