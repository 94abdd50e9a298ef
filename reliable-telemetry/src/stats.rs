//! Link statistics.
//!
//! Counters are monotone and written only by the owning role's task, so plain
//! relaxed atomics are enough; readers take an eventually-consistent
//! [`StatsSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Percentage of expected records that were never received.
///
/// Records covered by interpolation or last-value fallback still count as
/// lost.  Returns `0.0` when nothing has been seen yet.
pub fn loss_rate(received: u64, lost: u64) -> f64 {
    let total = received + lost;
    if total == 0 {
        return 0.0;
    }
    lost as f64 / total as f64 * 100.0
}

/// Shared counters for one sender or receiver.
#[derive(Debug, Default)]
pub struct Statistics {
    received: AtomicU64,
    lost: AtomicU64,
    interpolated: AtomicU64,
    acks_sent: AtomicU64,
    packets_sent: AtomicU64,
    acknowledged: AtomicU64,
    retransmitted: AtomicU64,
    timed_out: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_received, received);
    counter!(record_lost, lost);
    counter!(record_interpolated, interpolated);
    counter!(record_ack_sent, acks_sent);
    counter!(record_packet_sent, packets_sent);
    counter!(record_acknowledged, acknowledged);
    counter!(record_retransmission, retransmitted);
    counter!(record_timeout, timed_out);

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            interpolated: self.interpolated.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            retransmitted: self.retransmitted.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Statistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Telemetry records accepted by the receiver (duplicates included).
    pub received: u64,
    /// Gaps declared lost by the receiver's sweep.
    pub lost: u64,
    /// Lost records replaced by an interpolated record.
    pub interpolated: u64,
    pub acks_sent: u64,
    pub packets_sent: u64,
    /// Pending entries retired by a matching ack.
    pub acknowledged: u64,
    pub retransmitted: u64,
    /// Pending entries dropped after exhausting their retransmissions.
    pub timed_out: u64,
}

impl StatsSnapshot {
    pub fn loss_rate(&self) -> f64 {
        loss_rate(self.received, self.lost)
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received={} lost={} interpolated={} loss={:.1}% sent={} acked={} retx={} timeouts={}",
            self.received,
            self.lost,
            self.interpolated,
            self.loss_rate(),
            self.packets_sent,
            self.acknowledged,
            self.retransmitted,
            self.timed_out
        )
    }
}
