//! Periodic sweep timers.
//!
//! Each role drives its housekeeping from fixed-period tokio intervals:
//! - sender: the retransmission sweep over the pending-ack table;
//! - receiver: the gap sweep and the (slower) buffer eviction sweep.
//!
//! A sweep that runs late does not try to catch up with a burst of ticks;
//! the next tick is simply pushed back.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Smallest period accepted; `tokio::time::interval` panics on zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// An interval whose first tick fires one `period` from now.
pub fn sweep_timer(period: Duration) -> Interval {
    let period = period.max(MIN_PERIOD);
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}
