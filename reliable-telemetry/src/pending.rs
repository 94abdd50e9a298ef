//! Pending-ack table: reliable sends awaiting acknowledgement.
//!
//! [`PendingAckTable`] is owned by the sender task.  It never touches the
//! socket; [`PendingAckTable::sweep`] reports which entries must be resent
//! (with their original bytes) and which have exhausted their retries, and
//! the caller performs the I/O.
//!
//! # Entry lifecycle
//!
//! ```text
//!  insert ──▶ in flight ──ack──▶ removed (acknowledged)
//!                 │   ▲
//!        timeout  │   │ retransmit (count < max)
//!                 ▼   │
//!              expired ──count == max──▶ removed (timed out)
//! ```

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// A reliable send that has not been acknowledged yet.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    /// Encoded datagram; resent verbatim on timeout.
    pub payload: Vec<u8>,
    /// Time of the most recent (re)transmission.
    pub sent_at: Instant,
    /// Retransmissions performed so far (0 = only the original send).
    pub retransmission_count: u32,
}

/// Outcome of a timeout sweep.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// `(seq, bytes)` to resend, in ascending sequence order.
    pub retransmit: Vec<(u32, Vec<u8>)>,
    /// Sequence numbers removed because their retries ran out.
    pub expired: Vec<u32>,
}

/// In-flight reliable records keyed by sequence number.
#[derive(Debug, Default)]
pub struct PendingAckTable {
    entries: BTreeMap<u32, PendingEntry>,
}

impl PendingAckTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, seq: u32) -> bool {
        self.entries.contains_key(&seq)
    }

    pub fn get(&self, seq: u32) -> Option<&PendingEntry> {
        self.entries.get(&seq)
    }

    /// Track `seq`, whose encoded datagram `payload` was just transmitted for
    /// the first time.
    pub fn insert(&mut self, seq: u32, payload: Vec<u8>, now: Instant) {
        self.entries.insert(
            seq,
            PendingEntry {
                payload,
                sent_at: now,
                retransmission_count: 0,
            },
        );
    }

    /// Retire the entry for `seq`.
    ///
    /// Returns `false` for an ack that matches nothing (duplicate, stale, or
    /// for a record that already timed out).
    pub fn acknowledge(&mut self, seq: u32) -> bool {
        self.entries.remove(&seq).is_some()
    }

    /// Walk every entry older than `ack_timeout`.
    ///
    /// Entries with retries left get their count bumped and `sent_at`
    /// refreshed to `now`; the rest are removed.
    pub fn sweep(&mut self, now: Instant, ack_timeout: Duration, max_retransmissions: u32) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        for (&seq, entry) in self.entries.iter_mut() {
            if now.saturating_duration_since(entry.sent_at) <= ack_timeout {
                continue;
            }
            if entry.retransmission_count < max_retransmissions {
                entry.retransmission_count += 1;
                entry.sent_at = now;
                outcome.retransmit.push((seq, entry.payload.clone()));
            } else {
                outcome.expired.push(seq);
            }
        }

        for seq in &outcome.expired {
            self.entries.remove(seq);
        }
        outcome
    }

    /// Drop every entry (used on shutdown).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(3000);

    fn table_with(seqs: &[u32], now: Instant) -> PendingAckTable {
        let mut t = PendingAckTable::new();
        for &s in seqs {
            t.insert(s, vec![s as u8], now);
        }
        t
    }

    #[test]
    fn acks_before_timeout_empty_the_table() {
        let t0 = Instant::now();
        let mut t = table_with(&[1, 2, 3, 4, 5], t0);
        for s in 1..=5 {
            assert!(t.acknowledge(s));
        }
        assert!(t.is_empty());
        let out = t.sweep(t0 + TIMEOUT * 10, TIMEOUT, 3);
        assert_eq!(out, SweepOutcome::default());
    }

    #[test]
    fn duplicate_ack_is_ignored() {
        let mut t = table_with(&[1], Instant::now());
        assert!(t.acknowledge(1));
        assert!(!t.acknowledge(1));
        assert!(!t.acknowledge(99));
    }

    #[test]
    fn fresh_entries_are_left_alone() {
        let t0 = Instant::now();
        let mut t = table_with(&[1], t0);
        let out = t.sweep(t0 + TIMEOUT, TIMEOUT, 3);
        assert!(out.retransmit.is_empty());
        assert!(out.expired.is_empty());
        assert_eq!(t.get(1).unwrap().retransmission_count, 0);
    }

    #[test]
    fn unacked_entry_retransmits_max_times_then_expires() {
        let max = 3;
        let step = TIMEOUT + Duration::from_millis(1);
        let mut now = Instant::now();
        let mut t = table_with(&[7], now);

        let mut retransmissions = 0;
        let mut expired = Vec::new();
        for _ in 0..10 {
            now += step;
            let out = t.sweep(now, TIMEOUT, max);
            for (seq, bytes) in &out.retransmit {
                assert_eq!(*seq, 7);
                assert_eq!(bytes, &vec![7u8], "payload must be resent verbatim");
                retransmissions += 1;
            }
            expired.extend(out.expired);
        }

        assert_eq!(retransmissions, max);
        assert_eq!(expired, vec![7], "reported exactly once");
        assert!(!t.contains(7));
        // A late ack after expiry matches nothing.
        assert!(!t.acknowledge(7));
    }

    #[test]
    fn retransmit_refreshes_sent_time() {
        let t0 = Instant::now();
        let mut t = table_with(&[1], t0);
        let later = t0 + TIMEOUT + Duration::from_millis(5);
        t.sweep(later, TIMEOUT, 3);
        let e = t.get(1).unwrap();
        assert_eq!(e.sent_at, later);
        assert_eq!(e.retransmission_count, 1);

        // Not yet due again.
        let out = t.sweep(later + Duration::from_millis(10), TIMEOUT, 3);
        assert!(out.retransmit.is_empty());
    }

    #[test]
    fn zero_max_retransmissions_expires_on_first_timeout() {
        let t0 = Instant::now();
        let mut t = table_with(&[1, 2], t0);
        let out = t.sweep(t0 + TIMEOUT * 2, TIMEOUT, 0);
        assert!(out.retransmit.is_empty());
        assert_eq!(out.expired, vec![1, 2]);
        assert!(t.is_empty());
    }

    #[test]
    fn timeouts_are_independent_per_entry() {
        let t0 = Instant::now();
        let mut t = table_with(&[1], t0);
        t.insert(2, vec![2], t0 + TIMEOUT);
        let out = t.sweep(t0 + TIMEOUT + Duration::from_millis(1), TIMEOUT, 3);
        assert_eq!(out.retransmit.len(), 1);
        assert_eq!(out.retransmit[0].0, 1);
    }
}
