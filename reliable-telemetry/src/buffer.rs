//! Bounded buffer of received telemetry, keyed by sequence number.
//!
//! The map is ordered, so eviction of the oldest (smallest) sequence numbers
//! is a walk from the front rather than a sort of every key.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::record::TelemetryRecord;

#[derive(Debug, Clone)]
struct Slot {
    record: TelemetryRecord,
    received_at: Instant,
}

/// Records seen by the receiver.
///
/// `len()` may exceed `capacity()` between eviction sweeps; after
/// [`ReceivedBuffer::evict`] it never does.
#[derive(Debug)]
pub struct ReceivedBuffer {
    slots: BTreeMap<u32, Slot>,
    capacity: usize,
}

impl ReceivedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: BTreeMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the bound; takes effect at the next eviction.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, seq: u32) -> bool {
        self.slots.contains_key(&seq)
    }

    pub fn get(&self, seq: u32) -> Option<&TelemetryRecord> {
        self.slots.get(&seq).map(|s| &s.record)
    }

    /// Store `record` under its sequence number, replacing any duplicate.
    pub fn insert(&mut self, record: TelemetryRecord, received_at: Instant) {
        self.slots.insert(
            record.sequence_number,
            Slot {
                record,
                received_at,
            },
        );
    }

    /// Arrival time of the nearest buffered record after `seq`.
    pub fn next_arrival_after(&self, seq: u32) -> Option<Instant> {
        let start = seq.checked_add(1)?;
        self.slots.range(start..).next().map(|(_, s)| s.received_at)
    }

    /// Smallest sequence number that survives the next [`evict`], or `None`
    /// when nothing would be evicted.  If everything goes, one past the
    /// largest held.
    ///
    /// [`evict`]: ReceivedBuffer::evict
    pub fn eviction_boundary(&self) -> Option<u32> {
        let excess = self.slots.len().checked_sub(self.capacity)?;
        if excess == 0 {
            return None;
        }
        match self.slots.keys().nth(excess) {
            Some(&seq) => Some(seq),
            None => self
                .slots
                .keys()
                .next_back()
                .map(|&seq| seq.saturating_add(1)),
        }
    }

    /// Remove the smallest sequence numbers until `len() <= capacity()`.
    ///
    /// Returns how many records were dropped.
    pub fn evict(&mut self) -> usize {
        let mut removed = 0;
        while self.slots.len() > self.capacity {
            if self.slots.pop_first().is_none() {
                break;
            }
            removed += 1;
        }
        removed
    }

    /// Sequence numbers currently held, ascending.
    pub fn sequence_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.keys().copied()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
