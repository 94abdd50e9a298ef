//! Records carried over the wire.
//!
//! A [`TelemetryRecord`] is one position/speed/status update produced by a
//! sender session.  An [`AckRecord`] echoes a telemetry sequence number back
//! to the sender.  Both are plain data; encoding lives in [`crate::wire`].

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Status text stamped on records synthesized by [`crate::interpolate`].
pub const INTERPOLATED_STATUS: &str = "INTERPOLATED";

/// Milliseconds since the Unix epoch, as carried in the `timestamp` field.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// TelemetryRecord
// ---------------------------------------------------------------------------

/// One telemetry update.
///
/// `sequence_number` identifies the record within a single sender session;
/// the sender assigns it (starting at 1) and overwrites whatever the caller
/// supplied.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetryRecord {
    #[serde(rename = "seq")]
    pub sequence_number: u32,
    /// Epoch milliseconds.
    pub timestamp: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "needsAck", default)]
    pub needs_ack: bool,
}

impl TelemetryRecord {
    /// Build an unsequenced record; the sender fills in sequence number,
    /// timestamp and `needs_ack`.
    pub fn new(latitude: f64, longitude: f64, speed: f64, status: impl Into<String>) -> Self {
        Self {
            sequence_number: 0,
            timestamp: 0,
            latitude,
            longitude,
            speed,
            status: status.into(),
            needs_ack: false,
        }
    }

    /// Copy of `self` re-labelled as `seq` with a fresh timestamp.
    ///
    /// Used as the stand-in for a lost record when interpolation is off.
    pub fn restamped(&self, seq: u32) -> Self {
        Self {
            sequence_number: seq,
            timestamp: now_millis(),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// AckRecord
// ---------------------------------------------------------------------------

/// Acknowledgement of a single telemetry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckRecord {
    #[serde(rename = "seq")]
    pub sequence_number: u32,
    pub timestamp: u64,
}

impl AckRecord {
    /// Acknowledge `seq` as of now.
    pub fn for_sequence(seq: u32) -> Self {
        Self {
            sequence_number: seq,
            timestamp: now_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_unsequenced() {
        let r = TelemetryRecord::new(39.0, 35.5, 25.0, "OK");
        assert_eq!(r.sequence_number, 0);
        assert_eq!(r.status, "OK");
        assert!(!r.needs_ack);
    }

    #[test]
    fn restamped_keeps_position_and_changes_seq() {
        let mut r = TelemetryRecord::new(1.0, 2.0, 3.0, "OK");
        r.sequence_number = 7;
        r.timestamp = 1;
        let copy = r.restamped(9);
        assert_eq!(copy.sequence_number, 9);
        assert_eq!((copy.latitude, copy.longitude, copy.speed), (1.0, 2.0, 3.0));
        assert_eq!(copy.status, "OK");
        assert!(copy.timestamp >= r.timestamp);
    }

    #[test]
    fn ack_echoes_sequence() {
        let ack = AckRecord::for_sequence(42);
        assert_eq!(ack.sequence_number, 42);
        assert!(ack.timestamp > 0);
    }
}
