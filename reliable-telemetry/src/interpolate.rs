//! Synthesis of a plausible record for a missing sequence number.
//!
//! The search for neighbours is bounded to [`SEARCH_WINDOW`] steps in each
//! direction.  Past the window the result degrades to a copy of the last
//! valid record.

use crate::buffer::ReceivedBuffer;
use crate::record::{now_millis, TelemetryRecord, INTERPOLATED_STATUS};

/// Maximum distance searched on either side of the missing sequence number.
pub const SEARCH_WINDOW: u32 = 9;

/// Build a stand-in for `seq` from its nearest buffered neighbours.
///
/// - both neighbours found: latitude, longitude and speed are linearly
///   interpolated by sequence distance;
/// - one neighbour found: its values are copied;
/// - none found: `last_valid`'s values are copied.
///
/// The result always carries `seq`, the current time and
/// [`INTERPOLATED_STATUS`].
pub fn interpolate(seq: u32, buffer: &ReceivedBuffer, last_valid: &TelemetryRecord) -> TelemetryRecord {
    let before = (1..=SEARCH_WINDOW)
        .filter_map(|d| seq.checked_sub(d))
        .take_while(|&s| s > 0)
        .find_map(|s| buffer.get(s));
    let after = (1..=SEARCH_WINDOW)
        .filter_map(|d| seq.checked_add(d))
        .find_map(|s| buffer.get(s));

    let (latitude, longitude, speed) = match (before, after) {
        (Some(b), Some(a)) => {
            let factor = f64::from(seq - b.sequence_number)
                / f64::from(a.sequence_number - b.sequence_number);
            (
                lerp(b.latitude, a.latitude, factor),
                lerp(b.longitude, a.longitude, factor),
                lerp(b.speed, a.speed, factor),
            )
        }
        (Some(b), None) => (b.latitude, b.longitude, b.speed),
        (None, Some(a)) => (a.latitude, a.longitude, a.speed),
        (None, None) => (last_valid.latitude, last_valid.longitude, last_valid.speed),
    };

    TelemetryRecord {
        sequence_number: seq,
        timestamp: now_millis(),
        latitude,
        longitude,
        speed,
        status: INTERPOLATED_STATUS.to_string(),
        needs_ack: false,
    }
}

#[inline]
fn lerp(from: f64, to: f64, factor: f64) -> f64 {
    from + factor * (to - from)
}
