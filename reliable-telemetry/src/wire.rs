//! Wire encoding of datagrams.
//!
//! Every datagram exchanged between a sender and a receiver is a
//! [`Datagram`]: either a telemetry record or an acknowledgement.  The byte
//! representation is a replaceable concern behind the [`Codec`] trait;
//! [`JsonCodec`] is the default and produces compact JSON objects:
//!
//! ```text
//! telemetry: {"seq":7,"timestamp":1700000000000,"latitude":39.0,
//!             "longitude":35.5,"speed":25.0,"status":"OK","needsAck":true}
//! ack:       {"type":"ACK","seq":7,"timestamp":1700000000012}
//! ```
//!
//! An object whose `type` field is `"ACK"` decodes as an acknowledgement;
//! any other object decodes as telemetry.
//!
//! No I/O happens here.

use serde::Serialize;
use serde_json::Value;

use crate::record::{AckRecord, TelemetryRecord};

/// Discriminator value carried in the `type` field of an acknowledgement.
pub const ACK_TYPE: &str = "ACK";

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Datagram {
    Telemetry(TelemetryRecord),
    Ack(AckRecord),
}

/// Errors that can arise when encoding or decoding a datagram.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed JSON datagram: {0}")]
    Json(#[from] serde_json::Error),
    #[error("datagram is not a JSON object")]
    NotAnObject,
}

/// Turns [`Datagram`]s into bytes and back.
pub trait Codec: Send + Sync {
    fn encode(&self, datagram: &Datagram) -> Result<Vec<u8>, WireError>;
    fn decode(&self, buf: &[u8]) -> Result<Datagram, WireError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// Compact JSON encoding, compatible with the historical wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[derive(Serialize)]
struct AckFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    ack: &'a AckRecord,
}

impl Codec for JsonCodec {
    fn encode(&self, datagram: &Datagram) -> Result<Vec<u8>, WireError> {
        let bytes = match datagram {
            Datagram::Telemetry(record) => serde_json::to_vec(record)?,
            Datagram::Ack(ack) => serde_json::to_vec(&AckFrame {
                kind: ACK_TYPE,
                ack,
            })?,
        };
        Ok(bytes)
    }

    fn decode(&self, buf: &[u8]) -> Result<Datagram, WireError> {
        let value: Value = serde_json::from_slice(buf)?;
        if !value.is_object() {
            return Err(WireError::NotAnObject);
        }
        if value.get("type").and_then(Value::as_str) == Some(ACK_TYPE) {
            Ok(Datagram::Ack(serde_json::from_value(value)?))
        } else {
            Ok(Datagram::Telemetry(serde_json::from_value(value)?))
        }
    }
}
