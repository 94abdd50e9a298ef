//! `reliable-telemetry` — acknowledged, gap-filling telemetry over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   telemetry (JSON)   ┌────────────┐
//!  │  Sender  │─────────────────────▶│  Receiver  │
//!  └────┬─────┘                      └─────┬──────┘
//!       │ PendingAckTable                  │ ReceivedBuffer
//!       │ (retransmit / timeout)           │ (gap sweep / interpolate)
//!       │◀──────────── ACKs ───────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │  Socket  (tokio UdpSocket + Codec)│
//!  └───────────────────────────────────┘
//! ```
//!
//! Each role runs as one tokio task; the application talks to it through a
//! handle and listens on an [`event::EventStream`].
//!
//! - [`record`]      — telemetry and ack records
//! - [`wire`]        — datagram encoding (JSON)
//! - [`socket`]      — async UDP socket carrying [`wire::Datagram`]s
//! - [`sender`]      — sequencing, ack tracking, retransmission
//! - [`pending`]     — the sender's table of unacknowledged records
//! - [`receiver`]    — acking, gap detection, loss recovery
//! - [`buffer`]      — the receiver's ordered record buffer
//! - [`interpolate`] — synthesizing lost records from their neighbours
//! - [`stats`]       — counters and loss rate
//! - [`event`]       — notifications to the application
//! - [`config`]      — per-role tunables
//! - [`state`]       — session lifecycle and errors
//! - [`timer`]       — periodic sweep timers
//! - [`simulator`]   — optional loss/duplication on the outbound path

pub mod buffer;
pub mod config;
pub mod event;
pub mod interpolate;
pub mod pending;
pub mod receiver;
pub mod record;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod stats;
pub mod timer;
pub mod wire;

pub use config::{ReceiverConfig, SenderConfig, DEFAULT_PORT};
pub use event::{Event, EventStream};
pub use receiver::{Cursors, Receiver};
pub use record::{AckRecord, TelemetryRecord};
pub use sender::Sender;
pub use simulator::SimulatorConfig;
pub use state::{SessionError, SessionState};
pub use stats::StatsSnapshot;
