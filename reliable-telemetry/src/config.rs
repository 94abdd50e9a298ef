//! Tunables for the sender and receiver roles.
//!
//! Both structs are plain data with `Default` impls; the values that can also
//! change while running are exposed as setters on the role handles.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::simulator::SimulatorConfig;

/// UDP port the receiver listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 12345;

/// Configuration for [`crate::sender::Sender`].
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Local address for the sender's socket (acks arrive here).
    pub bind: SocketAddr,
    /// Where telemetry is sent.
    pub target: SocketAddr,
    /// Request an ack for every record and retransmit until acknowledged.
    pub reliability_enabled: bool,
    /// How long a record may stay unacknowledged before it is resent.
    pub ack_timeout: Duration,
    /// Resends allowed per record before it is reported as timed out.
    pub max_retransmissions: u32,
    /// Period of the retransmission sweep.
    pub sweep_interval: Duration,
    /// Optional fault injection on outbound datagrams.
    pub fault: Option<SimulatorConfig>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            target: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            reliability_enabled: true,
            ack_timeout: Duration::from_millis(3000),
            max_retransmissions: 3,
            sweep_interval: Duration::from_secs(1),
            fault: None,
        }
    }
}

/// Configuration for [`crate::receiver::Receiver`].
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub bind: SocketAddr,
    /// Synthesize lost records from their neighbours instead of repeating
    /// the last valid record.
    pub interpolation_enabled: bool,
    /// Records kept for gap detection and interpolation.
    pub buffer_capacity: usize,
    /// Grace period before a gap is declared lost: a hole is only filled once
    /// the record after it has been buffered for this long.
    pub packet_timeout: Duration,
    /// Period of the gap sweep.
    pub gap_sweep_interval: Duration,
    /// Period of the buffer eviction sweep.
    pub eviction_interval: Duration,
    /// Optional fault injection on outbound acks.
    pub fault: Option<SimulatorConfig>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            interpolation_enabled: true,
            buffer_capacity: 1000,
            packet_timeout: Duration::from_millis(5000),
            gap_sweep_interval: Duration::from_secs(1),
            eviction_interval: Duration::from_secs(10),
            fault: None,
        }
    }
}
