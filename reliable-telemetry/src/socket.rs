//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`Datagram`] instead of raw bytes, using a pluggable [`Codec`].  All
//! reliability logic lives elsewhere; this module owns only byte I/O.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::wire::{Codec, Datagram, JsonCodec, WireError};

/// Maximum UDP payload size (theoretical limit; telemetry datagrams are tiny).
const MAX_DATAGRAM: usize = 65_535;

/// Errors that can arise from socket operations.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("datagram decode error: {0}")]
    Wire(#[from] WireError),
}

/// An async, datagram-oriented UDP socket.
///
/// All methods are `&self` so the socket can be polled for input inside a
/// `select!` while the same task sends on it.
pub struct Socket {
    /// Address this socket is bound to (filled in after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    codec: Arc<dyn Codec>,
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl Socket {
    /// Bind a new JSON-speaking socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        Self::bind_with_codec(local_addr, Arc::new(JsonCodec)).await
    }

    /// Bind a new socket that encodes datagrams with `codec`.
    pub async fn bind_with_codec(
        local_addr: SocketAddr,
        codec: Arc<dyn Codec>,
    ) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner,
            codec,
        })
    }

    /// Encode `datagram` without sending it.
    ///
    /// The sender keeps these bytes so a retransmission is byte-identical.
    pub fn encode(&self, datagram: &Datagram) -> Result<Vec<u8>, SocketError> {
        Ok(self.codec.encode(datagram)?)
    }

    /// Encode `datagram` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, datagram: &Datagram, dest: SocketAddr) -> Result<(), SocketError> {
        let bytes = self.encode(datagram)?;
        self.send_bytes(&bytes, dest).await
    }

    /// Send already-encoded bytes to `dest`.
    pub async fn send_bytes(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }

    /// Receive the next datagram and decode it.
    ///
    /// Returns `(datagram, sender_address)`.  Datagrams that fail to decode
    /// are returned as [`SocketError::Wire`]; the caller drops them and keeps
    /// reading.
    ///
    /// Waits for readiness first, so a call that loses a `select!` race
    /// touches no buffer at all.
    pub async fn recv_from(&self) -> Result<(Datagram, SocketAddr), SocketError> {
        loop {
            self.inner.readable().await?;
            let mut buf = [0u8; MAX_DATAGRAM];
            match self.inner.try_recv_from(&mut buf) {
                Ok((n, addr)) => {
                    let datagram = self.codec.decode(&buf[..n])?;
                    return Ok((datagram, addr));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
