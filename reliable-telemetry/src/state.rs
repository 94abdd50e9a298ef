//! Session lifecycle types shared by the sender and receiver.
//!
//! ```text
//!  Stopped ──bind ok──▶ Listening (receiver) ──stop / drop──▶ Stopped
//!     │        └──────▶ Sending   (sender)   ──stop / drop──▶ Stopped
//!     │
//!     └──bind fails──▶ Stopped (start returns SessionError::Bind)
//! ```

use crate::socket::SocketError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Stopped,
    Listening,
    Sending,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Listening => f.write_str("listening"),
            Self::Sending => f.write_str("sending"),
        }
    }
}

/// Errors surfaced by sender/receiver handles.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The socket could not be bound; nothing was started.
    #[error("failed to bind socket: {0}")]
    Bind(#[source] SocketError),
    /// The session task has already stopped.
    #[error("session is stopped")]
    Stopped,
}
