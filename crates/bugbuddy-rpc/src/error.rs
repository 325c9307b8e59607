//! Error types for sessions and connections

use std::io;

use bugbuddy_protocol::{CodecError, RpcError};
use thiserror::Error;

/// Result type alias for connection operations
pub type Result<T> = std::result::Result<T, ConnectionError>;

/// Failures of a single RPC session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport closed before the exchange finished
    #[error("Connection closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Structured error returned by the remote end
    #[error("Remote error: {0}")]
    Rpc(#[from] RpcError),
}

impl SessionError {
    /// Whether the transport went away, rather than this one exchange failing.
    pub fn is_disconnect(&self) -> bool {
        let err = match self {
            SessionError::Closed => return true,
            SessionError::Io(e) | SessionError::Codec(CodecError::Io(e)) => e,
            _ => return false,
        };
        matches!(
            err.kind(),
            io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::UnexpectedEof
        )
    }
}

/// Errors surfaced by [`crate::Connection`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    /// Refused, reset or otherwise failed socket
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("Connection closed")]
    Closed,

    /// Structured error returned by the daemon
    #[error("Remote error: {0}")]
    Rpc(RpcError),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Retry budget exhausted with auto-spawn unavailable or already used
    #[error("Max connection retries reached after {attempts} attempt(s): {cause}")]
    MaxConnRetriesReached {
        attempts: u32,
        #[source]
        cause: Box<ConnectionError>,
    },

    #[error("Failed to spawn daemon: {0}")]
    Spawn(io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Codec(CodecError),
}

impl ConnectionError {
    /// Whether this error came from the socket rather than the peer.
    pub fn is_transport(&self) -> bool {
        matches!(self, ConnectionError::Transport(_) | ConnectionError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionError::Closed)
    }
}

impl From<SessionError> for ConnectionError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Closed => ConnectionError::Closed,
            SessionError::Io(e) => ConnectionError::Transport(e),
            SessionError::Codec(CodecError::Io(e)) => ConnectionError::Transport(e),
            SessionError::Codec(e) => ConnectionError::Codec(e),
            SessionError::Serialization(e) => ConnectionError::Serialization(e),
            SessionError::Rpc(e) => ConnectionError::Rpc(e),
        }
    }
}
