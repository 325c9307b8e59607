//! Client side of the BugBuddy coordination plane.
//!
//! [`RpcSession`] runs one duplex JSON-RPC conversation over any byte
//! stream and is shared by the daemon and its peers. [`Connection`] wraps a
//! session with the peer lifecycle: handshake, reconnection and daemon
//! auto-spawn.

mod connection;
mod error;
mod session;
mod spawn;
pub mod transport;

pub use connection::{
    default_should_retry, execute, Connection, ConnectionEvent, ConnectionOptions,
    ConnectionState, NotificationHandler, RetryPredicate,
};
pub use error::{ConnectionError, Result, SessionError};
pub use session::{RequestHandler, RpcSession, SessionId};
pub use spawn::{DaemonSpawner, ProcessSpawner};
