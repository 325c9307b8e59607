//! Wire protocol shared by the BugBuddy daemon and its peers.
//!
//! Messages are JSON-RPC 2.0 objects carried in length-prefixed frames. A
//! request may carry sidecar fields next to the standard envelope keys; the
//! only one defined is [`PROCESS_ID_FIELD`].

mod calls;
mod codec;
mod identity;
mod lifecycle;
mod methods;
mod protocol;
mod types;

pub use calls::{ClientNotification, DecodeError, ServerCall};
pub use codec::{CodecError, Inbound, RpcCodec, MAX_FRAME_LENGTH};
pub use identity::{PeerIdentity, ProcessIdField, PROCESS_ID_FIELD};
pub use lifecycle::{
    daemon_addr, daemon_port, data_dir, ensure_data_dir, parse_port, DAEMON_PORT_ENV,
    DATA_DIR_ENV, DEFAULT_DAEMON_PORT, DEFAULT_LSP_PORT,
};
pub use methods::{Method, Namespace, CLIENTS, DOCUMENTS, LSP, SERVER};
pub use protocol::{
    Message, Request, RequestId, Response, RpcError, INTERNAL_ERROR, INVALID_PARAMS,
    INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND, PARSE_ERROR,
};
pub use types::{
    ClientInfo, ClientType, CollectPayload, CollectResponse, DocumentContent,
    DocumentIdentifier, DocumentPayload, ErrorReport, Location, Position, ServerInfo,
};

/// Version string advertised during handshake and in editor server info.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reply body of `$/ping`.
pub const PONG: &str = "pong!";
