use std::io;
use std::path::PathBuf;

use bugbuddy_protocol::{INTERNAL_ERROR, INVALID_PARAMS};
use bugbuddy_rpc::ConnectionError;

/// LSP `ServerNotInitialized`.
pub const SERVER_NOT_INITIALIZED: i32 = -32002;
/// LSP `RequestFailed`.
pub const REQUEST_FAILED: i32 = -32803;

#[derive(Debug, thiserror::Error)]
pub enum RunCommandError {
    #[error("No run command for language id {0}")]
    UnknownLanguage(String),

    #[error("Invalid {}: {source}", path.display())]
    Runner {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Server not initialized")]
    NotInitialized,

    #[error("Invalid params: {0}")]
    InvalidParams(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidDocument(String),

    #[error("Unable to run program: {0}")]
    RunCommand(#[from] RunCommandError),

    #[error("Daemon error: {0}")]
    Daemon(#[from] ConnectionError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl GatewayError {
    /// Error code used when this error answers an editor request.
    pub fn code(&self) -> i32 {
        match self {
            GatewayError::NotInitialized => SERVER_NOT_INITIALIZED,
            GatewayError::InvalidParams(_) | GatewayError::InvalidDocument(_) => INVALID_PARAMS,
            GatewayError::RunCommand(_) | GatewayError::Daemon(_) => REQUEST_FAILED,
            GatewayError::Io(_) => INTERNAL_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
