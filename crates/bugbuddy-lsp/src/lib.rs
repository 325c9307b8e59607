//! Language-server peer of the BugBuddy daemon.
//!
//! The gateway speaks LSP to an editor over stdio (or TCP), mirrors open
//! documents into the daemon's virtual file system and turns
//! `clients/report` notifications into published diagnostics.

pub mod codec;
pub mod diagnostics;
pub mod document;
mod error;
pub mod gateway;
pub mod run_command;

pub use codec::LspCodec;
pub use error::{GatewayError, Result, RunCommandError, REQUEST_FAILED, SERVER_NOT_INITIALIZED};
pub use gateway::{
    listen, serve, FetchRunCommandParams, FetchRunCommandResult, Gateway, GatewayConfig,
    FETCH_RUN_COMMAND_METHOD, STATUS_METHOD,
};
