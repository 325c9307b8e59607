//! Per-method payloads.

use serde::{Deserialize, Serialize};

/// Role of a connected peer. Encoded on the wire as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ClientType {
    Monitor,
    Lsp,
    Unknown,
}

impl ClientType {
    pub fn is_known(self) -> bool {
        !matches!(self, ClientType::Unknown)
    }
}

impl From<i64> for ClientType {
    fn from(value: i64) -> Self {
        match value {
            0 => ClientType::Monitor,
            1 => ClientType::Lsp,
            _ => ClientType::Unknown,
        }
    }
}

impl From<ClientType> for i64 {
    fn from(value: ClientType) -> Self {
        match value {
            ClientType::Monitor => 0,
            ClientType::Lsp => 1,
            ClientType::Unknown => 2,
        }
    }
}

impl std::fmt::Display for ClientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClientType::Monitor => "monitor",
            ClientType::Lsp => "lsp",
            ClientType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// `$/handshake` params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub process_id: u32,
    pub client_type: ClientType,
}

/// `$/handshake` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub success: bool,
    #[serde(default)]
    pub version: String,
    /// Process id of the daemon itself.
    #[serde(default)]
    pub process_id: u32,
    #[serde(default)]
    pub supported_file_extensions: Vec<String>,
}

/// `$/collect` params.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectPayload {
    pub error_code: i32,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub working_dir: String,
}

/// `$/collect` result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CollectResponse {
    pub recognized: u32,
    pub processed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `$/documents/resolve` and `$/documents/update` params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPayload {
    pub filepath: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// `$/documents/delete` and `$/documents/retrieve` params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentIdentifier {
    pub filepath: String,
}

/// `$/documents/retrieve` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentContent {
    pub filepath: String,
    pub content: String,
}

/// Zero-based line/column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub document_path: String,
    pub start_pos: Position,
    pub end_pos: Position,
}

/// `clients/report` params, pushed to editor peers after every collect.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    /// The error text exactly as the monitor captured it.
    pub message: String,
    #[serde(default)]
    pub full_message: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default)]
    pub received: u32,
    #[serde(default)]
    pub processed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer_error: Option<String>,
}
