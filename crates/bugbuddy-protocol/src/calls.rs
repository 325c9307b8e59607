//! Typed decoding of method params.
//!
//! Params are turned into a [`ServerCall`] or [`ClientNotification`] as soon
//! as the method name is known, so handlers never see raw JSON.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::methods::Method;
use crate::types::{
    ClientInfo, CollectPayload, DocumentIdentifier, DocumentPayload, ErrorReport,
};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params for {method}: {source}")]
    InvalidParams {
        method: Method,
        #[source]
        source: serde_json::Error,
    },
}

/// Requests a peer can send to the daemon.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerCall {
    Handshake(ClientInfo),
    Shutdown,
    Ping,
    Collect(CollectPayload),
    ResolveDocument(DocumentPayload),
    UpdateDocument(DocumentPayload),
    DeleteDocument(DocumentIdentifier),
    RetrieveDocument(DocumentIdentifier),
    NearestNode(Value),
}

fn params<T: DeserializeOwned>(method: Method, value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|source| DecodeError::InvalidParams { method, source })
}

impl ServerCall {
    pub fn decode(method: &str, value: Value) -> Result<Self, DecodeError> {
        let method =
            Method::from_name(method).ok_or_else(|| DecodeError::MethodNotFound(method.into()))?;
        Ok(match method {
            Method::Handshake => ServerCall::Handshake(params(method, value)?),
            Method::Shutdown => ServerCall::Shutdown,
            Method::Ping => ServerCall::Ping,
            Method::Collect => ServerCall::Collect(params(method, value)?),
            Method::ResolveDocument => ServerCall::ResolveDocument(params(method, value)?),
            Method::UpdateDocument => ServerCall::UpdateDocument(params(method, value)?),
            Method::DeleteDocument => ServerCall::DeleteDocument(params(method, value)?),
            Method::RetrieveDocument => ServerCall::RetrieveDocument(params(method, value)?),
            Method::NearestNode => ServerCall::NearestNode(value),
            Method::Report => return Err(DecodeError::MethodNotFound(method.to_string())),
        })
    }

    pub fn method(&self) -> Method {
        match self {
            ServerCall::Handshake(_) => Method::Handshake,
            ServerCall::Shutdown => Method::Shutdown,
            ServerCall::Ping => Method::Ping,
            ServerCall::Collect(_) => Method::Collect,
            ServerCall::ResolveDocument(_) => Method::ResolveDocument,
            ServerCall::UpdateDocument(_) => Method::UpdateDocument,
            ServerCall::DeleteDocument(_) => Method::DeleteDocument,
            ServerCall::RetrieveDocument(_) => Method::RetrieveDocument,
            ServerCall::NearestNode(_) => Method::NearestNode,
        }
    }

    /// Wire params for this call.
    pub fn params(&self) -> Result<Value, serde_json::Error> {
        match self {
            ServerCall::Handshake(info) => serde_json::to_value(info),
            ServerCall::Shutdown | ServerCall::Ping => Ok(Value::Null),
            ServerCall::Collect(payload) => serde_json::to_value(payload),
            ServerCall::ResolveDocument(doc) | ServerCall::UpdateDocument(doc) => {
                serde_json::to_value(doc)
            }
            ServerCall::DeleteDocument(id) | ServerCall::RetrieveDocument(id) => {
                serde_json::to_value(id)
            }
            ServerCall::NearestNode(value) => Ok(value.clone()),
        }
    }
}

/// Notifications the daemon pushes to peers.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientNotification {
    Report(ErrorReport),
}

impl ClientNotification {
    pub fn decode(method: &str, value: Value) -> Result<Self, DecodeError> {
        match Method::from_name(method) {
            Some(Method::Report) => Ok(ClientNotification::Report(params(Method::Report, value)?)),
            _ => Err(DecodeError::MethodNotFound(method.into())),
        }
    }

    pub fn method(&self) -> Method {
        match self {
            ClientNotification::Report(_) => Method::Report,
        }
    }

    pub fn params(&self) -> Result<Value, serde_json::Error> {
        match self {
            ClientNotification::Report(report) => serde_json::to_value(report),
        }
    }
}
