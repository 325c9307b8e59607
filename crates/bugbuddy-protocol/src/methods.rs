//! Method namespace.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// A method-name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Namespace(&'static str);

/// Daemon control methods.
pub const SERVER: Namespace = Namespace("$");
/// Virtual filesystem document methods.
pub const DOCUMENTS: Namespace = Namespace("$/documents/");
/// Daemon to peer notifications.
pub const CLIENTS: Namespace = Namespace("clients");
/// Editor-specific queries.
pub const LSP: Namespace = Namespace("$/lsp");

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        self.0
    }

    /// `"{namespace}/{bare}"`, with a trailing `/` on the namespace collapsed.
    pub fn method_name(&self, bare: &str) -> String {
        format!("{}/{}", self.0.trim_end_matches('/'), bare)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Wire names, indexed by discriminant.
static WIRE_NAMES: LazyLock<[String; 10]> =
    LazyLock::new(|| Method::ALL.map(|m| m.namespace().method_name(m.bare_name())));

/// Every method in the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Handshake,
    Shutdown,
    Ping,
    Collect,
    ResolveDocument,
    UpdateDocument,
    DeleteDocument,
    RetrieveDocument,
    NearestNode,
    Report,
}

impl Method {
    pub const ALL: [Method; 10] = [
        Method::Handshake,
        Method::Shutdown,
        Method::Ping,
        Method::Collect,
        Method::ResolveDocument,
        Method::UpdateDocument,
        Method::DeleteDocument,
        Method::RetrieveDocument,
        Method::NearestNode,
        Method::Report,
    ];

    pub const fn namespace(self) -> Namespace {
        match self {
            Method::Handshake | Method::Shutdown | Method::Ping | Method::Collect => SERVER,
            Method::ResolveDocument
            | Method::UpdateDocument
            | Method::DeleteDocument
            | Method::RetrieveDocument => DOCUMENTS,
            Method::NearestNode => LSP,
            Method::Report => CLIENTS,
        }
    }

    pub const fn bare_name(self) -> &'static str {
        match self {
            Method::Handshake => "handshake",
            Method::Shutdown => "shutdown",
            Method::Ping => "ping",
            Method::Collect => "collect",
            Method::ResolveDocument => "resolve",
            Method::UpdateDocument => "update",
            Method::DeleteDocument => "delete",
            Method::RetrieveDocument => "retrieve",
            Method::NearestNode => "nearestNode",
            Method::Report => "report",
        }
    }

    /// Full wire name.
    pub fn as_str(self) -> &'static str {
        WIRE_NAMES[self as usize].as_str()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.is(name))
    }

    pub fn is(self, name: &str) -> bool {
        self.as_str() == name
    }

    /// Handshake and shutdown are the only calls accepted from an unregistered peer.
    pub fn requires_identity(self) -> bool {
        !matches!(self, Method::Handshake | Method::Shutdown)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("Unknown method: {}", s))
    }
}
