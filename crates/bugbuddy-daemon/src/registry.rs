//! Peer registry for connected processes.
//!
//! Maps process ids to the session they handshook on. Entries are created by
//! `$/handshake`, removed by `$/shutdown` or when the session's transport
//! closes. Broadcasts snapshot their targets under the lock and send after
//! releasing it.

use std::collections::HashMap;
use std::fmt;

use bugbuddy_protocol::{ClientType, Method, PeerIdentity};
use bugbuddy_rpc::{RpcSession, SessionError, SessionId};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RegisteredClient {
    pub id: u32,
    pub client_type: ClientType,
    pub connection: RpcSession,
}

impl RegisteredClient {
    pub fn identity(&self) -> PeerIdentity {
        PeerIdentity::new(self.id, self.client_type)
    }
}

/// One peer that could not be notified.
#[derive(Debug)]
pub struct PeerFailure {
    pub id: u32,
    pub error: SessionError,
}

/// Every per-peer failure of one broadcast.
#[derive(Debug)]
pub struct NotifyError {
    pub failures: Vec<PeerFailure>,
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to notify {} peer(s)", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}: {}", sep, failure.id, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for NotifyError {}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    clients: RwLock<HashMap<u32, RegisteredClient>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer, replacing any earlier entry for the same id.
    pub fn insert(&self, identity: PeerIdentity, connection: RpcSession) -> Option<RegisteredClient> {
        let client = RegisteredClient {
            id: identity.process_id,
            client_type: identity.client_type,
            connection,
        };
        let previous = self.clients.write().insert(identity.process_id, client);
        match &previous {
            Some(old) => info!("Peer {} re-registered (was {})", identity, old.client_type),
            None => info!("Peer {} registered", identity),
        }
        previous
    }

    pub fn remove(&self, id: u32) -> Option<RegisteredClient> {
        let removed = self.clients.write().remove(&id);
        if let Some(client) = &removed {
            info!("Peer {} removed", client.identity());
        }
        removed
    }

    /// Remove `id` only if it is still bound to `session`.
    pub fn remove_if_session(&self, id: u32, session: SessionId) -> Option<RegisteredClient> {
        let mut clients = self.clients.write();
        if clients.get(&id).map(|c| c.connection.id()) != Some(session) {
            return None;
        }
        let removed = clients.remove(&id);
        drop(clients);
        if let Some(client) = &removed {
            info!("Peer {} shut down", client.identity());
        }
        removed
    }

    /// Drop every entry bound to `session`. Returns the removed ids.
    pub fn remove_session(&self, session: SessionId) -> Vec<u32> {
        let mut removed = Vec::new();
        self.clients.write().retain(|id, client| {
            let keep = client.connection.id() != session;
            if !keep {
                removed.push(*id);
            }
            keep
        });
        if !removed.is_empty() {
            info!("{} closed, removed peers {:?}", session, removed);
        }
        removed
    }

    /// Remove everything, returning what was registered.
    pub fn drain(&self) -> Vec<RegisteredClient> {
        self.clients.write().drain().map(|(_, c)| c).collect()
    }

    pub fn identity(&self, id: u32) -> Option<PeerIdentity> {
        self.clients.read().get(&id).map(RegisteredClient::identity)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.clients.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Ids of peers whose type is any of `types`, ascending.
    pub fn process_ids(&self, types: &[ClientType]) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .clients
            .read()
            .values()
            .filter(|c| types.contains(&c.client_type))
            .map(|c| c.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Send a notification to `ids`, or to everyone when `ids` is empty.
    ///
    /// Returns how many peers were reached. Every failure is collected,
    /// including listed ids that are not registered.
    pub async fn notify(
        &self,
        method: Method,
        params: Value,
        ids: &[u32],
    ) -> Result<usize, NotifyError> {
        let mut failures = Vec::new();
        let targets: Vec<(u32, RpcSession)> = {
            let clients = self.clients.read();
            if ids.is_empty() {
                clients
                    .values()
                    .map(|c| (c.id, c.connection.clone()))
                    .collect()
            } else {
                ids.iter()
                    .filter_map(|id| match clients.get(id) {
                        Some(c) => Some((*id, c.connection.clone())),
                        None => {
                            failures.push(PeerFailure {
                                id: *id,
                                error: SessionError::Closed,
                            });
                            None
                        }
                    })
                    .collect()
            }
        };

        let extra = Map::new();
        let sends = targets.iter().map(|(id, session)| {
            let params = params.clone();
            let extra = &extra;
            async move { (*id, session.notify(method.as_str(), params, extra).await) }
        });
        let mut delivered = 0;
        for (id, result) in futures::future::join_all(sends).await {
            match result {
                Ok(()) => delivered += 1,
                Err(error) => {
                    debug!("Notify {} to {} failed: {}", method, id, error);
                    failures.push(PeerFailure { id, error });
                }
            }
        }

        if failures.is_empty() {
            Ok(delivered)
        } else {
            failures.sort_by_key(|f| f.id);
            Err(NotifyError { failures })
        }
    }
}
