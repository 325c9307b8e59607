//! Peer connection to the daemon
//!
//! A [`Connection`] dials the daemon, performs the handshake and keeps the
//! resulting session usable: a call that finds the transport closed
//! reconnects once and is retried once. Connecting is an explicit loop over
//! dial attempts governed by [`ConnectionOptions::should_retry`], with a
//! single daemon spawn as the fallback once the predicate declines.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bugbuddy_protocol::{
    ClientInfo, ClientNotification, ClientType, CollectPayload, CollectResponse, DecodeError,
    DocumentContent, DocumentIdentifier, DocumentPayload, Method, Request, Response, ServerCall,
    ServerInfo, INVALID_PARAMS, METHOD_NOT_FOUND, PONG, PROCESS_ID_FIELD,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, Result, SessionError};
use crate::session::{RequestHandler, RpcSession};
use crate::spawn::{DaemonSpawner, ProcessSpawner};
use crate::transport::{self, KEEPALIVE_PERIOD};

/// Decides whether to redial after the `attempt`-th failed dial.
pub type RetryPredicate = Arc<dyn Fn(u32, &ConnectionError) -> bool + Send + Sync>;

/// Receives notifications pushed by the daemon.
pub type NotificationHandler = Arc<dyn Fn(ClientNotification) + Send + Sync>;

/// Retry while fewer than five dials have failed.
pub fn default_should_retry(attempt: u32, _cause: &ConnectionError) -> bool {
    attempt < 5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,
    Connected,
    Initialized,
    Shutdown,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::NotConnected => "not connected",
            ConnectionState::Connected => "connected",
            ConnectionState::Initialized => "initialized",
            ConnectionState::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Progress reports while connecting, for callers that surface them to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Reconnecting { attempt: u32, cause: String },
    SpawningDaemon,
    Connected,
    Disconnected,
}

#[derive(Clone)]
pub struct ConnectionOptions {
    pub addr: SocketAddr,
    pub client_type: ClientType,
    pub process_id: u32,
    pub should_retry: RetryPredicate,
    /// Spawn a daemon once the retry predicate declines.
    pub spawn_on_max_retries: bool,
    pub retry_delay: Duration,
    pub spawn_delay: Duration,
    pub keepalive: Option<Duration>,
    pub spawner: Arc<dyn DaemonSpawner>,
    pub events: Option<mpsc::UnboundedSender<ConnectionEvent>>,
}

impl ConnectionOptions {
    pub fn new(addr: SocketAddr, client_type: ClientType) -> Self {
        Self {
            addr,
            client_type,
            process_id: std::process::id(),
            should_retry: Arc::new(default_should_retry),
            spawn_on_max_retries: false,
            retry_delay: Duration::from_millis(500),
            spawn_delay: Duration::from_millis(500),
            keepalive: Some(KEEPALIVE_PERIOD),
            spawner: Arc::new(ProcessSpawner::new()),
            events: None,
        }
    }

    pub fn with_process_id(mut self, process_id: u32) -> Self {
        self.process_id = process_id;
        self
    }

    pub fn with_should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(u32, &ConnectionError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_auto_spawn(mut self, enabled: bool) -> Self {
        self.spawn_on_max_retries = enabled;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn DaemonSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_spawn_delay(mut self, delay: Duration) -> Self {
        self.spawn_delay = delay;
        self
    }

    pub fn with_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        self.events = Some(events);
        self
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("addr", &self.addr)
            .field("client_type", &self.client_type)
            .field("process_id", &self.process_id)
            .field("spawn_on_max_retries", &self.spawn_on_max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("spawn_delay", &self.spawn_delay)
            .field("keepalive", &self.keepalive)
            .finish_non_exhaustive()
    }
}

/// Serves the daemon-to-peer direction of a client session.
struct ClientHandler {
    notifications: Option<NotificationHandler>,
}

#[async_trait]
impl RequestHandler for ClientHandler {
    async fn handle(&self, _session: &RpcSession, request: Request) -> Option<Response> {
        let Request {
            id, method, params, ..
        } = request;
        match ClientNotification::decode(&method, params) {
            Ok(notification) => {
                if let Some(handler) = &self.notifications {
                    handler(notification);
                }
                id.map(|id| Response::success(Some(id), Value::Null))
            }
            Err(e) => {
                warn!("Ignoring daemon request {}: {}", method, e);
                let code = match e {
                    DecodeError::MethodNotFound(_) => METHOD_NOT_FOUND,
                    DecodeError::InvalidParams { .. } => INVALID_PARAMS,
                };
                id.map(|id| Response::error(Some(id), code, e.to_string()))
            }
        }
    }
}

pub struct Connection {
    options: ConnectionOptions,
    state: Mutex<ConnectionState>,
    session: Mutex<Option<RpcSession>>,
    server_info: Mutex<Option<ServerInfo>>,
    handler: Arc<ClientHandler>,
    // Serializes connect, reconnect and shutdown so the state has one writer at a time.
    lifecycle: tokio::sync::Mutex<()>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.options.addr)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    pub fn new(options: ConnectionOptions) -> Self {
        Self::build(options, None)
    }

    /// Connection whose daemon notifications are passed to `handler`.
    pub fn with_notification_handler<F>(options: ConnectionOptions, handler: F) -> Self
    where
        F: Fn(ClientNotification) + Send + Sync + 'static,
    {
        Self::build(options, Some(Arc::new(handler)))
    }

    fn build(options: ConnectionOptions, notifications: Option<NotificationHandler>) -> Self {
        Self {
            options,
            state: Mutex::new(ConnectionState::NotConnected),
            session: Mutex::new(None),
            server_info: Mutex::new(None),
            handler: Arc::new(ClientHandler { notifications }),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Initialized
        ) && self.current_session().is_some_and(|s| !s.is_closed())
    }

    /// What the daemon advertised in the last successful handshake.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.lock().clone()
    }

    pub fn supported_file_extensions(&self) -> Vec<String> {
        self.server_info
            .lock()
            .as_ref()
            .map(|info| info.supported_file_extensions.clone())
            .unwrap_or_default()
    }

    fn current_session(&self) -> Option<RpcSession> {
        self.session.lock().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("Connection state {} -> {}", *current, state);
            *current = state;
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Some(events) = &self.options.events {
            let _ = events.send(event);
        }
    }

    fn extra(&self) -> Map<String, Value> {
        let mut extra = Map::new();
        extra.insert(PROCESS_ID_FIELD.into(), self.options.process_id.into());
        extra
    }

    /// Dial, handshake and become `Initialized`.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.connect_locked().await
    }

    async fn connect_locked(&self) -> Result<()> {
        if self.is_connected() {
            return Err(ConnectionError::AlreadyConnected);
        }

        let addr = self.options.addr;
        let mut attempt: u32 = 0;
        let mut spawn_available = self.options.spawn_on_max_retries;
        loop {
            let cause = match transport::dial(addr, self.options.keepalive).await {
                Ok(stream) => return self.start_session(stream).await,
                Err(e) => ConnectionError::Transport(e),
            };
            attempt += 1;

            if (self.options.should_retry)(attempt, &cause) {
                debug!("Dial {} to {} failed: {}; retrying", attempt, addr, cause);
                self.emit(ConnectionEvent::Reconnecting {
                    attempt,
                    cause: cause.to_string(),
                });
                tokio::time::sleep(self.options.retry_delay).await;
                continue;
            }

            if spawn_available {
                // One spawn per connect call; the retry budget starts over against the new daemon.
                spawn_available = false;
                info!("Daemon not reachable at {}, spawning one", addr);
                self.emit(ConnectionEvent::SpawningDaemon);
                self.options
                    .spawner
                    .spawn(addr)
                    .map_err(ConnectionError::Spawn)?;
                tokio::time::sleep(self.options.spawn_delay).await;
                attempt = 0;
                continue;
            }

            warn!("Giving up on {} after {} attempt(s)", addr, attempt);
            return Err(ConnectionError::MaxConnRetriesReached {
                attempts: attempt,
                cause: Box::new(cause),
            });
        }
    }

    async fn start_session(&self, stream: tokio::net::TcpStream) -> Result<()> {
        let session = RpcSession::spawn(stream, self.handler.clone());
        if let Some(stale) = self.session.lock().replace(session.clone()) {
            stale.close();
        }
        self.set_state(ConnectionState::Connected);

        match self.handshake_on(&session).await {
            Ok(info) => {
                *self.server_info.lock() = Some(info);
                self.set_state(ConnectionState::Initialized);
                self.emit(ConnectionEvent::Connected);
                info!(
                    "Connected to daemon at {} as {}",
                    self.options.addr, self.options.client_type
                );
                Ok(())
            }
            Err(e) => {
                session.close();
                self.session.lock().take();
                self.set_state(ConnectionState::NotConnected);
                Err(e)
            }
        }
    }

    /// Repeat the handshake on the current session.
    pub async fn handshake(&self) -> Result<ServerInfo> {
        let _guard = self.lifecycle.lock().await;
        let session = self.current_session().ok_or(ConnectionError::NotConnected)?;
        let info = self.handshake_on(&session).await?;
        *self.server_info.lock() = Some(info.clone());
        self.set_state(ConnectionState::Initialized);
        Ok(info)
    }

    async fn handshake_on(&self, session: &RpcSession) -> Result<ServerInfo> {
        fn rejected(err: SessionError) -> ConnectionError {
            match err {
                SessionError::Rpc(e) => ConnectionError::Handshake(e.message),
                other => other.into(),
            }
        }

        let extra = self.extra();
        let info = ClientInfo {
            process_id: self.options.process_id,
            client_type: self.options.client_type,
        };
        let reply = session
            .call(
                Method::Handshake.as_str(),
                serde_json::to_value(&info)?,
                &extra,
            )
            .await
            .map_err(rejected)?;
        let server: ServerInfo = serde_json::from_value(reply)
            .map_err(|e| ConnectionError::Handshake(format!("Malformed handshake reply: {}", e)))?;
        if !server.success {
            return Err(ConnectionError::Handshake(
                "Daemon declined the handshake".into(),
            ));
        }

        let pong = session
            .call(Method::Ping.as_str(), Value::Null, &extra)
            .await
            .map_err(rejected)?;
        if pong.as_str() != Some(PONG) {
            return Err(ConnectionError::Handshake(format!(
                "Unexpected ping reply: {}",
                pong
            )));
        }
        Ok(server)
    }

    /// Reconnect after `failed` closed, unless another caller already did.
    async fn recover(&self, failed: &RpcSession) -> Result<RpcSession> {
        let _guard = self.lifecycle.lock().await;
        if let Some(current) = self.current_session() {
            if current.id() != failed.id() && !current.is_closed() {
                return Ok(current);
            }
        }
        if self.state() == ConnectionState::Shutdown {
            return Err(ConnectionError::Closed);
        }

        warn!("Connection to {} closed, reconnecting", self.options.addr);
        self.set_state(ConnectionState::NotConnected);
        self.emit(ConnectionEvent::Disconnected);
        self.connect_locked().await?;
        self.current_session().ok_or(ConnectionError::NotConnected)
    }

    /// Call `method`, reconnecting and retrying once if the transport closed or reset.
    pub async fn call(&self, method: Method, params: Value) -> Result<Value> {
        let session = self.current_session().ok_or(ConnectionError::NotConnected)?;
        let extra = self.extra();
        match session.call(method.as_str(), params.clone(), &extra).await {
            Err(e) if e.is_disconnect() => {
                debug!("{} on {} failed: {}", method, session.id(), e);
                session.close();
                let session = self.recover(&session).await?;
                Ok(session.call(method.as_str(), params, &extra).await?)
            }
            other => Ok(other?),
        }
    }

    /// Fire-and-forget with the same retry-once behavior as [`Connection::call`].
    pub async fn notify(&self, method: Method, params: Value) -> Result<()> {
        let session = self.current_session().ok_or(ConnectionError::NotConnected)?;
        let extra = self.extra();
        match session.notify(method.as_str(), params.clone(), &extra).await {
            Err(e) if e.is_disconnect() => {
                debug!("{} on {} failed: {}", method, session.id(), e);
                session.close();
                let session = self.recover(&session).await?;
                Ok(session.notify(method.as_str(), params, &extra).await?)
            }
            other => Ok(other?),
        }
    }

    /// Send a typed call and decode its result.
    pub async fn request<R: DeserializeOwned>(&self, call: ServerCall) -> Result<R> {
        let value = self.call(call.method(), call.params()?).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn ping(&self) -> Result<String> {
        self.request(ServerCall::Ping).await
    }

    pub async fn collect(&self, payload: CollectPayload) -> Result<CollectResponse> {
        self.request(ServerCall::Collect(payload)).await
    }

    pub async fn resolve_document(&self, filepath: &str, content: &str) -> Result<()> {
        self.call_document(ServerCall::ResolveDocument(DocumentPayload {
            filepath: filepath.into(),
            content: Some(content.into()),
        }))
        .await
    }

    pub async fn update_document(&self, filepath: &str, content: &str) -> Result<()> {
        self.call_document(ServerCall::UpdateDocument(DocumentPayload {
            filepath: filepath.into(),
            content: Some(content.into()),
        }))
        .await
    }

    pub async fn delete_document(&self, filepath: &str) -> Result<()> {
        self.call_document(ServerCall::DeleteDocument(DocumentIdentifier {
            filepath: filepath.into(),
        }))
        .await
    }

    pub async fn retrieve_document(&self, filepath: &str) -> Result<DocumentContent> {
        self.request(ServerCall::RetrieveDocument(DocumentIdentifier {
            filepath: filepath.into(),
        }))
        .await
    }

    async fn call_document(&self, call: ServerCall) -> Result<()> {
        self.call(call.method(), call.params()?).await?;
        Ok(())
    }

    /// Tell the daemon we are leaving. A no-op once shut down or never connected.
    pub async fn shutdown(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.shutdown_locked().await
    }

    async fn shutdown_locked(&self) -> Result<()> {
        if matches!(
            self.state(),
            ConnectionState::Shutdown | ConnectionState::NotConnected
        ) {
            return Ok(());
        }
        if let Some(session) = self.current_session() {
            if let Err(e) = session
                .notify(Method::Shutdown.as_str(), Value::Null, &self.extra())
                .await
            {
                debug!("Shutdown notification not delivered: {}", e);
            }
        }
        self.set_state(ConnectionState::Shutdown);
        Ok(())
    }

    /// Shut down, then release the transport.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.shutdown_locked().await?;
        if let Some(session) = self.session.lock().take() {
            session.close();
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.close();
        }
    }
}

/// Connect, run `f`, and always close afterwards.
pub async fn execute<F, Fut, T>(options: ConnectionOptions, f: F) -> Result<T>
where
    F: FnOnce(Arc<Connection>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let conn = Arc::new(Connection::new(options));
    conn.connect().await?;
    let result = f(conn.clone()).await;
    if let Err(e) = conn.close().await {
        warn!("Failed to close connection: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn refused() -> ConnectionError {
        ConnectionError::Transport(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
    }

    #[test]
    fn test_default_retry_budget_is_five() {
        let cause = refused();
        let allowed: Vec<_> = (1..=7).map(|n| default_should_retry(n, &cause)).collect();
        assert_eq!(allowed, [true, true, true, true, false, false, false]);
    }

    #[test]
    fn test_options_defaults() {
        let opts = ConnectionOptions::new("127.0.0.1:3434".parse().unwrap(), ClientType::Monitor);
        assert_eq!(opts.process_id, std::process::id());
        assert!(!opts.spawn_on_max_retries);
        assert_eq!(opts.keepalive, Some(KEEPALIVE_PERIOD));
        assert!((opts.should_retry)(1, &refused()));
    }

    #[tokio::test]
    async fn test_fresh_connection_state() {
        let conn = Connection::new(ConnectionOptions::new(
            "127.0.0.1:3434".parse().unwrap(),
            ClientType::Lsp,
        ));
        assert_eq!(conn.state(), ConnectionState::NotConnected);
        assert!(!conn.is_connected());
        assert!(conn.server_info().is_none());
        assert!(matches!(
            conn.call(Method::Ping, Value::Null).await,
            Err(ConnectionError::NotConnected)
        ));
        // Shutdown before connect is a no-op.
        conn.shutdown().await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::NotConnected);
    }
}
