//! Editor session handling.
//!
//! One [`Gateway`] serves one editor. Requests before `initialize` are
//! refused, `initialized` opens the daemon connection, and a background
//! drain task publishes diagnostics whenever the daemon reports.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bugbuddy_protocol::{
    daemon_addr, ClientNotification, ClientType, ErrorReport, Request, Response,
    METHOD_NOT_FOUND, VERSION,
};
use bugbuddy_rpc::{
    Connection, ConnectionEvent, ConnectionOptions, ProcessSpawner, RequestHandler, RpcSession,
};
use lsp_types::notification::{
    DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument, Exit, Initialized,
    Notification, PublishDiagnostics, ShowMessage,
};
use lsp_types::request::{Initialize, Request as LspRequest, Shutdown};
use lsp_types::{
    Diagnostic, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, InitializeParams, InitializeResult, MessageType, PublishDiagnosticsParams, ServerCapabilities,
    ServerInfo, ShowMessageParams, TextDocumentIdentifier, TextDocumentSyncCapability,
    TextDocumentSyncKind, Url,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::LspCodec;
use crate::diagnostics::{to_diagnostic, ExplanationFiles, ReportBuffer};
use crate::document::DocumentStore;
use crate::error::{GatewayError, Result};
use crate::run_command;

pub const STATUS_METHOD: &str = "$/status";
pub const FETCH_RUN_COMMAND_METHOD: &str = "$/fetchRunCommand";
const SERVER_NAME: &str = "BugBuddy";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub daemon_port: u16,
    pub data_dir: PathBuf,
    /// Program launched for auto-spawn and named in run commands.
    pub executable: PathBuf,
    pub explanations_dir: PathBuf,
    pub auto_spawn: bool,
    pub retry_delay: Duration,
    pub process_id: u32,
}

impl GatewayConfig {
    pub fn new(daemon_port: u16, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            daemon_port,
            data_dir: data_dir.into(),
            executable: std::env::current_exe().unwrap_or_else(|_| PathBuf::from("bugbuddy")),
            explanations_dir: ExplanationFiles::default_dir(),
            auto_spawn: true,
            retry_delay: Duration::from_millis(500),
            process_id: std::process::id(),
        }
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_explanations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.explanations_dir = dir.into();
        self
    }

    pub fn with_auto_spawn(mut self, enabled: bool) -> Self {
        self.auto_spawn = enabled;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_process_id(mut self, process_id: u32) -> Self {
        self.process_id = process_id;
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRunCommandParams {
    pub language_id: String,
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRunCommandResult {
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Running,
    ShuttingDown,
}

pub struct Gateway {
    config: Mutex<GatewayConfig>,
    phase: Mutex<Phase>,
    documents: DocumentStore,
    reports: Arc<ReportBuffer>,
    explanations: ExplanationFiles,
    daemon: Mutex<Option<Arc<Connection>>>,
    exit: CancellationToken,
    exit_code: AtomicI32,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let explanations = ExplanationFiles::new(config.explanations_dir.clone());
        Self {
            config: Mutex::new(config),
            phase: Mutex::new(Phase::Uninitialized),
            documents: DocumentStore::new(),
            reports: Arc::new(ReportBuffer::new()),
            explanations,
            daemon: Mutex::new(None),
            exit: CancellationToken::new(),
            // An editor that vanishes without `shutdown` is an abnormal exit.
            exit_code: AtomicI32::new(1),
        }
    }

    pub fn config(&self) -> GatewayConfig {
        self.config.lock().clone()
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    fn daemon(&self) -> Option<Arc<Connection>> {
        self.daemon.lock().clone()
    }

    fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    async fn request(&self, method: &str, params: Value) -> Result<Option<Value>> {
        if method == Initialize::METHOD {
            return self.initialize(params).map(Some);
        }
        if self.phase() == Phase::Uninitialized {
            return Err(GatewayError::NotInitialized);
        }
        let result = match method {
            Shutdown::METHOD => self.shutdown().await,
            STATUS_METHOD => self.status(),
            FETCH_RUN_COMMAND_METHOD | "fetchRunCommand" => self.fetch_run_command(params)?,
            _ => return Ok(None),
        };
        Ok(Some(result))
    }

    async fn notification(&self, editor: &RpcSession, method: &str, params: Value) {
        if method == Exit::METHOD {
            self.exit();
            return;
        }
        if self.phase() == Phase::Uninitialized {
            debug!("Dropping {} before initialize", method);
            return;
        }
        let outcome = match method {
            Initialized::METHOD => {
                self.connect_daemon(editor).await;
                Ok(())
            }
            DidOpenTextDocument::METHOD => match serde_json::from_value(params) {
                Ok(params) => self.did_open(params).await,
                Err(e) => Err(e.into()),
            },
            DidChangeTextDocument::METHOD => match serde_json::from_value(params) {
                Ok(params) => self.did_change(params).await,
                Err(e) => Err(e.into()),
            },
            DidCloseTextDocument::METHOD => match serde_json::from_value(params) {
                Ok(params) => self.did_close(editor, params).await,
                Err(e) => Err(e.into()),
            },
            _ => {
                debug!("Ignoring notification {}", method);
                Ok(())
            }
        };
        if let Err(e) = outcome {
            warn!("{} failed: {}", method, e);
        }
    }

    fn initialize(&self, params: Value) -> Result<Value> {
        let params: InitializeParams = serde_json::from_value(params)?;
        if let Some(options) = params.initialization_options.as_ref() {
            let mut config = self.config.lock();
            if let Some(dir) = options
                .get("data_dir_path")
                .and_then(Value::as_str)
                .filter(|dir| !dir.is_empty())
            {
                config.data_dir = PathBuf::from(dir);
            }
            if let Some(port) = options
                .get("daemon_port")
                .and_then(Value::as_u64)
                .and_then(|port| u16::try_from(port).ok())
                .filter(|port| *port != 0)
            {
                config.daemon_port = port;
            }
        }
        *self.phase.lock() = Phase::Running;

        let config = self.config();
        info!(
            "Initialized; daemon port {}, data dir {}",
            config.daemon_port,
            config.data_dir.display()
        );
        let result = InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: SERVER_NAME.to_string(),
                version: Some(VERSION.to_string()),
            }),
        };
        Ok(serde_json::to_value(result)?)
    }

    async fn connect_daemon(&self, editor: &RpcSession) {
        let config = self.config();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let spawner = ProcessSpawner::new()
            .with_program(config.executable.clone())
            .with_data_dir(config.data_dir.clone());
        let options = ConnectionOptions::new(daemon_addr(config.daemon_port), ClientType::Lsp)
            .with_process_id(config.process_id)
            .with_auto_spawn(config.auto_spawn)
            .with_retry_delay(config.retry_delay)
            .with_spawn_delay(config.retry_delay)
            .with_spawner(Arc::new(spawner))
            .with_events(events_tx);

        let reports = self.reports.clone();
        let connection = Arc::new(Connection::with_notification_handler(
            options,
            move |notification| match notification {
                ClientNotification::Report(report) => {
                    reports.push(report);
                }
            },
        ));

        let previous = self.daemon.lock().replace(connection.clone());
        if let Some(previous) = previous {
            if let Err(e) = previous.close().await {
                debug!("Closing previous daemon connection: {}", e);
            }
        }

        tokio::spawn(forward_events(events_rx, editor.clone()));
        match connection.connect().await {
            Ok(()) => info!("Connected to daemon on port {}", config.daemon_port),
            Err(e) => {
                warn!("Unable to connect to daemon: {}", e);
                show_message(
                    editor,
                    MessageType::ERROR,
                    format!("Unable to connect to daemon: {}", e),
                )
                .await;
            }
        }
    }

    async fn shutdown(&self) -> Value {
        *self.phase.lock() = Phase::ShuttingDown;
        if let Some(daemon) = self.daemon() {
            if let Err(e) = daemon.shutdown().await {
                warn!("Daemon shutdown failed: {}", e);
            }
        }
        Value::Null
    }

    fn exit(&self) {
        let code = if self.phase() == Phase::ShuttingDown { 0 } else { 1 };
        self.exit_code.store(code, Ordering::SeqCst);
        self.exit.cancel();
    }

    fn status(&self) -> Value {
        let port = self.config.lock().daemon_port;
        let connected = self.daemon().is_some_and(|d| d.is_connected());
        json!({
            "daemon": { "is_connected": connected, "port": port },
            "version": VERSION,
        })
    }

    fn fetch_run_command(&self, params: Value) -> Result<Value> {
        let params: FetchRunCommandParams = serde_json::from_value(params)?;
        let uri = params.text_document.uri;
        let path = uri
            .to_file_path()
            .map_err(|_| GatewayError::InvalidDocument(format!("Not a file URI: {}", uri)))?;
        let config = self.config();
        let overrides = run_command::load_overrides(&config.data_dir)?;
        let command =
            run_command::resolve(&params.language_id, &path, &config.executable, &overrides)?;
        debug!("Run command for {}: {}", uri, command);
        Ok(serde_json::to_value(FetchRunCommandResult { command })?)
    }

    /// File extensions the daemon accepts; empty accepts everything.
    fn is_supported(&self, uri: &Url) -> bool {
        let extensions = self
            .daemon()
            .map(|d| d.supported_file_extensions())
            .unwrap_or_default();
        if extensions.is_empty() {
            return true;
        }
        let Ok(path) = uri.to_file_path() else {
            return false;
        };
        let extension = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        extensions.iter().any(|supported| *supported == extension)
    }

    fn daemon_path(&self, uri: &Url) -> Result<Option<(Arc<Connection>, String)>> {
        let path = uri
            .to_file_path()
            .map_err(|_| GatewayError::InvalidDocument(format!("Not a file URI: {}", uri)))?;
        Ok(self
            .daemon()
            .map(|daemon| (daemon, path.to_string_lossy().into_owned())))
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) -> Result<()> {
        let document = params.text_document;
        if !self.is_supported(&document.uri) {
            debug!("Ignoring unsupported document {}", document.uri);
            return Ok(());
        }
        self.documents.open(document.uri.clone(), document.text.clone());
        if let Some((daemon, path)) = self.daemon_path(&document.uri)? {
            daemon.resolve_document(&path, &document.text).await?;
        }
        Ok(())
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) -> Result<()> {
        let uri = params.text_document.uri;
        let Some(text) = self.documents.apply_changes(&uri, &params.content_changes) else {
            return Ok(());
        };
        if let Some((daemon, path)) = self.daemon_path(&uri)? {
            daemon.update_document(&path, &text).await?;
        }
        Ok(())
    }

    async fn did_close(
        &self,
        editor: &RpcSession,
        params: DidCloseTextDocumentParams,
    ) -> Result<()> {
        let uri = params.text_document.uri;
        let was_open = self.documents.close(&uri).is_some();
        self.reports.forget(&uri);
        publish(editor, uri.clone(), Vec::new()).await;
        if was_open {
            if let Some((daemon, path)) = self.daemon_path(&uri)? {
                daemon.delete_document(&path).await?;
            }
        }
        Ok(())
    }

    fn diagnostic_for(&self, uri: &Url, report: &ErrorReport) -> Diagnostic {
        let href = if report.full_message.is_empty() {
            None
        } else {
            match self.explanations.write(uri, &report.full_message) {
                Ok(path) => Url::from_file_path(&path).ok(),
                Err(e) => {
                    warn!("Failed to write explanation for {}: {}", uri, e);
                    None
                }
            }
        };
        to_diagnostic(report, href)
    }

    async fn teardown(&self) {
        if let Err(e) = self.explanations.remove_all() {
            warn!(
                "Failed to remove {}: {}",
                self.explanations.dir().display(),
                e
            );
        }
        let daemon = self.daemon.lock().take();
        if let Some(daemon) = daemon {
            if let Err(e) = daemon.close().await {
                debug!("Closing daemon connection: {}", e);
            }
        }
    }
}

#[async_trait]
impl RequestHandler for Gateway {
    async fn handle(&self, session: &RpcSession, request: Request) -> Option<Response> {
        let Request {
            id, method, params, ..
        } = request;
        let Some(id) = id else {
            self.notification(session, &method, params).await;
            return None;
        };
        let response = match self.request(&method, params).await {
            Ok(Some(result)) => Response::success(Some(id), result),
            Ok(None) => Response::error(
                Some(id),
                METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
            ),
            Err(e) => {
                debug!("{} failed: {}", method, e);
                Response::error(Some(id), e.code(), e.to_string())
            }
        };
        Some(response)
    }
}

async fn notify_editor<P: Serialize>(editor: &RpcSession, method: &str, params: P) -> bool {
    let params = match serde_json::to_value(params) {
        Ok(params) => params,
        Err(e) => {
            warn!("Failed to encode {}: {}", method, e);
            return false;
        }
    };
    match editor.notify(method, params, &Map::new()).await {
        Ok(()) => true,
        Err(e) => {
            debug!("Editor notification {} failed: {}", method, e);
            false
        }
    }
}

async fn show_message(editor: &RpcSession, typ: MessageType, message: impl Into<String>) -> bool {
    let params = ShowMessageParams {
        typ,
        message: message.into(),
    };
    notify_editor(editor, ShowMessage::METHOD, params).await
}

async fn publish(editor: &RpcSession, uri: Url, diagnostics: Vec<Diagnostic>) -> bool {
    let params = PublishDiagnosticsParams {
        uri,
        diagnostics,
        version: None,
    };
    notify_editor(editor, PublishDiagnostics::METHOD, params).await
}

async fn forward_events(mut events: mpsc::UnboundedReceiver<ConnectionEvent>, editor: RpcSession) {
    while let Some(event) = events.recv().await {
        let message = match event {
            ConnectionEvent::Reconnecting { .. } => "Reconnecting...",
            ConnectionEvent::SpawningDaemon => "Daemon not connected. Launching...",
            ConnectionEvent::Connected | ConnectionEvent::Disconnected => continue,
        };
        if !show_message(&editor, MessageType::INFO, message).await {
            break;
        }
    }
}

async fn drain_reports(gateway: Arc<Gateway>, editor: RpcSession) {
    loop {
        tokio::select! {
            _ = editor.closed() => break,
            _ = gateway.exit.cancelled() => break,
            _ = gateway.reports.changed() => {}
        }
        for (uri, report) in gateway.reports.take() {
            let diagnostics = report
                .map(|report| vec![gateway.diagnostic_for(&uri, &report)])
                .unwrap_or_default();
            debug!("Publishing {} diagnostic(s) for {}", diagnostics.len(), uri);
            publish(&editor, uri, diagnostics).await;
        }
    }
}

/// Serve one editor over `io` until `exit` or disconnect. Returns the
/// process exit code: 0 after an orderly `shutdown`, 1 otherwise.
pub async fn serve<T>(io: T, config: GatewayConfig) -> i32
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let gateway = Arc::new(Gateway::new(config));
    let editor = RpcSession::spawn_with_codec(io, LspCodec::new(), gateway.clone());
    let drain = tokio::spawn(drain_reports(gateway.clone(), editor.clone()));

    tokio::select! {
        _ = gateway.exit.cancelled() => debug!("Exit requested"),
        _ = editor.closed() => info!("Editor disconnected"),
    }
    drain.abort();
    gateway.teardown().await;
    editor.close();
    gateway.exit_code.load(Ordering::SeqCst)
}

/// Accept editors on `addr` one after another.
pub async fn listen(addr: SocketAddr, config: GatewayConfig) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Editor gateway listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        info!("Editor connected from {}", peer);
        let code = serve(stream, config.clone()).await;
        info!("Editor session from {} ended with code {}", peer, code);
    }
}
