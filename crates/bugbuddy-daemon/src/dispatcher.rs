//! Routes peer requests to the registry, the document store and the analyzer.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bugbuddy_protocol::{
    ClientInfo, ClientType, CollectPayload, DocumentContent, DocumentIdentifier, DocumentPayload,
    ErrorReport, Method, PeerIdentity, ProcessIdField, Request, RequestId, Response, ServerCall, ServerInfo,
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PONG, VERSION,
};
use bugbuddy_rpc::{RequestHandler, RpcSession};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::analyzer::{self, ErrorAnalyzer};
use crate::patterns::PatternAnalyzer;
use crate::registry::PeerRegistry;
use crate::vfs::{VfsError, VirtualFs};

const NOT_CONNECTED: &str = "Process not connected yet.";
const INVALID_PROCESS_ID: &str = "Invalid process ID";
const PROCESS_ID_NOT_FOUND: &str = "processId not found";

/// Reports kept for editors that connect later.
pub const RECENT_REPORTS: usize = 32;

/// Log internal error details and return a generic error message.
fn internal_error(req_id: Option<RequestId>, err: impl std::fmt::Display) -> Response {
    error!("Internal error: {}", err);
    Response::error(req_id, INTERNAL_ERROR, "Internal server error")
}

fn invalid_params(req_id: Option<RequestId>, message: impl Into<String>) -> Response {
    Response::error(req_id, INVALID_PARAMS, message)
}

fn file_missing(req_id: Option<RequestId>, err: &VfsError) -> Response {
    debug!("{}", err);
    invalid_params(req_id, "File does not exist")
}

fn reply<T: Serialize>(req_id: Option<RequestId>, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(result) => Response::success(req_id, result),
        Err(e) => internal_error(req_id, e),
    }
}

pub struct Dispatcher {
    registry: Arc<PeerRegistry>,
    vfs: Arc<VirtualFs>,
    analyzer: Arc<dyn ErrorAnalyzer>,
    recent: Mutex<VecDeque<ErrorReport>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Arc::new(PatternAnalyzer::new()))
    }
}

impl Dispatcher {
    pub fn new(analyzer: Arc<dyn ErrorAnalyzer>) -> Self {
        Self {
            registry: Arc::new(PeerRegistry::new()),
            vfs: Arc::new(VirtualFs::new()),
            analyzer,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_REPORTS)),
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn vfs(&self) -> &Arc<VirtualFs> {
        &self.vfs
    }

    /// Reject calls from peers that have not completed a handshake.
    ///
    /// Returns the error reply, or `None` when the caller may proceed.
    fn check_identity(&self, req: &Request) -> Option<Response> {
        let message = match req.process_id() {
            ProcessIdField::Missing => PROCESS_ID_NOT_FOUND,
            ProcessIdField::Malformed => INVALID_PROCESS_ID,
            ProcessIdField::Valid(id) if !self.registry.contains(id) => NOT_CONNECTED,
            ProcessIdField::Valid(_) => return None,
        };
        debug!("Rejecting {} from unidentified peer: {}", req.method, message);
        Some(Response::error(req.id.clone(), INVALID_REQUEST, message))
    }

    async fn dispatch(&self, session: &RpcSession, req: Request) -> Option<Response> {
        let Some(method) = Method::from_name(&req.method) else {
            return Some(Response::error(
                req.id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", req.method),
            ));
        };

        if method.requires_identity() {
            if let Some(rejection) = self.check_identity(&req) {
                return Some(rejection);
            }
        }

        let Request {
            id, params, extra, ..
        } = req;
        let call = match ServerCall::decode(method.as_str(), params) {
            Ok(call) => call,
            Err(e) => return Some(invalid_params(id, e.to_string())),
        };

        match call {
            ServerCall::Handshake(info) => self.handle_handshake(id, session, info).await,
            ServerCall::Shutdown => {
                match ProcessIdField::from_extra(&extra).valid() {
                    Some(pid) => {
                        self.registry.remove_if_session(pid, session.id());
                    }
                    None => debug!("Shutdown without process id on {}", session.id()),
                }
                None
            }
            ServerCall::Ping => Some(Response::success(id, PONG)),
            ServerCall::Collect(payload) => Some(self.handle_collect(id, payload).await),
            ServerCall::ResolveDocument(doc) | ServerCall::UpdateDocument(doc) => {
                Some(self.handle_write_document(id, doc))
            }
            ServerCall::DeleteDocument(doc) => Some(self.handle_delete_document(id, doc)),
            ServerCall::RetrieveDocument(doc) => Some(self.handle_retrieve_document(id, doc)),
            ServerCall::NearestNode(_) => Some(Response::error(
                id,
                METHOD_NOT_FOUND,
                "Method not implemented",
            )),
        }
    }

    async fn handle_handshake(
        &self,
        id: Option<RequestId>,
        session: &RpcSession,
        info: ClientInfo,
    ) -> Option<Response> {
        if !info.client_type.is_known() {
            return Some(invalid_params(id, "Unknown client type"));
        }
        if session.is_closed() {
            debug!("Ignoring handshake from {} on closed {}", info.process_id, session.id());
            return None;
        }
        self.registry.insert(
            PeerIdentity::new(info.process_id, info.client_type),
            session.clone(),
        );
        // The transport may have closed, and been swept, while we inserted.
        if session.is_closed() {
            self.registry.remove_if_session(info.process_id, session.id());
            return None;
        }

        let response = reply(
            id,
            &ServerInfo {
                success: true,
                version: VERSION.to_string(),
                process_id: std::process::id(),
                supported_file_extensions: self.analyzer.supported_file_extensions(),
            },
        );
        if info.client_type != ClientType::Lsp {
            return Some(response);
        }
        let backlog: Vec<ErrorReport> = self.recent.lock().iter().cloned().collect();
        if backlog.is_empty() {
            return Some(response);
        }

        // Reply first so the replayed reports follow the handshake on the wire.
        if response.id.is_some() {
            if let Err(e) = session.send_flushed(response.into()).await {
                debug!("Handshake reply to {} failed: {}", info.process_id, e);
                return None;
            }
        }
        self.replay(info.process_id, backlog).await;
        None
    }

    async fn replay(&self, process_id: u32, reports: Vec<ErrorReport>) {
        debug!("Replaying {} report(s) to {}", reports.len(), process_id);
        for report in reports {
            let params = match serde_json::to_value(&report) {
                Ok(params) => params,
                Err(e) => {
                    warn!("Failed to encode report: {}", e);
                    continue;
                }
            };
            if let Err(e) = self.registry.notify(Method::Report, params, &[process_id]).await {
                warn!("{}", e);
                return;
            }
        }
    }

    fn remember(&self, report: &ErrorReport) {
        let mut recent = self.recent.lock();
        if recent.len() == RECENT_REPORTS {
            recent.pop_front();
        }
        recent.push_back(report.clone());
    }

    async fn handle_collect(&self, id: Option<RequestId>, payload: CollectPayload) -> Response {
        let (report, response) = analyzer::collect(self.analyzer.as_ref(), &self.vfs, &payload);
        info!(
            "Collected `{}` (exit {}): recognized={} processed={}",
            payload.command, payload.error_code, response.recognized, response.processed
        );
        self.remember(&report);

        // An empty target list would mean every peer, so skip when no editor is attached.
        let editors = self.registry.process_ids(&[ClientType::Lsp]);
        if !editors.is_empty() {
            match serde_json::to_value(&report) {
                Ok(params) => {
                    if let Err(e) = self.registry.notify(Method::Report, params, &editors).await {
                        warn!("{}", e);
                    }
                }
                Err(e) => return internal_error(id, e),
            }
        }

        reply(id, &response)
    }

    fn handle_write_document(&self, id: Option<RequestId>, doc: DocumentPayload) -> Response {
        if doc.filepath.is_empty() {
            return invalid_params(id, "Filepath is empty");
        }
        match doc.content {
            Some(content) => self.vfs.write_file(&doc.filepath, content),
            None => {
                // No content: drop the memory copy and load the file from disk.
                self.vfs.remove(&doc.filepath);
                if let Err(e) = self.vfs.open(&doc.filepath) {
                    return file_missing(id, &e);
                }
            }
        }
        Response::success(id, Value::Null)
    }

    fn handle_delete_document(&self, id: Option<RequestId>, doc: DocumentIdentifier) -> Response {
        if doc.filepath.is_empty() {
            return invalid_params(id, "Filepath is empty");
        }
        if !self.vfs.remove(&doc.filepath) {
            return invalid_params(id, "File does not exist");
        }
        Response::success(id, Value::Null)
    }

    fn handle_retrieve_document(
        &self,
        id: Option<RequestId>,
        doc: DocumentIdentifier,
    ) -> Response {
        if doc.filepath.is_empty() {
            return invalid_params(id, "Filepath is empty");
        }
        match self.vfs.read_file(&doc.filepath) {
            Ok(content) => reply(
                id,
                &DocumentContent {
                    filepath: doc.filepath,
                    content,
                },
            ),
            Err(e) => file_missing(id, &e),
        }
    }
}

#[async_trait]
impl RequestHandler for Dispatcher {
    async fn handle(&self, session: &RpcSession, request: Request) -> Option<Response> {
        let is_notification = request.is_notification();
        let response = self.dispatch(session, request).await;
        if is_notification {
            if let Some(Response {
                error: Some(err), ..
            }) = &response
            {
                debug!("Dropping error for notification: {}", err);
            }
            return None;
        }
        response
    }

    async fn on_close(&self, session: &RpcSession) {
        self.registry.remove_session(session.id());
    }
}
