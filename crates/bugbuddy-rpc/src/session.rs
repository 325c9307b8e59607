//! Duplex JSON-RPC session over a framed byte stream.
//!
//! A session owns two tasks: a writer that drains an ordered outbound queue
//! into the sink, and a reader that routes responses to pending callers and
//! hands requests to a [`RequestHandler`]. Calls with an id run on their own
//! task; notifications are handled inline, in arrival order, so notification
//! handlers must not await calls on the same session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bugbuddy_protocol::{
    CodecError, Inbound, Message, Request, RequestId, Response, RpcCodec, PARSE_ERROR,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::SessionError;

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for one session within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Serves requests arriving on a session.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Return `Some` to reply. Replies to notifications are discarded.
    async fn handle(&self, session: &RpcSession, request: Request) -> Option<Response>;

    /// Called once after the transport closed.
    async fn on_close(&self, _session: &RpcSession) {}
}

struct Outbound {
    message: Message,
    flushed: Option<oneshot::Sender<Result<(), SessionError>>>,
}

type PendingCalls = Mutex<HashMap<RequestId, oneshot::Sender<Response>>>;

/// Drops the pending entry of a call that finished or was abandoned.
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

struct Inner {
    id: SessionId,
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: PendingCalls,
    next_id: AtomicU64,
    closed: CancellationToken,
}

/// Cheap, cloneable handle to a running session.
#[derive(Clone)]
pub struct RpcSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RpcSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcSession")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RpcSession {
    /// Start serving `io` with the daemon's length-prefixed framing.
    /// Must be called from within a tokio runtime.
    pub fn spawn<T, H>(io: T, handler: Arc<H>) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        H: RequestHandler + ?Sized,
    {
        Self::spawn_with_codec(io, RpcCodec::new(), handler)
    }

    /// Start serving `io` framed by `codec`.
    pub fn spawn_with_codec<T, C, H>(io: T, codec: C, handler: Arc<H>) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        C: Decoder<Item = Inbound, Error = CodecError>
            + Encoder<Message, Error = CodecError>
            + Send
            + 'static,
        H: RequestHandler + ?Sized,
    {
        let (sink, mut stream) = Framed::new(io, codec).split::<Message>();
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            inner: Arc::new(Inner {
                id: SessionId::next(),
                outbound: tx,
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: CancellationToken::new(),
            }),
        };

        tokio::spawn(write_loop(sink, rx, session.inner.closed.clone()));

        let reader = session.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = reader.inner.closed.cancelled() => break,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(Inbound::Message(Message::Response(resp)))) => reader.complete(resp),
                    Some(Ok(Inbound::Message(Message::Request(req)))) => {
                        reader.dispatch(req, &handler).await
                    }
                    Some(Ok(Inbound::Malformed(reason))) => {
                        warn!("Parse error on {}: {}", reader.inner.id, reason);
                        let reply = Response::error(None, PARSE_ERROR, reason);
                        let _ = reader.enqueue(reply.into(), None);
                    }
                    Some(Err(e)) => {
                        debug!("Transport error on {}: {}", reader.inner.id, e);
                        break;
                    }
                    None => break,
                }
            }
            reader.inner.closed.cancel();
            // Dropping the senders wakes every waiting caller with `Closed`.
            reader.inner.pending.lock().clear();
            handler.on_close(&reader).await;
            debug!("{} closed", reader.inner.id);
        });

        session
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the transport is gone.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    /// Stop both tasks; pending calls fail with [`SessionError::Closed`].
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    /// Send a call and wait for its response.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        extra: &Map<String, Value>,
    ) -> Result<Value, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id.clone(), tx);
        let _pending = PendingGuard {
            pending: &self.inner.pending,
            id: id.clone(),
        };

        let mut request = Request::call(id.clone(), method, params);
        request.extra.extend(extra.clone());
        trace!("-> {} {}", id, method);
        self.enqueue(request.into(), None)?;

        let response = rx.await.map_err(|_| SessionError::Closed)?;
        Ok(response.into_result()?)
    }

    /// Send a notification, returning once its frame was written.
    pub async fn notify(
        &self,
        method: &str,
        params: Value,
        extra: &Map<String, Value>,
    ) -> Result<(), SessionError> {
        let mut request = Request::notification(method, params);
        request.extra.extend(extra.clone());
        self.send_flushed(request.into()).await
    }

    /// Write any message and wait for the flush.
    pub async fn send_flushed(&self, message: Message) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(message, Some(tx))?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    fn enqueue(
        &self,
        message: Message,
        flushed: Option<oneshot::Sender<Result<(), SessionError>>>,
    ) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.inner
            .outbound
            .send(Outbound { message, flushed })
            .map_err(|_| SessionError::Closed)
    }

    fn complete(&self, resp: Response) {
        let Some(id) = resp.id.clone() else {
            warn!("Dropping response without id on {}", self.inner.id);
            return;
        };
        match self.inner.pending.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(resp);
            }
            None => warn!("No pending call {} on {}", id, self.inner.id),
        }
    }

    async fn dispatch<H: RequestHandler + ?Sized>(&self, req: Request, handler: &Arc<H>) {
        if req.is_notification() {
            handler.handle(self, req).await;
            return;
        }
        let session = self.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            if let Some(resp) = handler.handle(&session, req).await {
                let _ = session.enqueue(resp.into(), None);
            }
        });
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    closed: CancellationToken,
) where
    S: futures::Sink<Message, Error = CodecError> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            next = rx.recv() => next,
        };
        let Some(Outbound { message, flushed }) = next else {
            break;
        };
        match sink.send(message).await {
            Ok(()) => {
                if let Some(tx) = flushed {
                    let _ = tx.send(Ok(()));
                }
            }
            Err(e) => {
                debug!("Write failed: {}", e);
                if let Some(tx) = flushed {
                    let _ = tx.send(Err(e.into()));
                }
                break;
            }
        }
    }
    closed.cancel();
    let _ = sink.close().await;
}
