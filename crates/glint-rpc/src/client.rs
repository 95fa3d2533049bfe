//! Outbound half of an endpoint: server-initiated requests and
//! notifications, with id allocation and response correlation.
//!
//! `Client` is cheaply cloneable so handler code can emit traffic (progress
//! notifications, `workspace/applyEdit` style requests) without owning the
//! endpoint itself.

use crate::error::ErrorObject;
use crate::message::{CancelParams, Message, Notification, Request, RequestId, Response};
use crate::stream::MessageWriter;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

type ResponseSender = oneshot::Sender<Result<Value, ErrorObject>>;

pub(crate) struct ClientInner {
    writer: Arc<MessageWriter>,
    next_id: AtomicI64,
    // Outgoing-pending correlation table: id -> future resolver. Ids are
    // monotonically increasing and never reused, so entries never collide.
    pending: Mutex<HashMap<RequestId, ResponseSender>>,
}

/// Emits requests and notifications toward the remote peer.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(writer: Arc<MessageWriter>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                writer,
                next_id: AtomicI64::new(0),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn writer(&self) -> &Arc<MessageWriter> {
        &self.inner.writer
    }

    /// Send a notification. Fire-and-forget by protocol definition: there
    /// is no error path, write failures are logged inside the writer.
    pub async fn notify(&self, method: impl Into<String>, params: Option<Value>) {
        let message = Message::Notification(Notification::new(method, params));
        self.inner.writer.write(&message).await;
    }

    /// Send a request and return a handle to the eventual response. The
    /// handle is returned as soon as the request is on the wire; awaiting
    /// it is the caller's choice.
    pub async fn request(&self, method: impl Into<String>, params: Option<Value>) -> PendingCall {
        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();

        self.inner.pending.lock().await.insert(id.clone(), tx);

        let message = Message::Request(Request::new(id.clone(), method, params));
        self.inner.writer.write(&message).await;

        PendingCall {
            id,
            rx,
            inner: self.inner.clone(),
        }
    }

    /// Route an incoming response to the request that produced it.
    /// Unexpected ids (late, duplicate, or never issued) are logged and
    /// dropped; a buggy peer resolves each future at most once.
    pub(crate) async fn settle(&self, response: Response) {
        let sender = self.inner.pending.lock().await.remove(&response.id);
        match sender {
            Some(tx) => {
                let _ = tx.send(response.into_result());
            }
            None => {
                debug!(id = %response.id, "dropping response with no pending request");
            }
        }
    }

    /// Reject every pending request; used when the connection goes away.
    pub(crate) async fn reject_all(&self, error: ErrorObject) {
        let pending = std::mem::take(&mut *self.inner.pending.lock().await);
        for (_, tx) in pending {
            let _ = tx.send(Err(error.clone()));
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

/// A locally-issued request awaiting its response.
pub struct PendingCall {
    id: RequestId,
    rx: oneshot::Receiver<Result<Value, ErrorObject>>,
    inner: Arc<ClientInner>,
}

impl PendingCall {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Resolve with the response's result, or reject with its error. If
    /// the connection closed before a response arrived, rejects with an
    /// internal error.
    pub async fn wait(self) -> Result<Value, ErrorObject> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(ErrorObject::internal_error().of("connection closed before response")),
        }
    }

    /// Cancel the request. Sends `$/cancelRequest` to the remote peer
    /// (best-effort, the peer may ignore it) and rejects the local future
    /// with RequestCancelled immediately, without waiting for any remote
    /// acknowledgment. A no-op if the response already arrived.
    pub async fn cancel(&mut self) {
        let sender = self.inner.pending.lock().await.remove(&self.id);
        let Some(tx) = sender else {
            debug!(id = %self.id, "cancel after response, ignoring");
            return;
        };

        let params = CancelParams {
            id: self.id.clone(),
        };
        let params = match serde_json::to_value(&params) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("failed to encode cancel params: {}", e);
                None
            }
        };
        let message = Message::Notification(Notification::new(crate::message::CANCEL_METHOD, params));
        self.inner.writer.write(&message).await;

        let _ = tx.send(Err(ErrorObject::request_cancelled()));
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall").field("id", &self.id).finish()
    }
}
