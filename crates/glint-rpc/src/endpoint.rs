//! The endpoint: message classification, handler dispatch, response
//! correlation and cancellation.
//!
//! One endpoint owns one connection. All state lives on the instance, so
//! multiple endpoints coexist without cross-talk (tests run dozens).
//!
//! Handlers declare their shape through [`Outcome`]: `Immediate` results
//! are answered on the reader task, `Deferred` futures run on a bounded
//! worker pool and answer whenever they finish. Responses may therefore
//! leave the wire out of order; the peer correlates by id.

use crate::client::Client;
use crate::error::ErrorObject;
use crate::message::{CancelParams, Message, Notification, Request, RequestId, Response, CANCEL_METHOD};
use crate::stream::MessageConsumer;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Size of the worker pool for deferred handlers.
pub const DEFAULT_WORKERS: usize = 5;

/// What a handler invocation produced.
pub enum Outcome {
    /// The result is already known; the response is written immediately.
    Immediate(Value),
    /// Deferred work to run on the worker pool, off the reader task.
    /// Cancellable until it completes.
    Deferred(BoxFuture<'static, Result<Value, ErrorObject>>),
}

/// A method implementation.
///
/// Invoked on the reader task, so `handle` itself must be fast; anything
/// slow belongs in a returned [`Outcome::Deferred`]. Errors returned here
/// (or by the deferred future) go back to the peer as structured error
/// responses.
pub trait Handler: Send + Sync {
    fn handle(&self, params: Option<Value>) -> Result<Outcome, ErrorObject>;
}

struct SyncFn<F>(F);

impl<F> Handler for SyncFn<F>
where
    F: Fn(Option<Value>) -> Result<Value, ErrorObject> + Send + Sync,
{
    fn handle(&self, params: Option<Value>) -> Result<Outcome, ErrorObject> {
        (self.0)(params).map(Outcome::Immediate)
    }
}

struct AsyncFn<F>(F);

impl<F> Handler for AsyncFn<F>
where
    F: Fn(Option<Value>) -> BoxFuture<'static, Result<Value, ErrorObject>> + Send + Sync,
{
    fn handle(&self, params: Option<Value>) -> Result<Outcome, ErrorObject> {
        Ok(Outcome::Deferred((self.0)(params)))
    }
}

/// Explicit method-name to handler mapping, built at startup.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: impl Into<String>, handler: impl Handler + 'static) {
        self.handlers.insert(method.into(), Arc::new(handler));
    }

    /// Register a handler whose result is available immediately.
    pub fn register_sync<F>(&mut self, method: impl Into<String>, f: F)
    where
        F: Fn(Option<Value>) -> Result<Value, ErrorObject> + Send + Sync + 'static,
    {
        self.register(method, SyncFn(f));
    }

    /// Register a handler that defers its work to the worker pool.
    pub fn register_async<F>(&mut self, method: impl Into<String>, f: F)
    where
        F: Fn(Option<Value>) -> BoxFuture<'static, Result<Value, ErrorObject>> + Send + Sync + 'static,
    {
        self.register(method, AsyncFn(f));
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    fn get(&self, method: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(method).cloned()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct EndpointInner {
    client: Client,
    dispatcher: Dispatcher,
    // Incoming-pending table: request id -> cancellation token for the
    // in-flight deferred handler. At most one entry per id; removal is the
    // gate deciding who writes the (single) response.
    pending: Mutex<HashMap<RequestId, CancellationToken>>,
    workers: Semaphore,
}

/// Bidirectional JSON-RPC endpoint for a single connection.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

impl Endpoint {
    pub fn new(dispatcher: Dispatcher, client: Client) -> Self {
        Self::with_workers(dispatcher, client, DEFAULT_WORKERS)
    }

    pub fn with_workers(dispatcher: Dispatcher, client: Client, workers: usize) -> Self {
        Self {
            inner: Arc::new(EndpointInner {
                client,
                dispatcher,
                pending: Mutex::new(HashMap::new()),
                workers: Semaphore::new(workers),
            }),
        }
    }

    /// Handle for emitting server-initiated traffic.
    pub fn client(&self) -> Client {
        self.inner.client.clone()
    }

    /// Send a notification to the peer.
    pub async fn notify(&self, method: impl Into<String>, params: Option<Value>) {
        self.inner.client.notify(method, params).await;
    }

    /// Send a request to the peer; see [`Client::request`].
    pub async fn request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> crate::client::PendingCall {
        self.inner.client.request(method, params).await
    }

    /// Single entry point for every inbound message, fed by the stream
    /// reader. Never fails: malformed input is logged and dropped.
    pub async fn consume(&self, raw: Value) {
        match Message::classify(raw) {
            Err(raw) => {
                warn!(message = %raw, "dropping malformed message");
            }
            Ok(Message::Response(response)) => {
                self.inner.client.settle(response).await;
            }
            Ok(Message::Notification(n)) if n.method == CANCEL_METHOD => {
                self.handle_cancel(n.params).await;
            }
            Ok(Message::Notification(n)) => {
                self.handle_notification(n).await;
            }
            Ok(Message::Request(request)) => {
                self.handle_request(request).await;
            }
        }
    }

    /// Tear down: reject outstanding local requests and close the writer.
    /// Called after the read loop ends.
    pub async fn close(&self) {
        self.inner
            .client
            .reject_all(ErrorObject::internal_error().of("connection closed"))
            .await;
        self.inner.client.writer().close().await;
    }

    async fn respond(&self, response: Response) {
        self.inner.client.writer().write(&Message::Response(response)).await;
    }

    async fn handle_request(&self, request: Request) {
        let Request {
            id, method, params, ..
        } = request;

        // A duplicate in-flight id must never start a second execution.
        if self.inner.pending.lock().await.contains_key(&id) {
            error!(%id, %method, "duplicate in-flight request id, dropping");
            return;
        }

        let handler = match self.inner.dispatcher.get(&method) {
            Some(handler) => handler,
            None => {
                warn!(%method, "no handler for request");
                self.respond(Response::error(
                    id,
                    ErrorObject::method_not_found().of(&method),
                ))
                .await;
                return;
            }
        };

        match handler.handle(params) {
            Err(error) => self.respond(Response::error(id, error)).await,
            Ok(Outcome::Immediate(value)) => self.respond(Response::success(id, value)).await,
            Ok(Outcome::Deferred(work)) => self.spawn_deferred(id, work).await,
        }
    }

    async fn spawn_deferred(
        &self,
        id: RequestId,
        work: BoxFuture<'static, Result<Value, ErrorObject>>,
    ) {
        let token = CancellationToken::new();
        self.inner
            .pending
            .lock()
            .await
            .insert(id.clone(), token.clone());

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let bounded = async {
                match inner.workers.acquire().await {
                    Ok(_permit) => work.await,
                    Err(_) => Err(ErrorObject::internal_error().of("worker pool closed")),
                }
            };

            tokio::select! {
                _ = token.cancelled() => {
                    // The cancel path owns the table entry and the
                    // RequestCancelled response; nothing to do here.
                    debug!(%id, "deferred request cancelled");
                }
                result = bounded => {
                    // Removal gates the write: if the entry is gone a
                    // cancellation won the race and already responded.
                    if inner.pending.lock().await.remove(&id).is_some() {
                        let response = match result {
                            Ok(value) => Response::success(id, value),
                            Err(error) => Response::error(id, error),
                        };
                        inner.client.writer().write(&Message::Response(response)).await;
                    }
                }
            }
        });
    }

    async fn handle_notification(&self, notification: Notification) {
        let Notification { method, params, .. } = notification;

        let handler = match self.inner.dispatcher.get(&method) {
            Some(handler) => handler,
            None => {
                // No id to reply to; notifications never produce errors.
                debug!(%method, "no handler for notification");
                return;
            }
        };

        match handler.handle(params) {
            Err(error) => warn!(%method, "notification handler failed: {}", error),
            Ok(Outcome::Immediate(_)) => {}
            Ok(Outcome::Deferred(work)) => {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    let Ok(_permit) = inner.workers.acquire().await else {
                        return;
                    };
                    if let Err(error) = work.await {
                        warn!(%method, "deferred notification handler failed: {}", error);
                    }
                });
            }
        }
    }

    /// `$/cancelRequest`: advisory, best-effort. Races between completion
    /// and cancellation are expected; whoever removes the pending entry
    /// first wins and the loser no-ops.
    async fn handle_cancel(&self, params: Option<Value>) {
        let id = match params.and_then(|p| serde_json::from_value::<CancelParams>(p).ok()) {
            Some(cancel) => cancel.id,
            None => {
                warn!("malformed {} params", CANCEL_METHOD);
                return;
            }
        };

        let token = self.inner.pending.lock().await.remove(&id);
        match token {
            Some(token) => {
                token.cancel();
                // No response has been written for this id yet, so the peer
                // gets a RequestCancelled error response.
                self.respond(Response::error(id, ErrorObject::request_cancelled()))
                    .await;
            }
            None => {
                debug!(%id, "cancel for unknown or completed request");
            }
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("dispatcher", &self.inner.dispatcher)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageConsumer for Endpoint {
    async fn consume(&self, message: Value) {
        Endpoint::consume(self, message).await;
    }
}
