//! Stream reader and writer halves of a connection.
//!
//! The reader owns the inbound byte stream: a single task loops extracting
//! frames and hands each decoded message to a consumer, in arrival order.
//! The writer owns the outbound stream and is the only path to it; a lock
//! keeps concurrent writers from interleaving bytes of two frames.

use crate::codec;
use crate::message::Message;
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, error, trace, warn};

/// Receives each decoded message from a [`MessageReader`].
///
/// Invoked on the reader's own task; implementations dispatch further work
/// themselves (the reader performs no concurrency).
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    async fn consume(&self, message: Value);
}

/// Inbound half: extracts frames from the byte stream until it closes.
pub struct MessageReader<R> {
    inner: R,
}

impl<R> MessageReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Blocking read loop. Malformed frames are logged and skipped; a
    /// misbehaving client must not bring the server down. Returns when the
    /// stream reports EOF or a fatal I/O error, after which the consumer is
    /// never invoked again.
    pub async fn listen<C>(mut self, consumer: &C)
    where
        C: MessageConsumer,
    {
        loop {
            match codec::read_frame(&mut self.inner).await {
                Ok(Some(message)) => {
                    trace!(?message, "received message");
                    consumer.consume(message).await;
                }
                Ok(None) => {
                    debug!("input stream closed");
                    break;
                }
                Err(e) if e.is_frame_local() => {
                    warn!("skipping malformed frame: {}", e);
                }
                Err(e) => {
                    error!("read loop terminated: {}", e);
                    break;
                }
            }
        }
    }
}

/// Outbound half. Cheap to share behind an `Arc`; safe to call from any
/// task.
pub struct MessageWriter {
    // None once closed; writes become silent no-ops.
    inner: Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>,
}

impl MessageWriter {
    pub fn new(inner: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Mutex::new(Some(Box::new(inner))),
        }
    }

    /// Encode and write one frame, atomically with respect to concurrent
    /// callers. Failures never surface: a closed stream drops the write
    /// silently (handlers may finish after shutdown), an encode or I/O
    /// failure is logged and the write abandoned.
    pub async fn write(&self, message: &Message) {
        let mut guard = self.inner.lock().await;
        let Some(stream) = guard.as_mut() else {
            debug!("dropping write to closed stream");
            return;
        };

        let frame = match codec::encode_frame(message) {
            Ok(frame) => frame,
            Err(e) => {
                error!("failed to encode message: {}", e);
                return;
            }
        };

        trace!(?message, "sending message");
        let result = async {
            stream.write_all(&frame).await?;
            stream.flush().await
        }
        .await;

        if let Err(e) = result {
            // The peer is gone; subsequent writes are no-ops.
            warn!("write failed, closing output stream: {}", e);
            *guard = None;
        }
    }

    /// Close the outbound stream. Subsequent writes are silent no-ops.
    pub async fn close(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(stream) = guard.as_mut() {
            let _ = stream.shutdown().await;
        }
        *guard = None;
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

impl std::fmt::Debug for MessageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageWriter").finish_non_exhaustive()
    }
}
