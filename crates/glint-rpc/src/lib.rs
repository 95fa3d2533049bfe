//! JSON-RPC transport and request lifecycle for the glint language server.
//!
//! This crate is the protocol core: it frames messages over a byte stream,
//! multiplexes concurrent client requests and server-initiated requests
//! over that single ordered stream, and layers cancellation and
//! notification semantics on top.
//!
//! # Architecture
//!
//! ```text
//!            bytes                 frames              messages
//! ┌────────┐  ───►  ┌───────────┐  ───►  ┌──────────┐  ───►  handlers
//! │ stream │        │  codec    │        │ Endpoint │        (sync /
//! │ (stdio │  ◄───  │ (Content- │  ◄───  │ dispatch │  ◄───  deferred)
//! │ / TCP) │        │  Length)  │        │ + tables │
//! └────────┘        └───────────┘        └──────────┘
//! ```
//!
//! One reader task feeds [`Endpoint::consume`]; immediate handler results
//! are answered inline, deferred ones run on a bounded worker pool and
//! answer out of order. The [`stream::MessageWriter`] lock keeps frames
//! from interleaving on the wire. [`client::Client`] carries the outgoing
//! half (id allocation, response correlation, `$/cancelRequest`).
//!
//! # Example
//!
//! ```no_run
//! use glint_rpc::{Client, Dispatcher, Endpoint, MessageReader, MessageWriter};
//! use std::sync::Arc;
//! use tokio::io::BufReader;
//!
//! # async fn example() {
//! let stdin = BufReader::new(tokio::io::stdin());
//! let writer = Arc::new(MessageWriter::new(tokio::io::stdout()));
//!
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.register_sync("ping", |_params| Ok(serde_json::json!("pong")));
//!
//! let endpoint = Endpoint::new(dispatcher, Client::new(writer));
//! MessageReader::new(stdin).listen(&endpoint).await;
//! endpoint.close().await;
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod stream;

pub use client::{Client, PendingCall};
pub use endpoint::{Dispatcher, Endpoint, Handler, Outcome, DEFAULT_WORKERS};
pub use error::{ErrorKind, ErrorObject, TransportError};
pub use message::{
    CancelParams, Message, Notification, Request, RequestId, Response, CANCEL_METHOD,
};
pub use stream::{MessageConsumer, MessageReader, MessageWriter};
