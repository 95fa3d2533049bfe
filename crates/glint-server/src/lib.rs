//! A small language server built on [`glint_rpc`].
//!
//! The crate splits along one seam: [`server`] speaks the protocol
//! (lifecycle, text synchronization, query dispatch) and knows nothing
//! about any particular language, while [`provider::LanguageProvider`]
//! supplies the analysis. [`provider::WordProvider`] is the built-in
//! backend: word-level hover, completion, references, rename and
//! formatting over plain text.
//!
//! ```no_run
//! use glint_server::{serve, Settings, WordProvider};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let clean = serve(
//!         tokio::io::stdin(),
//!         tokio::io::stdout(),
//!         Arc::new(WordProvider),
//!         Settings::default(),
//!     )
//!     .await;
//!     std::process::exit(if clean { 0 } else { 1 });
//! }
//! ```

pub mod config;
pub mod provider;
pub mod server;
pub mod workspace;

pub use config::{Settings, CONFIG_SECTION};
pub use provider::{LanguageProvider, NoopProvider, WordProvider};
pub use server::{serve, LanguageServer};
pub use workspace::{Document, Workspace};
