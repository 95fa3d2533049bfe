//! The language server: LSP methods wired onto a JSON-RPC endpoint.
//!
//! All protocol state (workspace, settings, lifecycle flags) hangs off one
//! [`ServerState`] shared by every handler. Handlers run on the endpoint's
//! worker pool; anything touching the workspace goes through its lock, so
//! text sync stays ordered relative to the queries that follow it.

use crate::config::Settings;
use crate::provider::LanguageProvider;
use crate::workspace::{Document, Workspace};
use futures::FutureExt;
use glint_rpc::{
    Client, Dispatcher, Endpoint, ErrorObject, MessageReader, MessageWriter,
};
use lsp_types::notification::{
    DidChangeConfiguration, DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument,
    DidSaveTextDocument, Exit, Initialized, Notification as _, PublishDiagnostics,
};
use lsp_types::request::{
    Completion, DocumentSymbolRequest, Formatting, GotoDefinition, HoverRequest, References,
    Rename, Request as _, Shutdown,
};
use lsp_types::{
    CompletionOptions, CompletionParams, CompletionResponse, DidChangeConfigurationParams,
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, DocumentFormattingParams, DocumentSymbolParams,
    DocumentSymbolResponse, GotoDefinitionParams, HoverParams, HoverProviderCapability,
    InitializeParams, InitializeResult, Location, OneOf, PublishDiagnosticsParams,
    ReferenceParams, RenameParams, ServerCapabilities, ServerInfo, TextDocumentSyncCapability,
    TextDocumentSyncKind, TextDocumentSyncOptions, TextDocumentSyncSaveOptions, TextEdit, Uri,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Code returned for requests that arrive before `initialize`.
const SERVER_NOT_INITIALIZED: i64 = -32002;

/// Method name for `initialize`, which the lifecycle guard exempts.
const INITIALIZE_METHOD: &str = "initialize";

struct ServerState {
    client: Client,
    provider: Arc<dyn LanguageProvider>,
    workspace: RwLock<Workspace>,
    settings: RwLock<Settings>,
    initialized: AtomicBool,
    shutdown_requested: AtomicBool,
    exit: CancellationToken,
}

impl ServerState {
    /// Lifecycle guard for requests other than `initialize` and `shutdown`.
    fn ensure_initialized(&self) -> Result<(), ErrorObject> {
        if self.shutdown_requested.load(Ordering::SeqCst) {
            return Err(ErrorObject::invalid_request().of("shutdown has been requested"));
        }
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(ErrorObject::server_error(
                SERVER_NOT_INITIALIZED,
                "server not yet initialized",
            ));
        }
        Ok(())
    }

    /// Snapshot of one open document, for handing to the provider.
    async fn document(&self, uri: &str) -> Result<Document, ErrorObject> {
        self.workspace
            .read()
            .await
            .get(uri)
            .cloned()
            .ok_or_else(|| ErrorObject::invalid_params().of(format!("unknown document: {}", uri)))
    }

    /// Run the provider and push `textDocument/publishDiagnostics` for the
    /// given document. An empty list clears previously shown diagnostics.
    async fn publish_diagnostics(&self, uri: &str) {
        let Some(document) = self.workspace.read().await.get(uri).cloned() else {
            return;
        };
        let settings = self.settings.read().await.clone();

        let diagnostics = if settings.diagnostics {
            self.provider.diagnostics(&document, &settings).await
        } else {
            Vec::new()
        };
        self.send_diagnostics(uri, Some(document.version), diagnostics)
            .await;
    }

    async fn send_diagnostics(
        &self,
        uri: &str,
        version: Option<i32>,
        diagnostics: Vec<lsp_types::Diagnostic>,
    ) {
        let Ok(uri) = Uri::from_str(uri) else {
            warn!(%uri, "not publishing diagnostics for unparsable uri");
            return;
        };
        let params = PublishDiagnosticsParams {
            uri,
            diagnostics,
            version,
        };
        match serde_json::to_value(&params) {
            Ok(params) => {
                self.client
                    .notify(PublishDiagnostics::METHOD, Some(params))
                    .await;
            }
            Err(e) => warn!("failed to encode diagnostics: {}", e),
        }
    }

    async fn initialize(&self, params: Option<Value>) -> Result<Value, ErrorObject> {
        let params: InitializeParams = parse_params(params)?;

        self.workspace
            .write()
            .await
            .set_root_uri(root_uri_of(&params));
        if let Some(options) = &params.initialization_options {
            self.settings.write().await.merge(options);
        }
        self.initialized.store(true, Ordering::SeqCst);
        info!("initialized");

        to_value(&InitializeResult {
            capabilities: capabilities(),
            server_info: Some(ServerInfo {
                name: "glint".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn shutdown(&self) -> Result<Value, ErrorObject> {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        info!("shutdown requested");
        Ok(Value::Null)
    }

    fn exit(&self) {
        info!("exit requested");
        self.exit.cancel();
    }

    async fn did_open(&self, params: Option<Value>) -> Result<(), ErrorObject> {
        let params: DidOpenTextDocumentParams = parse_params(params)?;
        let item = params.text_document;
        let uri = item.uri.as_str().to_string();

        self.workspace.write().await.open(Document::new(
            uri.clone(),
            item.language_id,
            item.version,
            item.text,
        ));
        self.publish_diagnostics(&uri).await;
        Ok(())
    }

    async fn did_change(&self, params: Option<Value>) -> Result<(), ErrorObject> {
        let params: DidChangeTextDocumentParams = parse_params(params)?;
        let uri = params.text_document.uri.as_str().to_string();

        let changes = params
            .content_changes
            .into_iter()
            .map(|change| (change.range, change.text));
        let known = self
            .workspace
            .write()
            .await
            .update(&uri, params.text_document.version, changes);
        if !known {
            warn!(%uri, "change for unopened document");
            return Ok(());
        }
        self.publish_diagnostics(&uri).await;
        Ok(())
    }

    async fn did_save(&self, params: Option<Value>) -> Result<(), ErrorObject> {
        let params: DidSaveTextDocumentParams = parse_params(params)?;
        self.publish_diagnostics(params.text_document.uri.as_str())
            .await;
        Ok(())
    }

    async fn did_close(&self, params: Option<Value>) -> Result<(), ErrorObject> {
        let params: DidCloseTextDocumentParams = parse_params(params)?;
        let uri = params.text_document.uri.as_str().to_string();

        let closed = self.workspace.write().await.close(&uri);
        if closed.is_some() {
            // Clear anything still displayed for the closed document.
            self.send_diagnostics(&uri, None, Vec::new()).await;
        }
        Ok(())
    }

    async fn did_change_configuration(&self, params: Option<Value>) -> Result<(), ErrorObject> {
        let params: DidChangeConfigurationParams = parse_params(params)?;
        self.settings.write().await.merge(&params.settings);
        let settings = self.settings.read().await;
        debug!(settings = ?*settings, "configuration changed");
        drop(settings);

        let uris: Vec<String> = self
            .workspace
            .read()
            .await
            .uris()
            .map(str::to_string)
            .collect();
        for uri in uris {
            self.publish_diagnostics(&uri).await;
        }
        Ok(())
    }

    async fn hover(&self, params: Option<Value>) -> Result<Value, ErrorObject> {
        let params: HoverParams = parse_params(params)?;
        let position = params.text_document_position_params;
        let document = self.document(position.text_document.uri.as_str()).await?;

        let hover = self.provider.hover(&document, position.position).await;
        to_value(&hover)
    }

    async fn completion(&self, params: Option<Value>) -> Result<Value, ErrorObject> {
        if !self.settings.read().await.completion {
            return Ok(Value::Null);
        }
        let params: CompletionParams = parse_params(params)?;
        let position = params.text_document_position;
        let document = self.document(position.text_document.uri.as_str()).await?;

        let items = self
            .provider
            .completions(&document, position.position)
            .await;
        to_value(&CompletionResponse::Array(items))
    }

    async fn definition(&self, params: Option<Value>) -> Result<Value, ErrorObject> {
        let params: GotoDefinitionParams = parse_params(params)?;
        let position = params.text_document_position_params;
        let document = self.document(position.text_document.uri.as_str()).await?;

        let ranges = self.provider.definition(&document, position.position).await;
        to_value(&locations(&document.uri, ranges)?)
    }

    async fn references(&self, params: Option<Value>) -> Result<Value, ErrorObject> {
        let params: ReferenceParams = parse_params(params)?;
        let position = params.text_document_position;
        let document = self.document(position.text_document.uri.as_str()).await?;

        let ranges = self
            .provider
            .references(
                &document,
                position.position,
                params.context.include_declaration,
            )
            .await;
        to_value(&locations(&document.uri, ranges)?)
    }

    async fn document_symbols(&self, params: Option<Value>) -> Result<Value, ErrorObject> {
        let params: DocumentSymbolParams = parse_params(params)?;
        let document = self.document(params.text_document.uri.as_str()).await?;

        let symbols = self.provider.document_symbols(&document).await;
        to_value(&DocumentSymbolResponse::Nested(symbols))
    }

    async fn formatting(&self, params: Option<Value>) -> Result<Value, ErrorObject> {
        let params: DocumentFormattingParams = parse_params(params)?;
        let document = self.document(params.text_document.uri.as_str()).await?;
        let settings = self.settings.read().await.clone();

        let edits: Vec<TextEdit> = match self.provider.format(&document, &settings).await {
            Some(formatted) => vec![TextEdit::new(document.full_range(), formatted)],
            None => Vec::new(),
        };
        to_value(&edits)
    }

    async fn rename(&self, params: Option<Value>) -> Result<Value, ErrorObject> {
        let params: RenameParams = parse_params(params)?;
        let position = params.text_document_position;
        let document = self.document(position.text_document.uri.as_str()).await?;

        let edit = self
            .provider
            .rename(&document, position.position, &params.new_name)
            .await;
        to_value(&edit)
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ErrorObject> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| ErrorObject::invalid_params().of(e))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ErrorObject> {
    serde_json::to_value(value).map_err(|e| ErrorObject::internal_error().of(e))
}

fn locations(uri: &str, ranges: Vec<lsp_types::Range>) -> Result<Vec<Location>, ErrorObject> {
    let uri =
        Uri::from_str(uri).map_err(|e| ErrorObject::internal_error().of(format!("bad uri: {}", e)))?;
    Ok(ranges
        .into_iter()
        .map(|range| Location::new(uri.clone(), range))
        .collect())
}

#[allow(deprecated)] // root_uri is deprecated in favor of workspace folders
fn root_uri_of(params: &InitializeParams) -> Option<String> {
    if let Some(folders) = &params.workspace_folders {
        if let Some(first) = folders.first() {
            return Some(first.uri.as_str().to_string());
        }
    }
    params.root_uri.as_ref().map(|u| u.as_str().to_string())
}

fn capabilities() -> ServerCapabilities {
    ServerCapabilities {
        text_document_sync: Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
            open_close: Some(true),
            change: Some(TextDocumentSyncKind::INCREMENTAL),
            save: Some(TextDocumentSyncSaveOptions::Supported(true)),
            ..TextDocumentSyncOptions::default()
        })),
        hover_provider: Some(HoverProviderCapability::Simple(true)),
        completion_provider: Some(CompletionOptions::default()),
        definition_provider: Some(OneOf::Left(true)),
        references_provider: Some(OneOf::Left(true)),
        document_symbol_provider: Some(OneOf::Left(true)),
        document_formatting_provider: Some(OneOf::Left(true)),
        rename_provider: Some(OneOf::Left(true)),
        ..ServerCapabilities::default()
    }
}

/// One language server session, bound to a single client connection.
pub struct LanguageServer {
    state: Arc<ServerState>,
}

impl LanguageServer {
    pub fn new(client: Client, provider: Arc<dyn LanguageProvider>, settings: Settings) -> Self {
        Self {
            state: Arc::new(ServerState {
                client,
                provider,
                workspace: RwLock::new(Workspace::new()),
                settings: RwLock::new(settings),
                initialized: AtomicBool::new(false),
                shutdown_requested: AtomicBool::new(false),
                exit: CancellationToken::new(),
            }),
        }
    }

    /// Cancelled when the client sends `exit`.
    pub fn exit_token(&self) -> CancellationToken {
        self.state.exit.clone()
    }

    /// Whether `shutdown` was received before the session ended.
    pub fn shutdown_received(&self) -> bool {
        self.state.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Build the method table. Every handler defers to the worker pool, so
    /// a slow provider never stalls the read loop and in-flight requests
    /// stay cancellable.
    pub fn dispatcher(&self) -> Dispatcher {
        let mut dispatcher = Dispatcher::new();

        // Lifecycle. `initialize` and `shutdown` bypass the guard.
        self.request(&mut dispatcher, INITIALIZE_METHOD, false, |state, params| {
            async move { state.initialize(params).await }.boxed()
        });
        self.request(&mut dispatcher, Shutdown::METHOD, false, |state, _params| {
            async move { state.shutdown().await }.boxed()
        });
        {
            let state = self.state.clone();
            dispatcher.register_sync(Exit::METHOD, move |_params| {
                state.exit();
                Ok(Value::Null)
            });
        }
        dispatcher.register_sync(Initialized::METHOD, |_params| Ok(Value::Null));

        // Text synchronization.
        self.notification(&mut dispatcher, DidOpenTextDocument::METHOD, |state, params| {
            async move { state.did_open(params).await }.boxed()
        });
        self.notification(&mut dispatcher, DidChangeTextDocument::METHOD, |state, params| {
            async move { state.did_change(params).await }.boxed()
        });
        self.notification(&mut dispatcher, DidSaveTextDocument::METHOD, |state, params| {
            async move { state.did_save(params).await }.boxed()
        });
        self.notification(&mut dispatcher, DidCloseTextDocument::METHOD, |state, params| {
            async move { state.did_close(params).await }.boxed()
        });
        self.notification(&mut dispatcher, DidChangeConfiguration::METHOD, |state, params| {
            async move { state.did_change_configuration(params).await }.boxed()
        });

        // Queries.
        self.request(&mut dispatcher, HoverRequest::METHOD, true, |state, params| {
            async move { state.hover(params).await }.boxed()
        });
        self.request(&mut dispatcher, Completion::METHOD, true, |state, params| {
            async move { state.completion(params).await }.boxed()
        });
        self.request(&mut dispatcher, GotoDefinition::METHOD, true, |state, params| {
            async move { state.definition(params).await }.boxed()
        });
        self.request(&mut dispatcher, References::METHOD, true, |state, params| {
            async move { state.references(params).await }.boxed()
        });
        self.request(&mut dispatcher, DocumentSymbolRequest::METHOD, true, |state, params| {
            async move { state.document_symbols(params).await }.boxed()
        });
        self.request(&mut dispatcher, Formatting::METHOD, true, |state, params| {
            async move { state.formatting(params).await }.boxed()
        });
        self.request(&mut dispatcher, Rename::METHOD, true, |state, params| {
            async move { state.rename(params).await }.boxed()
        });

        dispatcher
    }

    fn request<F>(&self, dispatcher: &mut Dispatcher, method: &str, guarded: bool, f: F)
    where
        F: Fn(
                Arc<ServerState>,
                Option<Value>,
            ) -> futures::future::BoxFuture<'static, Result<Value, ErrorObject>>
            + Send
            + Sync
            + 'static,
    {
        let state = self.state.clone();
        dispatcher.register_async(method, move |params| {
            let state = state.clone();
            if guarded {
                if let Err(e) = state.ensure_initialized() {
                    return async move { Err(e) }.boxed();
                }
            }
            f(state, params)
        });
    }

    fn notification<F>(&self, dispatcher: &mut Dispatcher, method: &str, f: F)
    where
        F: Fn(
                Arc<ServerState>,
                Option<Value>,
            ) -> futures::future::BoxFuture<'static, Result<(), ErrorObject>>
            + Send
            + Sync
            + 'static,
    {
        let state = self.state.clone();
        dispatcher.register_async(method, move |params| {
            let state = state.clone();
            f(state, params).map(|result| result.map(|()| Value::Null)).boxed()
        });
    }
}

impl std::fmt::Debug for LanguageServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageServer").finish_non_exhaustive()
    }
}

/// Serve one connection until the client exits or disconnects. Returns
/// `true` when the session ended cleanly, i.e. the client sent `shutdown`
/// before going away.
pub async fn serve<R, W>(
    read: R,
    write: W,
    provider: Arc<dyn LanguageProvider>,
    settings: Settings,
) -> bool
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let writer = Arc::new(MessageWriter::new(write));
    let client = Client::new(writer);
    let server = LanguageServer::new(client.clone(), provider, settings);
    let exit = server.exit_token();

    let endpoint = Endpoint::new(server.dispatcher(), client);
    let reader = MessageReader::new(BufReader::new(read));

    tokio::select! {
        () = reader.listen(&endpoint) => {
            debug!("client disconnected");
        }
        () = exit.cancelled() => {
            debug!("session exiting");
        }
    }
    endpoint.close().await;

    server.shutdown_received()
}
