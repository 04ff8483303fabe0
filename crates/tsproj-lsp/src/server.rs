use crate::config::ServiceConfig;
use crate::file_watcher;
use crate::service::{ProjectService, WorkspaceSymbolMatch, uri_to_path};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_lsp_server::jsonrpc::{self, ErrorCode};
use tower_lsp_server::ls_types::{
    Diagnostic, DidChangeTextDocumentParams, DidChangeWatchedFilesParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, ExecuteCommandOptions,
    ExecuteCommandParams, GotoDefinitionParams, GotoDefinitionResponse, InitializeParams,
    InitializeResult, InitializedParams, LSPAny, Location, MessageType, OneOf, ReferenceParams,
    ServerCapabilities, ServerInfo, SymbolInformation, TextDocumentSyncCapability,
    TextDocumentSyncKind, Uri, WorkspaceSymbolParams, WorkspaceSymbolResponse,
};
use tower_lsp_server::{Client, LanguageServer, jsonrpc::Result};
use tsproj_core::paths::is_inferred_key;
use tsproj_core::{FileLocation, ProjectDiagnostic, ProjectError};
use tsproj_lexical::LexicalCompiler;

/// LSP command identifiers.
mod commands {
    /// Command returning a text dump of every project and open file.
    pub const DUMP_PROJECTS: &str = "tsproj.dumpProjects";
}

/// Cancellation tokens of queries that a newer query of the same kind
/// supersedes.
#[derive(Default)]
struct PendingQueries {
    generation: AtomicU64,
    tokens: DashMap<&'static str, (u64, CancellationToken)>,
}

impl PendingQueries {
    /// Cancels the pending query of `kind` and registers a new one.
    fn schedule(&self, kind: &'static str) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        if let Some((_, (_, previous))) = self.tokens.remove(kind) {
            previous.cancel();
        }
        self.tokens.insert(kind, (generation, token.clone()));
        (generation, token)
    }

    fn complete(&self, kind: &'static str, generation: u64) {
        self.tokens.remove_if(kind, |_, (current, _)| *current == generation);
    }
}

pub struct Backend {
    pub(crate) client: Client,
    service: RwLock<Arc<ProjectService>>,
    pending: PendingQueries,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            service: RwLock::new(Arc::new(Self::build_service(ServiceConfig::default()))),
            pending: PendingQueries::default(),
        }
    }

    fn build_service(config: ServiceConfig) -> ProjectService {
        ProjectService::new(config, Arc::new(LexicalCompiler::new()))
    }

    /// Get a reference to the LSP client (primarily for testing).
    #[doc(hidden)]
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn service(&self) -> Arc<ProjectService> {
        Arc::clone(&*self.service.read().await)
    }

    /// Publishes the default project's diagnostics, grouped by file.
    ///
    /// The opened document always gets a report so stale results clear.
    async fn publish_diagnostics(&self, service: &ProjectService, project: &Path, document: &Path) {
        let mut by_file: BTreeMap<PathBuf, Vec<Diagnostic>> = BTreeMap::new();
        by_file.entry(document.to_path_buf()).or_default();

        for diagnostic in service.project_diagnostics(project).await {
            let Some(file) = diagnostic.file.clone() else {
                continue;
            };
            if is_inferred_key(&file) {
                continue;
            }
            by_file.entry(file).or_default().push(to_lsp_diagnostic(&diagnostic));
        }

        for (path, items) in by_file {
            let Some(uri) = Uri::from_file_path(&path) else {
                continue;
            };
            self.client.publish_diagnostics(uri, items, None).await;
        }
    }

    fn server_capabilities() -> ServerCapabilities {
        ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::FULL)),
            references_provider: Some(OneOf::Left(true)),
            definition_provider: Some(OneOf::Left(true)),
            workspace_symbol_provider: Some(OneOf::Left(true)),
            execute_command_provider: Some(ExecuteCommandOptions {
                commands: vec![commands::DUMP_PROJECTS.into()],
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn to_lsp_diagnostic(diagnostic: &ProjectDiagnostic) -> Diagnostic {
    Diagnostic {
        range: diagnostic.range.unwrap_or_default(),
        severity: Some(diagnostic.severity),
        source: Some("tsproj".into()),
        message: diagnostic.message.clone(),
        ..Default::default()
    }
}

fn to_location(location: &FileLocation) -> Option<Location> {
    Uri::from_file_path(&location.path).map(|uri| Location::new(uri, location.range))
}

#[allow(deprecated)]
fn to_symbol_information(m: &WorkspaceSymbolMatch) -> Option<SymbolInformation> {
    Some(SymbolInformation {
        name: m.symbol.name.clone(),
        kind: m.symbol.kind,
        tags: None,
        deprecated: None,
        location: to_location(&m.symbol.declaration)?,
        container_name: m.symbol.container.clone(),
    })
}

/// Maps a service result onto a protocol response.
///
/// Cancellation is reported to the client; other failures are logged and
/// answered with an empty result.
fn respond<T>(method: &'static str, result: tsproj_core::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ProjectError::Cancelled) => {
            tracing::debug!(method, "request cancelled");
            Err(jsonrpc::Error::new(ErrorCode::RequestCancelled))
        }
        Err(e) => {
            tracing::warn!(method, error = %e, "request failed");
            Ok(None)
        }
    }
}

impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        tracing::info!("initializing tsproj-lsp server");

        if let Some(init_options) = params.initialization_options
            && let Ok(config) = serde_json::from_value::<ServiceConfig>(init_options)
        {
            tracing::debug!(?config, "loaded configuration");
            *self.service.write().await = Arc::new(Self::build_service(config));
        }

        Ok(InitializeResult {
            capabilities: Self::server_capabilities(),
            server_info: Some(ServerInfo {
                name: "tsproj-lsp".into(),
                version: Some(env!("CARGO_PKG_VERSION").into()),
            }),
            offset_encoding: None,
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        tracing::info!("tsproj-lsp server initialized");
        self.client
            .log_message(MessageType::INFO, "tsproj-lsp ready")
            .await;

        let patterns = file_watcher::watch_patterns(&self.service().await.config().config_file_names);
        if let Err(e) = file_watcher::register_project_file_watchers(&self.client, &patterns).await {
            tracing::warn!(error = %e, "failed to register file watchers");
            self.client
                .log_message(
                    MessageType::WARNING,
                    format!("File watching disabled: {e}"),
                )
                .await;
        }
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!("shutting down tsproj-lsp server");
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let document = params.text_document;
        let service = self.service().await;

        let path = match uri_to_path(&document.uri) {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring non-file document");
                return;
            }
        };

        match service
            .did_open(document.uri, document.version, document.text)
            .await
        {
            Ok(assignment) => {
                self.publish_diagnostics(&service, &assignment.default, &path)
                    .await;
            }
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "failed to open document");
                self.client
                    .log_message(MessageType::ERROR, format!("Failed to load project: {e}"))
                    .await;
            }
        }
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        if let Some(change) = params.content_changes.into_iter().last()
            && let Err(e) = self.service().await.did_change(&uri, version, change.text)
        {
            tracing::debug!(error = %e, "ignoring change");
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        if let Err(e) = self.service().await.did_close(&params.text_document.uri) {
            tracing::debug!(error = %e, "ignoring close");
        }
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        tracing::debug!(changes = params.changes.len(), "received file change events");
        let service = self.service().await;

        for change in params.changes {
            let Some(path) = change.uri.to_file_path() else {
                tracing::warn!(uri = change.uri.as_str(), "invalid file path in change event");
                continue;
            };
            service.did_change_watched_file(&path).await;
        }
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let position = params.text_document_position;
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();

        let result = self
            .service()
            .await
            .references(
                &position.text_document.uri,
                position.position,
                params.context.include_declaration,
                &cancel,
            )
            .await;

        Ok(respond("textDocument/references", result)?
            .map(|locations| locations.iter().filter_map(to_location).collect()))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let position = params.text_document_position_params;
        let result = self
            .service()
            .await
            .definition(&position.text_document.uri, position.position)
            .await;

        Ok(respond("textDocument/definition", result)?
            .flatten()
            .as_ref()
            .and_then(to_location)
            .map(GotoDefinitionResponse::Scalar))
    }

    async fn symbol(&self, params: WorkspaceSymbolParams) -> Result<Option<WorkspaceSymbolResponse>> {
        const KIND: &str = "workspace/symbol";
        let (generation, cancel) = self.pending.schedule(KIND);
        let _guard = cancel.clone().drop_guard();

        let result = self
            .service()
            .await
            .workspace_symbol(&params.query, &cancel)
            .await;
        self.pending.complete(KIND, generation);

        Ok(respond(KIND, result)?.map(|matches| {
            WorkspaceSymbolResponse::Flat(matches.iter().filter_map(to_symbol_information).collect())
        }))
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> Result<Option<LSPAny>> {
        tracing::info!(command = %params.command, "execute_command request");

        match params.command.as_str() {
            commands::DUMP_PROJECTS => {
                let dump = self.service().await.snapshot().to_string();
                Ok(Some(LSPAny::String(dump)))
            }
            other => {
                tracing::warn!(command = other, "unknown command");
                Ok(None)
            }
        }
    }
}
