//
// backend.rs
//
// The tower-lsp backend: document lifecycle, indexing, rename orchestration
//

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;
use tower_lsp::jsonrpc::{Error, Result};
use tower_lsp::lsp_types::*;
use tower_lsp::Client;
use tower_lsp::LanguageServer;
use tower_lsp::LspService;
use tower_lsp::Server;

use crate::buffering::{Command, CommandGate};
use crate::progress::{BeginOpts, ClientTransport, Outcome, ProgressChannel, ProgressToken};
use crate::rename::{
    build_plan, DialectTable, EditorDialect, FileEvent, RenameCoordinator, RenameEngine,
    RenameError, TextualRenameEngine, UpdateProgressFn,
};
use crate::state::WorldState;
use crate::workspace_index::{collect_workspace_files, IndexMutator, WorkspaceIndex};

pub struct Backend {
    client: Client,
    state: Arc<RwLock<WorldState>>,
    index: Arc<WorkspaceIndex>,
    transport: Arc<ClientTransport>,
    progress: Arc<ProgressChannel>,
    gate: Arc<CommandGate>,
    renames: Arc<RenameCoordinator>,
    engine: Arc<dyn RenameEngine>,
    dialects: std::sync::RwLock<DialectTable>,
}

/// The `sable.rename` settings section.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameSettings {
    /// Client name to dialect, e.g. `{ "MyEditor": "autoSave" }`
    #[serde(default)]
    editor_dialects: HashMap<String, String>,
}

/// Parse dialect table overrides from LSP settings.
///
/// Reads `sable.rename.editorDialects`; returns `None` when the section is
/// absent. Unrecognized dialect names are skipped with a warning.
fn parse_dialect_overrides(settings: &serde_json::Value) -> Option<Vec<(String, EditorDialect)>> {
    let section = settings.get("sable")?.get("rename")?;
    let parsed: RenameSettings = match serde_json::from_value(section.clone()) {
        Ok(parsed) => parsed,
        Err(err) => {
            log::warn!("Ignoring malformed rename settings: {}", err);
            return None;
        }
    };

    let mut overrides = Vec::new();
    for (client, dialect) in parsed.editor_dialects {
        match dialect.as_str() {
            "autoSave" => overrides.push((client, EditorDialect::AutoSave)),
            "manual" => overrides.push((client, EditorDialect::Manual)),
            other => log::warn!("Unknown editor dialect '{}' for {}", other, client),
        }
    }
    Some(overrides)
}

impl Backend {
    pub fn new(client: Client) -> Self {
        let transport = Arc::new(ClientTransport::new(client.clone()));
        let progress = Arc::new(ProgressChannel::new(transport.clone()));
        let index = Arc::new(WorkspaceIndex::new());
        let gate = Arc::new(CommandGate::new(index.clone() as Arc<dyn IndexMutator>));

        Self {
            client,
            state: Arc::new(RwLock::new(WorldState::new())),
            index,
            transport,
            progress,
            gate,
            renames: Arc::new(RenameCoordinator::new()),
            engine: Arc::new(TextualRenameEngine::new()),
            dialects: std::sync::RwLock::new(DialectTable::default()),
        }
    }

    /// Route a post-rename file event into the active tracker, if any.
    ///
    /// Outside of a rename these events are part of the normal document
    /// lifecycle and the miss is expected.
    fn route_rename_event(&self, event: FileEvent) {
        match self.renames.update_progress(event) {
            Ok(()) => {}
            Err(RenameError::NotInRenameProgress) => {
                log::trace!("File event outside of a rename; dropped");
            }
            Err(err) => {
                log::warn!("Dropping rename file event: {}", err);
            }
        }
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        log::info!("Initializing sable");

        let supports_progress = params
            .capabilities
            .window
            .as_ref()
            .and_then(|window| window.work_done_progress)
            .unwrap_or(false);
        self.transport.set_supported(supports_progress);

        let mut state = self.state.write().await;
        state.client_name = params.client_info.as_ref().map(|info| info.name.clone());
        if let Some(name) = &state.client_name {
            log::info!("Client: {}", name);
        }

        if let Some(folders) = params.workspace_folders {
            for folder in folders {
                log::info!("Adding workspace folder: {}", folder.uri);
                state.workspace_folders.push(folder.uri);
            }
        } else if let Some(root_uri) = params.root_uri {
            log::info!("Adding root URI as workspace folder: {}", root_uri);
            state.workspace_folders.push(root_uri);
        }

        drop(state);

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::FULL),
                        save: Some(TextDocumentSyncSaveOptions::Supported(true)),
                        ..Default::default()
                    },
                )),
                rename_provider: Some(OneOf::Right(RenameOptions {
                    prepare_provider: Some(true),
                    work_done_progress_options: Default::default(),
                })),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: String::from("sable"),
                version: Some(String::from(env!("CARGO_PKG_VERSION"))),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        log::info!("sable initialized");

        let folders: Vec<Url> = {
            let state = self.state.read().await;
            state.workspace_folders.clone()
        };

        // Scan without holding any lock; the walk hits the filesystem
        let files = tokio::task::spawn_blocking(move || collect_workspace_files(&folders))
            .await
            .unwrap_or_default();

        let total = files.len();
        let index = self.index.clone();
        let result = self
            .progress
            .with_tracked_progress("Indexing workspace", total, |reporter| async move {
                for (uri, text) in files {
                    index.insert(uri, &text);
                    reporter.add(1, None);
                }
                Ok(Outcome::Done(()))
            })
            .await;
        if let Err(err) = result {
            log::warn!("Workspace indexing failed: {:#}", err);
        }

        log::info!("Workspace initialization complete: {} files", self.index.len());
        self.client
            .log_message(
                MessageType::INFO,
                format!("sable: indexed {} workspace files", self.index.len()),
            )
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        log::info!("sable shutting down");
        self.renames.shutdown();
        Ok(())
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        let Some(overrides) = parse_dialect_overrides(&params.settings) else {
            return;
        };
        let mut dialects = self.dialects.write().unwrap();
        for (client, dialect) in overrides {
            log::info!("Dialect override: {} -> {:?}", client, dialect);
            dialects.insert(client, dialect);
        }
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let mut state = self.state.write().await;
        state.open_document(uri, &params.text_document.text, params.text_document.version);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        {
            let mut state = self.state.write().await;
            // FULL sync: the last change carries the whole document
            if let Some(change) = params.content_changes.into_iter().last() {
                state.update_document(uri.clone(), &change.text, params.text_document.version);
            }
        }

        self.route_rename_event(FileEvent::Changed(uri));
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;
        self.route_rename_event(FileEvent::Saved(uri.clone()));
        // Saved content is on disk; refresh the index (deferred mid-rename)
        self.gate.dispatch(Command::Reindex(uri));
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        {
            let mut state = self.state.write().await;
            state.close_document(&uri);
        }
        // The index takes over as the source of truth for this file
        self.gate.dispatch(Command::Reindex(uri));
    }

    async fn prepare_rename(
        &self,
        params: TextDocumentPositionParams,
    ) -> Result<Option<PrepareRenameResponse>> {
        let state = self.state.read().await;
        let Some(doc) = state.get_document(&params.text_document.uri) else {
            return Ok(None);
        };
        let text = doc.text();
        drop(state);

        Ok(self
            .engine
            .prepare(&text, params.position)
            .map(|(range, placeholder)| PrepareRenameResponse::RangeWithPlaceholder {
                range,
                placeholder,
            }))
    }

    async fn rename(&self, params: RenameParams) -> Result<Option<WorkspaceEdit>> {
        let uri = params.text_document_position.text_document.uri.clone();
        let position = params.text_document_position.position;
        let new_name = params.new_name;

        if self.renames.active() {
            return Err(Error::invalid_params("a rename is already in progress"));
        }

        let (docs, client_name) = {
            let state = self.state.read().await;
            (state.snapshot_documents(&self.index), state.client_name.clone())
        };

        let changes = self
            .engine
            .rename(&docs, &uri, position, &new_name)
            .map_err(|err| {
                log::warn!("Rename failed: {:#}", err);
                Error::invalid_params(format!("rename failed: {:#}", err))
            })?;

        // Gate engages before the edit is returned: everything the editor
        // does with it must not touch the index until the rename settles
        self.gate.start_buffering();

        let dialect = self.dialects.read().unwrap().classify(client_name.as_deref());
        let plan = build_plan(dialect, &changes);
        log::info!(
            "Renaming to '{}': {} files, {} expected events ({:?} dialect)",
            new_name,
            changes.len(),
            plan.expected.len(),
            dialect
        );

        let client_token = params
            .work_done_progress_params
            .work_done_token
            .map(ProgressToken::from_lsp);
        let token = match self
            .progress
            .begin(
                "Renaming",
                BeginOpts {
                    percentage: Some(0),
                    ref_name: Some("rename".to_string()),
                    token: client_token,
                    ..BeginOpts::default()
                },
            )
            .await
        {
            Ok(token) => token,
            Err(_) => ProgressToken::Noop,
        };

        let reporter = self.progress.tracked(token.clone(), plan.total_steps());
        let on_update: UpdateProgressFn = Arc::new(move |delta, message| {
            let message = if message.is_empty() { None } else { Some(message) };
            reporter.add(delta, message);
        });

        let progress = self.progress.clone();
        let gate = self.gate.clone();
        let complete_token = token.clone();
        let on_complete = Box::new(move || {
            gate.stop_buffering();
            tokio::spawn(async move {
                progress
                    .complete(complete_token, Some("Rename complete".to_string()))
                    .await;
            });
        });

        if let Err(err) = self.renames.start_renaming(
            plan.expected,
            plan.paths_to_reindex,
            plan.paths_to_delete,
            self.index.clone() as Arc<dyn IndexMutator>,
            on_update,
            on_complete,
        ) {
            // The gate belongs to the rename that won the slot; only its
            // completion continuation may disengage it
            self.progress.complete(token, None).await;
            return Err(Error::invalid_params(err.to_string()));
        }

        Ok(Some(workspace_edit(&changes)))
    }
}

/// Assemble the LSP workspace edit from the engine's change records.
///
/// Text edits come first so they apply against pre-rename URIs; file
/// operations follow.
fn workspace_edit(changes: &[crate::rename::ChangeRecord]) -> WorkspaceEdit {
    let mut operations: Vec<DocumentChangeOperation> = Vec::new();
    for record in changes {
        if record.edits.is_empty() {
            continue;
        }
        operations.push(DocumentChangeOperation::Edit(TextDocumentEdit {
            text_document: OptionalVersionedTextDocumentIdentifier {
                uri: record.uri.clone(),
                version: None,
            },
            edits: record
                .edits
                .iter()
                .map(|edit| OneOf::Left(edit.clone()))
                .collect(),
        }));
    }
    for record in changes {
        if let Some(mv) = &record.rename_file {
            operations.push(DocumentChangeOperation::Op(ResourceOp::Rename(RenameFile {
                old_uri: mv.old_uri.clone(),
                new_uri: mv.new_uri.clone(),
                options: None,
                annotation_id: None,
            })));
        }
    }

    WorkspaceEdit {
        changes: None,
        document_changes: Some(DocumentChanges::Operations(operations)),
        change_annotations: None,
    }
}

pub async fn start_lsp() -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(Backend::new);
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}
