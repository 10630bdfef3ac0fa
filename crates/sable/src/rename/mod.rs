//
// rename/mod.rs
//
// Shared types for the rename orchestration subsystem.
//

use tower_lsp::lsp_types::{Range, TextEdit, Url};

pub mod coordinator;
pub mod dialect;
pub mod engine;
pub mod tracker;

pub use coordinator::{RenameCoordinator, RenameError};
pub use dialect::{build_plan, DialectTable, EditorDialect, RenamePlan};
pub use engine::{RenameEngine, TextualRenameEngine};
pub use tracker::{CompleteFn, TrackerHandle, UpdateProgressFn};

/// A file event observed after the editor applies a rename's workspace edit.
///
/// Injected into the completion tracker via
/// [`RenameCoordinator::update_progress`]; outside of a rename these events
/// follow the normal document lifecycle paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileEvent {
    Changed(Url),
    Saved(Url),
}

impl FileEvent {
    pub fn uri(&self) -> &Url {
        match self {
            FileEvent::Changed(uri) | FileEvent::Saved(uri) => uri,
        }
    }

    pub fn kind(&self) -> ExpectedOperation {
        match self {
            FileEvent::Changed(_) => ExpectedOperation::Changed,
            FileEvent::Saved(_) => ExpectedOperation::Saved,
        }
    }

    pub fn into_parts(self) -> (Url, ExpectedOperation) {
        let kind = self.kind();
        match self {
            FileEvent::Changed(uri) | FileEvent::Saved(uri) => (uri, kind),
        }
    }
}

/// The event kind that must be observed for a URI before a rename is
/// considered settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedOperation {
    Changed,
    Saved,
}

/// Old/new URI pair recorded when a rename moves a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameFileRecord {
    pub old_uri: Url,
    pub new_uri: Url,
}

/// Per-file output of the rename engine: the text edits for one document
/// plus an optional file rename. This is the engine's entire output
/// contract; how the edits were computed is the compiler's business.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub uri: Url,
    pub edits: Vec<TextEdit>,
    pub rename_file: Option<RenameFileRecord>,
}

/// A single renamed occurrence of a code entity.
///
/// `edit_range` is the sub-range actually replaced by the new name and may
/// differ from `node_range`, e.g. when only the last segment of a dotted
/// module path changes.
#[derive(Debug, Clone)]
pub struct RenameEntry {
    pub id: u64,
    pub path: Url,
    pub subject: String,
    pub block_range: Option<Range>,
    pub node_range: Range,
    pub edit_range: Range,
}
