//
// rename/dialect.rs
//
// Editor-dialect classification: which file events a rename will produce
//

use std::collections::HashMap;

use indexmap::IndexMap;
use tower_lsp::lsp_types::Url;

use super::{ChangeRecord, ExpectedOperation};

/// How an editor reports the file effects of an applied rename.
///
/// Editors disagree about what arrives after a workspace edit: some persist
/// inline edits automatically and surface the file rename distinctly, others
/// leave buffers dirty until the user saves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorDialect {
    /// Auto-saving editors: a renamed file produces a change notification on
    /// the old URI and a save on the new one; a merely edited file is saved
    /// in place.
    AutoSave,
    /// Editors that do not auto-save, and the fallback for unknown clients:
    /// a renamed file only ever surfaces a save on the new URI; a merely
    /// edited file produces a change with no guaranteed save.
    Manual,
}

/// Injectable mapping from client identity to dialect.
///
/// Which editors share AutoSave semantics is an empirical question, so the
/// table is configuration, not a hardcoded branch.
#[derive(Debug, Clone)]
pub struct DialectTable {
    clients: HashMap<String, EditorDialect>,
}

impl Default for DialectTable {
    fn default() -> Self {
        let mut clients = HashMap::new();
        clients.insert("Visual Studio Code".to_string(), EditorDialect::AutoSave);
        clients.insert("Zed".to_string(), EditorDialect::AutoSave);
        Self { clients }
    }
}

impl DialectTable {
    pub fn empty() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    pub fn insert(&mut self, client_name: impl Into<String>, dialect: EditorDialect) {
        self.clients.insert(client_name.into(), dialect);
    }

    /// Unrecognized or absent client identities fall back to Manual.
    pub fn classify(&self, client_name: Option<&str>) -> EditorDialect {
        client_name
            .and_then(|name| self.clients.get(name).copied())
            .unwrap_or(EditorDialect::Manual)
    }
}

/// Everything the completion tracker needs to settle one rename.
#[derive(Debug, Clone, Default)]
pub struct RenamePlan {
    /// URI to the file event that must be observed before the rename settles
    pub expected: IndexMap<Url, ExpectedOperation>,
    /// Index entries to refresh once settled (post-rename URIs)
    pub paths_to_reindex: Vec<Url>,
    /// Index entries to purge once settled (pre-rename URIs of moved files)
    pub paths_to_delete: Vec<Url>,
}

impl RenamePlan {
    /// Total number of progress steps the rename will report.
    pub fn total_steps(&self) -> usize {
        self.expected.len() + self.paths_to_reindex.len() + self.paths_to_delete.len()
    }
}

/// Derive the expectation map and reconciliation lists from a rename's
/// change records. Pure: a fixed dialect and fixed records always produce
/// the same plan, in record order.
pub fn build_plan(dialect: EditorDialect, changes: &[ChangeRecord]) -> RenamePlan {
    let mut plan = RenamePlan::default();
    for record in changes {
        match (&record.rename_file, dialect) {
            (Some(mv), EditorDialect::AutoSave) => {
                // The edit notification lands on the old URI before the file
                // operation completes; the save arrives on the new path only.
                plan.expected
                    .insert(mv.old_uri.clone(), ExpectedOperation::Changed);
                plan.expected
                    .insert(mv.new_uri.clone(), ExpectedOperation::Saved);
                plan.paths_to_reindex.push(mv.new_uri.clone());
                plan.paths_to_delete.push(mv.old_uri.clone());
            }
            (Some(mv), EditorDialect::Manual) => {
                // The old URI is never revisited.
                plan.expected
                    .insert(mv.new_uri.clone(), ExpectedOperation::Saved);
                plan.paths_to_reindex.push(mv.new_uri.clone());
                plan.paths_to_delete.push(mv.old_uri.clone());
            }
            (None, EditorDialect::AutoSave) => {
                plan.expected
                    .insert(record.uri.clone(), ExpectedOperation::Saved);
                plan.paths_to_reindex.push(record.uri.clone());
            }
            (None, EditorDialect::Manual) => {
                plan.expected
                    .insert(record.uri.clone(), ExpectedOperation::Changed);
                plan.paths_to_reindex.push(record.uri.clone());
            }
        }
    }
    plan
}
