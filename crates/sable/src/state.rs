//
// state.rs
//
// Mutable server state: open documents, workspace folders, client identity
//

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use ropey::Rope;
use url::Url;

use crate::workspace_index::{extract_modules, WorkspaceIndex};

/// An open text document, full-sync only.
#[derive(Clone)]
pub struct Document {
    pub contents: Rope,
    pub version: i32,
    pub modules: Vec<String>,
}

impl Document {
    pub fn new(text: &str, version: i32) -> Self {
        Self {
            contents: Rope::from_str(text),
            version,
            modules: extract_modules(text),
        }
    }

    /// Replace the entire content. The server advertises FULL sync, so every
    /// change notification carries the whole document.
    pub fn replace(&mut self, text: &str, version: i32) {
        self.contents = Rope::from_str(text);
        self.version = version;
        self.modules = extract_modules(text);
    }

    pub fn text(&self) -> String {
        self.contents.to_string()
    }
}

/// Everything the backend mutates under its RwLock.
#[derive(Default)]
pub struct WorldState {
    pub documents: HashMap<Url, Document>,
    pub workspace_folders: Vec<Url>,
    /// Client name from `initialize`, used for dialect classification
    pub client_name: Option<String>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_document(&mut self, uri: Url, text: &str, version: i32) {
        self.documents.insert(uri, Document::new(text, version));
    }

    /// Full-content update; opens the document if it was not tracked yet.
    pub fn update_document(&mut self, uri: Url, text: &str, version: i32) {
        match self.documents.entry(uri) {
            Entry::Occupied(mut entry) => entry.get_mut().replace(text, version),
            Entry::Vacant(entry) => {
                entry.insert(Document::new(text, version));
            }
        }
    }

    pub fn close_document(&mut self, uri: &Url) {
        self.documents.remove(uri);
    }

    pub fn get_document(&self, uri: &Url) -> Option<&Document> {
        self.documents.get(uri)
    }

    /// Full content snapshot of the workspace for the rename engine.
    ///
    /// Open documents are authoritative; the index contributes only files
    /// with no open buffer.
    pub fn snapshot_documents(&self, index: &WorkspaceIndex) -> Vec<(Url, String)> {
        let mut docs: Vec<(Url, String)> = self
            .documents
            .iter()
            .map(|(uri, doc)| (uri.clone(), doc.text()))
            .collect();
        for uri in index.uris() {
            if !self.documents.contains_key(&uri) {
                if let Some(entry) = index.get(&uri) {
                    docs.push((uri, entry.contents.to_string()));
                }
            }
        }
        docs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_uri(name: &str) -> Url {
        Url::parse(&format!("file:///test/{}", name)).unwrap()
    }

    #[test]
    fn test_document_replace_reextracts_modules() {
        let mut doc = Document::new("module Accounts.User\n", 1);
        assert_eq!(doc.modules, vec!["Accounts.User".to_string()]);

        doc.replace("module Accounts.Person\n", 2);
        assert_eq!(doc.version, 2);
        assert_eq!(doc.modules, vec!["Accounts.Person".to_string()]);
    }

    #[test]
    fn test_open_and_close() {
        let mut state = WorldState::new();
        let uri = test_uri("user.sbl");

        state.open_document(uri.clone(), "module User\n", 1);
        assert!(state.get_document(&uri).is_some());

        state.close_document(&uri);
        assert!(state.get_document(&uri).is_none());
    }

    #[test]
    fn test_update_document_upserts() {
        let mut state = WorldState::new();
        let uri = test_uri("user.sbl");

        // A change notification for an untracked document opens it
        state.update_document(uri.clone(), "module User\n", 1);
        assert_eq!(state.get_document(&uri).unwrap().version, 1);

        state.update_document(uri.clone(), "module Person\n", 2);
        let doc = state.get_document(&uri).unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.modules, vec!["Person".to_string()]);
    }

    #[test]
    fn test_snapshot_prefers_open_documents() {
        let mut state = WorldState::new();
        let index = WorkspaceIndex::new();
        let open = test_uri("open.sbl");
        let closed = test_uri("closed.sbl");

        index.insert(open.clone(), "module Stale\n");
        index.insert(closed.clone(), "module Closed\n");
        state.open_document(open.clone(), "module Fresh\n", 3);

        let snapshot = state.snapshot_documents(&index);
        assert_eq!(snapshot.len(), 2);
        let open_text = &snapshot.iter().find(|(u, _)| *u == open).unwrap().1;
        assert_eq!(open_text, "module Fresh\n");
        let closed_text = &snapshot.iter().find(|(u, _)| *u == closed).unwrap().1;
        assert_eq!(closed_text, "module Closed\n");
    }
}
