//
// workspace_index.rs
//
// Workspace index of Sable modules for closed files
//

use std::fs;

use anyhow::anyhow;
use dashmap::DashMap;
use ropey::Rope;
use url::Url;
use walkdir::WalkDir;

/// Entry in the workspace index.
#[derive(Clone)]
pub struct IndexEntry {
    /// File content as a rope for efficient access
    pub contents: Rope,
    /// Modules defined in this file
    pub modules: Vec<String>,
}

/// Mutation boundary the rename completion tracker reconciles against.
///
/// Both operations are idempotent from the tracker's perspective: the
/// tracker logs failures and moves on, it never retries.
pub trait IndexMutator: Send + Sync {
    /// Refresh the index entry for `uri` from its on-disk content.
    fn reindex(&self, uri: &Url) -> anyhow::Result<()>;
    /// Purge the index entry for `uri` (the pre-rename path of a moved file).
    fn clear(&self, uri: &Url);
}

/// Concurrent URI-to-entry index of workspace files.
///
/// Open documents are authoritative over this index; callers consult the
/// document store first (see `WorldState::snapshot_documents`).
pub struct WorkspaceIndex {
    inner: DashMap<Url, IndexEntry>,
}

impl WorkspaceIndex {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.inner.contains_key(uri)
    }

    pub fn get(&self, uri: &Url) -> Option<IndexEntry> {
        self.inner.get(uri).map(|entry| entry.clone())
    }

    pub fn uris(&self) -> Vec<Url> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn insert(&self, uri: Url, text: &str) {
        let entry = IndexEntry {
            contents: Rope::from_str(text),
            modules: extract_modules(text),
        };
        self.inner.insert(uri, entry);
    }
}

impl Default for WorkspaceIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexMutator for WorkspaceIndex {
    fn reindex(&self, uri: &Url) -> anyhow::Result<()> {
        let path = uri
            .to_file_path()
            .map_err(|_| anyhow!("not a file path: {}", uri))?;
        let text = fs::read_to_string(&path)?;
        self.insert(uri.clone(), &text);
        log::trace!("Reindexed {}", uri);
        Ok(())
    }

    fn clear(&self, uri: &Url) {
        if self.inner.remove(uri).is_some() {
            log::trace!("Cleared index entry for {}", uri);
        }
    }
}

/// Extract module names declared at the top level of a Sable source file.
///
/// Sable declares modules with `module Dotted.Name`; nesting is irrelevant
/// for indexing purposes, so every declaration line counts.
pub fn extract_modules(text: &str) -> Vec<String> {
    let mut modules = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("module ") {
            let name: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
                .collect();
            if name.chars().next().map(|c| c.is_uppercase()).unwrap_or(false)
                && !modules.contains(&name)
            {
                modules.push(name);
            }
        }
    }
    modules
}

/// Collect all Sable source files under the given workspace folders.
///
/// Runs without holding any locks; the caller applies the results. Symlink
/// cycles are handled by walkdir.
pub fn collect_workspace_files(folders: &[Url]) -> Vec<(Url, String)> {
    let mut files = Vec::new();
    for folder in folders {
        let Ok(root) = folder.to_file_path() else {
            log::warn!("Skipping non-file workspace folder: {}", folder);
            continue;
        };
        log::info!("Scanning folder: {}", folder);
        for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_sable = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("sbl"))
                .unwrap_or(false);
            if !is_sable {
                continue;
            }
            if let Ok(text) = fs::read_to_string(path) {
                if let Ok(uri) = Url::from_file_path(path) {
                    files.push((uri, text));
                }
            }
        }
    }
    log::info!("Collected {} workspace files", files.len());
    files
}
