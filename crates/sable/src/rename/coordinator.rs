//
// rename/coordinator.rs
//
// Single-slot supervision of the rename completion tracker
//

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexMap;
use tower_lsp::lsp_types::Url;

use crate::workspace_index::IndexMutator;

use super::tracker::{self, CompleteFn, TrackerHandle, UpdateProgressFn};
use super::{ExpectedOperation, FileEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameError {
    /// A previous rename has not finished settling. Concurrent trackers
    /// against one event stream have no defined merge semantics, so the
    /// second request is rejected outright.
    AlreadyInProgress,
    /// A file event arrived while no rename was being tracked. Callers log
    /// and drop the event; normal document handling continues.
    NotInRenameProgress,
}

impl fmt::Display for RenameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenameError::AlreadyInProgress => write!(f, "a rename is already in progress"),
            RenameError::NotInRenameProgress => write!(f, "no rename is in progress"),
        }
    }
}

impl std::error::Error for RenameError {}

/// Owns at most one live rename tracker at a time.
///
/// The slot is cleared from the tracker's completion continuation, and
/// lazily when event delivery finds the actor gone (cancellation, crash).
#[derive(Default)]
pub struct RenameCoordinator {
    slot: Mutex<Option<TrackerHandle>>,
}

impl RenameCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a rename's completion.
    ///
    /// Spawns a tracker seeded with the expectation map and reconciliation
    /// lists. `on_complete` runs exactly once, after the slot has been
    /// cleared, so a follow-up rename can start from inside the continuation.
    pub fn start_renaming(
        self: &Arc<Self>,
        expected: IndexMap<Url, ExpectedOperation>,
        paths_to_reindex: Vec<Url>,
        paths_to_delete: Vec<Url>,
        index: Arc<dyn IndexMutator>,
        on_update_progress: UpdateProgressFn,
        on_complete: CompleteFn,
    ) -> Result<(), RenameError> {
        let mut slot = self.slot.lock().unwrap();
        if let Some(handle) = slot.as_ref() {
            if handle.is_active() {
                return Err(RenameError::AlreadyInProgress);
            }
        }

        let coordinator: Weak<Self> = Arc::downgrade(self);
        let on_complete: CompleteFn = Box::new(move || {
            if let Some(coordinator) = coordinator.upgrade() {
                coordinator.slot.lock().unwrap().take();
            }
            on_complete();
        });

        let handle = tracker::spawn(
            expected,
            paths_to_reindex,
            paths_to_delete,
            index,
            on_update_progress,
            on_complete,
        );
        *slot = Some(handle);
        Ok(())
    }

    /// Route a file event into the active tracker.
    pub fn update_progress(&self, event: FileEvent) -> Result<(), RenameError> {
        let mut slot = self.slot.lock().unwrap();
        match slot.as_ref() {
            None => Err(RenameError::NotInRenameProgress),
            Some(handle) => match handle.deliver(event) {
                Ok(()) => Ok(()),
                Err(_) => {
                    // The actor terminated without clearing the slot
                    slot.take();
                    Err(RenameError::NotInRenameProgress)
                }
            },
        }
    }

    /// True iff a tracker exists and is still awaiting file events.
    pub fn in_progress(&self) -> bool {
        self.slot
            .lock()
            .unwrap()
            .as_ref()
            .map(|handle| handle.in_progress())
            .unwrap_or(false)
    }

    /// True while a tracker actor is alive (Awaiting or Reconciling).
    pub fn active(&self) -> bool {
        self.slot
            .lock()
            .unwrap()
            .as_ref()
            .map(|handle| handle.is_active())
            .unwrap_or(false)
    }

    /// Abandon any in-flight rename. Server shutdown only.
    pub fn shutdown(&self) {
        if let Some(handle) = self.slot.lock().unwrap().take() {
            handle.cancel();
        }
    }
}
