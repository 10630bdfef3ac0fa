//
// rename/tracker.rs
//
// Rename completion tracking: consumes the editor's post-rename file events
// and reconciles the workspace index once every expectation is satisfied.
//

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::Url;

use crate::workspace_index::IndexMutator;

use super::{ExpectedOperation, FileEvent};

/// Progress callback invoked with (delta, message) for each consumed
/// expectation and each reconciliation step.
pub type UpdateProgressFn = Arc<dyn Fn(usize, &str) + Send + Sync>;

/// Completion callback, invoked exactly once after reconciliation.
pub type CompleteFn = Box<dyn FnOnce() + Send>;

/// Handle to a live tracker actor.
///
/// The actor owns all tracker state; the handle only injects events and
/// observes lifecycle. Dropping the handle without cancellation lets an
/// in-flight rename settle on its own.
pub struct TrackerHandle {
    events: mpsc::UnboundedSender<FileEvent>,
    in_progress: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TrackerHandle {
    /// True iff the tracker is still awaiting file events.
    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// True while the actor task is alive (Awaiting or Reconciling).
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Inject a file event. Fails only once the actor has terminated.
    pub fn deliver(&self, event: FileEvent) -> Result<(), FileEvent> {
        self.events.send(event).map_err(|e| e.0)
    }

    /// Abandon the rename without reconciling. Used on server shutdown;
    /// reindexing against unknown file state is worse than a stale index.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the actor to terminate. Test and integration helper.
    pub async fn wait(self) {
        let _ = self.task.await;
    }
}

/// Spawn a rename completion tracker.
///
/// The actor processes events strictly in arrival order. An event that
/// exactly matches the expected operation for its URI removes that entry and
/// emits one progress increment; anything else is a deliberate no-op so that
/// an editor emitting unexpected event orderings cannot corrupt the state.
/// Reaching an empty expectation map is a one-way transition: the actor
/// reconciles, fires `on_complete`, and exits normally. It is never
/// restarted; a crash mid-reconciliation surfaces in the logs instead of
/// risking a double reindex against unknown file state.
pub fn spawn(
    expected: IndexMap<Url, ExpectedOperation>,
    paths_to_reindex: Vec<Url>,
    paths_to_delete: Vec<Url>,
    index: Arc<dyn IndexMutator>,
    on_update_progress: UpdateProgressFn,
    on_complete: CompleteFn,
) -> TrackerHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<FileEvent>();
    let in_progress = Arc::new(AtomicBool::new(!expected.is_empty()));
    let cancel = CancellationToken::new();

    let task_in_progress = in_progress.clone();
    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        let mut expected = expected;

        while !expected.is_empty() {
            tokio::select! {
                _ = task_cancel.cancelled() => {
                    task_in_progress.store(false, Ordering::SeqCst);
                    log::info!(
                        "Rename tracker cancelled with {} expectations outstanding",
                        expected.len()
                    );
                    return;
                }
                event = rx.recv() => {
                    let Some(event) = event else {
                        task_in_progress.store(false, Ordering::SeqCst);
                        log::warn!(
                            "Rename event channel closed with {} expectations outstanding",
                            expected.len()
                        );
                        return;
                    };
                    let (uri, kind) = event.into_parts();
                    match expected.get(&uri) {
                        Some(want) if *want == kind => {
                            expected.shift_remove(&uri);
                            on_update_progress(1, "");
                            log::trace!(
                                "Observed {:?} for {}; {} expectations remaining",
                                kind,
                                uri,
                                expected.len()
                            );
                        }
                        _ => {
                            log::trace!("Ignoring unexpected file event {:?} for {}", kind, uri);
                        }
                    }
                }
            }
        }

        task_in_progress.store(false, Ordering::SeqCst);
        reconcile(
            index.as_ref(),
            &paths_to_reindex,
            &paths_to_delete,
            &on_update_progress,
        );
        on_complete();
        log::debug!("Rename settled; tracker terminating");
    });

    TrackerHandle {
        events: tx,
        in_progress,
        cancel,
        task,
    }
}

/// Apply the rename's index side effects: refresh every surviving path, then
/// purge every pre-rename path. Best-effort cleanup, not a transactional
/// commit: failures are logged and never retried or rolled back.
fn reconcile(
    index: &dyn IndexMutator,
    paths_to_reindex: &[Url],
    paths_to_delete: &[Url],
    on_update_progress: &UpdateProgressFn,
) {
    for uri in paths_to_reindex {
        if let Err(err) = index.reindex(uri) {
            log::warn!("Failed to reindex {}: {:#}", uri, err);
        }
        on_update_progress(1, "reindexing");
    }
    for uri in paths_to_delete {
        index.clear(uri);
        on_update_progress(1, "deleting old index");
    }
}
