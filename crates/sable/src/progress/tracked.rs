//
// progress/tracked.rs
//
// Percent-based progress aggregation for concurrent contributors
//

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{ProgressChannel, ProgressToken};

/// One increment from a contributor.
#[derive(Debug)]
struct Increment {
    add: usize,
    message: Option<String>,
}

/// Cloneable handle that feeds increments into a percent coordinator.
///
/// `add` is safe to call from any thread or task; the coordinator serializes
/// increments, so concurrent contributors never lose updates. Once the
/// coordinator is torn down, further increments are silently dropped,
/// mirroring report semantics for closed sequences.
#[derive(Clone)]
pub struct TrackedReporter {
    tx: mpsc::UnboundedSender<Increment>,
}

impl TrackedReporter {
    pub fn add(&self, add: usize, message: Option<&str>) {
        let _ = self.tx.send(Increment {
            add,
            message: message.map(|m| m.to_string()),
        });
    }
}

/// Recompute the running percentage, clamped to 100.
fn percent(current: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    ((current * 100 / total).min(100)) as u32
}

/// Spawn a coordinator task that turns a stream of increments into
/// percentage reports on `token`. The task drains its queue and exits when
/// the last reporter clone is dropped.
pub(super) fn spawn_coordinator(
    channel: Arc<ProgressChannel>,
    token: ProgressToken,
    total: usize,
) -> (TrackedReporter, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Increment>();

    let coordinator = tokio::spawn(async move {
        let mut current = 0usize;
        while let Some(inc) = rx.recv().await {
            current += inc.add;
            channel
                .report(token.clone(), inc.message, Some(percent(current, total)))
                .await;
        }
        log::trace!("Percent coordinator finished at {}/{}", current, total);
    });

    (TrackedReporter { tx }, coordinator)
}
