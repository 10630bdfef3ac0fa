//
// rename_flow.rs
//
// End-to-end rename orchestration: engine output through plan construction,
// completion tracking, index reconciliation, and progress reporting.
//

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tower_lsp::lsp_types::{Position, Url, WorkDoneProgress};

use sable::buffering::{Command, CommandGate};
use sable::progress::{BeginOpts, ProgressChannel, ProgressToken, ProgressTransport};
use sable::rename::{
    build_plan, EditorDialect, FileEvent, RenameCoordinator, RenameEngine, TextualRenameEngine,
    UpdateProgressFn,
};
use sable::workspace_index::{IndexMutator, WorkspaceIndex};

/// Transport that records notifications instead of talking to an editor.
struct RecordingTransport {
    events: Mutex<Vec<(ProgressToken, WorkDoneProgress)>>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    fn events(&self) -> Vec<(ProgressToken, WorkDoneProgress)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressTransport for RecordingTransport {
    fn client_supports(&self) -> bool {
        true
    }

    async fn create(&self, _token: &ProgressToken) -> anyhow::Result<()> {
        Ok(())
    }

    async fn notify(&self, token: &ProgressToken, value: WorkDoneProgress) {
        self.events.lock().unwrap().push((token.clone(), value));
    }
}

async fn settle(coordinator: &Arc<RenameCoordinator>) {
    let mut spins = 0;
    while coordinator.active() {
        tokio::task::yield_now().await;
        spins += 1;
        assert!(spins < 1000, "rename did not settle");
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test]
async fn module_rename_settles_and_reconciles_index() {
    let dir = tempfile::tempdir().unwrap();
    let user_path = dir.path().join("user.sbl");
    let caller_path = dir.path().join("caller.sbl");
    std::fs::write(&user_path, "module Accounts.User\n").unwrap();
    std::fs::write(&caller_path, "module App\n  Accounts.User.find(1)\n").unwrap();

    let user_uri = Url::from_file_path(&user_path).unwrap();
    let caller_uri = Url::from_file_path(&caller_path).unwrap();

    let index = Arc::new(WorkspaceIndex::new());
    index.insert(user_uri.clone(), "module Accounts.User\n");
    index.insert(caller_uri.clone(), "module App\n  Accounts.User.find(1)\n");

    // Engine: compute the edits and the file rename
    let docs = vec![
        (user_uri.clone(), "module Accounts.User\n".to_string()),
        (
            caller_uri.clone(),
            "module App\n  Accounts.User.find(1)\n".to_string(),
        ),
    ];
    let engine = TextualRenameEngine::new();
    let changes = engine
        .rename(
            &docs,
            &user_uri,
            Position {
                line: 0,
                character: 10,
            },
            "Accounts.Person",
        )
        .unwrap();
    let person_uri = changes
        .iter()
        .find_map(|r| r.rename_file.as_ref())
        .expect("file rename expected")
        .new_uri
        .clone();

    // Plan for an auto-saving editor: change on old URI, save on new, save
    // on the edited caller
    let plan = build_plan(EditorDialect::AutoSave, &changes);
    assert_eq!(plan.expected.len(), 3);

    let transport = Arc::new(RecordingTransport::new());
    let progress = Arc::new(ProgressChannel::new(
        transport.clone() as Arc<dyn ProgressTransport>
    ));
    let gate = Arc::new(CommandGate::new(index.clone() as Arc<dyn IndexMutator>));
    let coordinator = Arc::new(RenameCoordinator::new());

    gate.start_buffering();

    let token = progress
        .begin(
            "Renaming",
            BeginOpts {
                percentage: Some(0),
                ..BeginOpts::default()
            },
        )
        .await
        .unwrap();
    let reporter = progress.tracked(token.clone(), plan.total_steps());
    let on_update: UpdateProgressFn = Arc::new(move |delta, message| {
        let message = if message.is_empty() { None } else { Some(message) };
        reporter.add(delta, message);
    });

    let complete_gate = gate.clone();
    coordinator
        .start_renaming(
            plan.expected,
            plan.paths_to_reindex,
            plan.paths_to_delete,
            index.clone() as Arc<dyn IndexMutator>,
            on_update,
            Box::new(move || {
                complete_gate.stop_buffering();
            }),
        )
        .unwrap();
    assert!(coordinator.in_progress());

    // Mid-rename saves are deferred, not applied
    gate.dispatch(Command::Reindex(caller_uri.clone()));
    assert_eq!(
        index.get(&caller_uri).unwrap().modules,
        vec!["App".to_string()]
    );

    // The editor applies the workspace edit: contents change, the file moves
    let person_path = person_uri.to_file_path().unwrap();
    std::fs::write(&person_path, "module Accounts.Person\n").unwrap();
    std::fs::remove_file(&user_path).unwrap();
    std::fs::write(&caller_path, "module App\n  Accounts.Person.find(1)\n").unwrap();

    // Post-edit notifications arrive, out of order relative to the plan
    coordinator
        .update_progress(FileEvent::Saved(caller_uri.clone()))
        .unwrap();
    coordinator
        .update_progress(FileEvent::Changed(user_uri.clone()))
        .unwrap();
    coordinator
        .update_progress(FileEvent::Saved(person_uri.clone()))
        .unwrap();

    settle(&coordinator).await;

    // Index reflects the post-rename world
    assert!(!index.contains(&user_uri), "old URI purged");
    assert_eq!(
        index.get(&person_uri).unwrap().modules,
        vec!["Accounts.Person".to_string()]
    );
    assert_eq!(
        index.get(&caller_uri).unwrap().modules,
        vec!["App".to_string()]
    );

    // Gate disengaged; subsequent dispatches apply immediately
    assert!(!gate.is_buffering());

    // The tracker task dropped its reporter, so the percent coordinator
    // drains its queue and exits; wait for the final report
    let percentages = |events: &[(ProgressToken, WorkDoneProgress)]| -> Vec<u32> {
        events
            .iter()
            .filter_map(|(_, v)| match v {
                WorkDoneProgress::Report(r) => r.percentage,
                _ => None,
            })
            .collect()
    };
    let mut spins = 0;
    while percentages(&transport.events()).last() != Some(&100) {
        tokio::time::sleep(Duration::from_millis(1)).await;
        spins += 1;
        assert!(spins < 1000, "progress reports did not drain");
    }

    progress
        .complete(token, Some("Rename complete".to_string()))
        .await;

    // Progress ran begin, ascending percentage reports, then end
    let events = transport.events();
    assert!(matches!(events.first().unwrap().1, WorkDoneProgress::Begin(_)));
    let reported = percentages(&events);
    assert!(reported.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(reported.last(), Some(&100));
    assert!(matches!(
        events.last().unwrap().1,
        WorkDoneProgress::End(_)
    ));

    // A fresh rename can start now
    assert!(!coordinator.active());
}

#[tokio::test]
async fn second_rename_rejected_while_first_settles() {
    let index = Arc::new(WorkspaceIndex::new());
    let gate = Arc::new(CommandGate::new(index.clone() as Arc<dyn IndexMutator>));
    let coordinator = Arc::new(RenameCoordinator::new());
    let uri = Url::parse("file:///test/a.sbl").unwrap();

    gate.start_buffering();
    let mut expected = indexmap::IndexMap::new();
    expected.insert(uri.clone(), sable::rename::ExpectedOperation::Saved);
    let complete_gate = gate.clone();
    coordinator
        .start_renaming(
            expected.clone(),
            vec![],
            vec![],
            index.clone() as Arc<dyn IndexMutator>,
            Arc::new(|_, _| {}),
            Box::new(move || complete_gate.stop_buffering()),
        )
        .unwrap();

    // A racing second rename re-engages the (idempotent) gate, then loses
    // the tracker slot
    gate.start_buffering();
    let second = coordinator.start_renaming(
        expected,
        vec![],
        vec![],
        index.clone() as Arc<dyn IndexMutator>,
        Arc::new(|_, _| {}),
        Box::new(|| {}),
    );
    assert!(second.is_err());

    // The loser must not disengage the gate out from under the winner;
    // commands stay deferred until the first rename settles
    assert!(gate.is_buffering());
    gate.dispatch(Command::Reindex(uri.clone()));

    coordinator
        .update_progress(FileEvent::Saved(uri.clone()))
        .unwrap();
    settle(&coordinator).await;

    // Only the winner's completion continuation disengages the gate
    assert!(!gate.is_buffering());
}
