//
// progress/mod.rs
//
// Token-addressed progress notifications over window/workDoneProgress
//

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tower_lsp::lsp_types::notification::Progress;
use tower_lsp::lsp_types::request::WorkDoneProgressCreate;
use tower_lsp::lsp_types::{
    NumberOrString, ProgressParams, ProgressParamsValue, WorkDoneProgress, WorkDoneProgressBegin,
    WorkDoneProgressCreateParams, WorkDoneProgressEnd, WorkDoneProgressReport,
};
use tower_lsp::Client;

pub mod tracked;

pub use tracked::TrackedReporter;

/// Handle identifying one open progress notification sequence.
///
/// Server-minted tokens are positive integers, unique for the process
/// lifetime. Client-supplied tokens are opaque. `Noop` is the sentinel for
/// "client lacks work-done-progress support; do nothing".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProgressToken {
    Number(i32),
    Text(String),
    Noop,
}

impl ProgressToken {
    pub fn is_noop(&self) -> bool {
        matches!(self, ProgressToken::Noop)
    }

    pub fn from_lsp(token: NumberOrString) -> Self {
        match token {
            NumberOrString::Number(n) => ProgressToken::Number(n),
            NumberOrString::String(s) => ProgressToken::Text(s),
        }
    }

    fn to_lsp(&self) -> Option<NumberOrString> {
        match self {
            ProgressToken::Number(n) => Some(NumberOrString::Number(*n)),
            ProgressToken::Text(s) => Some(NumberOrString::String(s.clone())),
            ProgressToken::Noop => None,
        }
    }
}

/// Address of an in-flight sequence: the token itself, or the symbolic ref
/// it was registered under.
#[derive(Debug, Clone)]
pub enum ProgressKey {
    Token(ProgressToken),
    Ref(String),
}

impl From<ProgressToken> for ProgressKey {
    fn from(token: ProgressToken) -> Self {
        ProgressKey::Token(token)
    }
}

impl From<&str> for ProgressKey {
    fn from(name: &str) -> Self {
        ProgressKey::Ref(name.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressError {
    /// The editor declined the token creation handshake. Callers proceed
    /// without visual progress; the wrapped operation still runs.
    Rejected,
}

impl fmt::Display for ProgressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressError::Rejected => write!(f, "progress creation rejected by client"),
        }
    }
}

impl std::error::Error for ProgressError {}

/// Voluntary outcome of a `with_progress` work function.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    Done(T),
    /// The work chose to stop early; `complete` still runs, with a
    /// "Cancelled" message. Nothing preempts in-flight work.
    Cancelled(T),
}

/// Options for `begin`.
#[derive(Debug, Clone, Default)]
pub struct BeginOpts {
    pub message: Option<String>,
    pub percentage: Option<u32>,
    pub cancellable: Option<bool>,
    /// Symbolic alias for addressing this sequence later.
    pub ref_name: Option<String>,
    /// Client-supplied token; skips the creation handshake entirely.
    pub token: Option<ProgressToken>,
}

/// Outbound progress transport: the editor-facing notification sink.
#[async_trait]
pub trait ProgressTransport: Send + Sync {
    /// Whether the client advertised `window.workDoneProgress`.
    fn client_supports(&self) -> bool;
    /// Round-trip token creation handshake; Err means the editor declined.
    async fn create(&self, token: &ProgressToken) -> anyhow::Result<()>;
    async fn notify(&self, token: &ProgressToken, value: WorkDoneProgress);
}

/// Production transport over the tower-lsp client.
pub struct ClientTransport {
    client: Client,
    supported: AtomicBool,
}

impl ClientTransport {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            supported: AtomicBool::new(false),
        }
    }

    /// Recorded from the initialize request's window capabilities.
    pub fn set_supported(&self, supported: bool) {
        self.supported.store(supported, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProgressTransport for ClientTransport {
    fn client_supports(&self) -> bool {
        self.supported.load(Ordering::SeqCst)
    }

    async fn create(&self, token: &ProgressToken) -> anyhow::Result<()> {
        let Some(token) = token.to_lsp() else {
            return Ok(());
        };
        self.client
            .send_request::<WorkDoneProgressCreate>(WorkDoneProgressCreateParams { token })
            .await
            .map_err(|e| anyhow::anyhow!("workDoneProgress/create rejected: {}", e))
    }

    async fn notify(&self, token: &ProgressToken, value: WorkDoneProgress) {
        let Some(token) = token.to_lsp() else {
            return;
        };
        self.client
            .send_notification::<Progress>(ProgressParams {
                token,
                value: ProgressParamsValue::WorkDone(value),
            })
            .await;
    }
}

/// Progress channel with an explicitly owned registry.
///
/// The active set and ref map live on the channel instance and are passed by
/// reference to whoever needs them; there is no process-global token state,
/// so independent test instances never interfere.
pub struct ProgressChannel {
    transport: Arc<dyn ProgressTransport>,
    next_token: AtomicI32,
    active: DashSet<ProgressToken>,
    refs: DashMap<String, ProgressToken>,
}

impl ProgressChannel {
    pub fn new(transport: Arc<dyn ProgressTransport>) -> Self {
        Self {
            transport,
            next_token: AtomicI32::new(0),
            active: DashSet::new(),
            refs: DashMap::new(),
        }
    }

    fn mint(&self) -> ProgressToken {
        ProgressToken::Number(self.next_token.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Add a token directly to the active set, without a preceding `begin`.
    /// This is the client-initiated case: the editor minted the token, so no
    /// creation handshake happens on our side.
    pub fn register(&self, token: ProgressToken, ref_name: Option<String>) {
        if token.is_noop() {
            return;
        }
        if let Some(name) = ref_name {
            self.refs.insert(name, token.clone());
        }
        self.active.insert(token);
    }

    /// Open a progress sequence and send the begin notification.
    ///
    /// Returns the no-op token when the client lacks capability support, and
    /// `Rejected` only when the creation round trip is declined. Either way
    /// the caller's work must still execute.
    pub async fn begin(&self, title: &str, opts: BeginOpts) -> Result<ProgressToken, ProgressError> {
        let token = match opts.token {
            Some(token) => {
                self.register(token.clone(), opts.ref_name.clone());
                token
            }
            None => {
                if !self.transport.client_supports() {
                    log::trace!("Client lacks workDoneProgress; '{}' runs without UI", title);
                    return Ok(ProgressToken::Noop);
                }
                let token = self.mint();
                if let Err(e) = self.transport.create(&token).await {
                    log::debug!("Progress creation for '{}' rejected: {:#}", title, e);
                    return Err(ProgressError::Rejected);
                }
                self.register(token.clone(), opts.ref_name.clone());
                token
            }
        };

        self.transport
            .notify(
                &token,
                WorkDoneProgress::Begin(WorkDoneProgressBegin {
                    title: title.to_string(),
                    cancellable: opts.cancellable,
                    message: opts.message,
                    percentage: opts.percentage,
                }),
            )
            .await;
        Ok(token)
    }

    fn resolve(&self, key: &ProgressKey) -> Option<ProgressToken> {
        let token = match key {
            ProgressKey::Token(token) => token.clone(),
            ProgressKey::Ref(name) => self.refs.get(name)?.clone(),
        };
        if self.active.contains(&token) {
            Some(token)
        } else {
            None
        }
    }

    /// Fire-and-forget report. An unknown token or ref is a silent no-op: by
    /// the time a report races a concurrent `complete`, the owner may already
    /// have closed the sequence.
    pub async fn report(
        &self,
        key: impl Into<ProgressKey>,
        message: Option<String>,
        percentage: Option<u32>,
    ) {
        let key = key.into();
        let Some(token) = self.resolve(&key) else {
            log::trace!("Dropping progress report for inactive sequence: {:?}", key);
            return;
        };
        self.transport
            .notify(
                &token,
                WorkDoneProgress::Report(WorkDoneProgressReport {
                    cancellable: None,
                    message,
                    percentage,
                }),
            )
            .await;
    }

    /// Close a progress sequence. Idempotent: completing twice, or completing
    /// a token that was never begun, succeeds without side effects.
    pub async fn complete(&self, key: impl Into<ProgressKey>, message: Option<String>) {
        let Some(token) = self.resolve(&key.into()) else {
            return;
        };
        self.active.remove(&token);
        self.refs.retain(|_, t| *t != token);
        self.transport
            .notify(&token, WorkDoneProgress::End(WorkDoneProgressEnd { message }))
            .await;
    }

    /// Run `work` under a progress sequence, guaranteeing `complete` exactly
    /// once on every exit path. A work-function fault closes the sequence
    /// with the error text, then the original error propagates unchanged.
    pub async fn with_progress<T, F, Fut>(
        &self,
        title: &str,
        opts: BeginOpts,
        work: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce(ProgressToken) -> Fut,
        Fut: Future<Output = anyhow::Result<Outcome<T>>>,
    {
        let token = match self.begin(title, opts).await {
            Ok(token) => token,
            // Rejection means "no visual progress", never "skip the work".
            Err(ProgressError::Rejected) => ProgressToken::Noop,
        };
        match work(token.clone()).await {
            Ok(Outcome::Done(value)) => {
                self.complete(token, None).await;
                Ok(value)
            }
            Ok(Outcome::Cancelled(value)) => {
                self.complete(token, Some("Cancelled".to_string())).await;
                Ok(value)
            }
            Err(err) => {
                self.complete(token, Some(format!("Failed: {:#}", err))).await;
                Err(err)
            }
        }
    }

    /// Run `work` with an increment-capable reporter feeding a percent
    /// coordinator. The coordinator is torn down after `work` returns,
    /// cancels, or faults.
    pub async fn with_tracked_progress<T, F, Fut>(
        self: &Arc<Self>,
        title: &str,
        total: usize,
        work: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce(TrackedReporter) -> Fut,
        Fut: Future<Output = anyhow::Result<Outcome<T>>>,
    {
        let channel = Arc::clone(self);
        self.with_progress(
            title,
            BeginOpts {
                percentage: Some(0),
                ..BeginOpts::default()
            },
            move |token| async move {
                let (reporter, coordinator) = tracked::spawn_coordinator(channel, token, total);
                let result = work(reporter).await;
                // All reporter clones are dropped with the work future, so
                // the coordinator drains and exits before we complete.
                let _ = coordinator.await;
                result
            },
        )
        .await
    }

    /// Detached percent coordinator for sequences that outlive a single call,
    /// such as a rename settling across later notifications. The coordinator
    /// exits when the last reporter clone is dropped.
    pub fn tracked(self: &Arc<Self>, token: ProgressToken, total: usize) -> TrackedReporter {
        let (reporter, _coordinator) = tracked::spawn_coordinator(Arc::clone(self), token, total);
        reporter
    }
}
