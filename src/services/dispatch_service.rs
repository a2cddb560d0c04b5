//! Dispatch scheduler.
//!
//! The [`Dispatcher`] drives one run through a fixed sequence of states:
//!
//! ```text
//! Idle -> Validating -> Connecting -> Sending -> Finalizing -> Completed
//!              |             |            |                 -> Cancelled
//!              +-------------+------------+-> Aborted
//! ```
//!
//! Recipients are sent strictly one at a time, in load order, over a single
//! delivery session. A failed send is recorded and the run moves on; only
//! problems before the first send abort a run.

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{DispatchSettings, ProviderConfig, ValidationError};
use crate::domain::{Campaign, DispatchReport, ReportBuilder, RunId, RunStatus, SendOutcome};
use crate::providers::{self, ConnectionError, DeliveryProvider, OutgoingMessage};
use crate::services::recipient_loader::{load_recipients, RawTable, SchemaError};
use crate::services::template::render_message;

/// Lifecycle state of a [`Dispatcher`], tracked for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    Idle,
    Validating,
    Connecting,
    Sending,
    Finalizing,
    Completed,
    Cancelled,
    Aborted,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Connecting => "connecting",
            Self::Sending => "sending",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Why a run ended without a report. No message was sent in any of these cases.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbortReason {
    #[error("invalid recipient table: {0}")]
    Schema(#[from] SchemaError),

    #[error("no valid recipients ({skipped} rows skipped)")]
    NoValidRecipients { skipped: usize },

    #[error("invalid provider configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("could not open delivery session: {0}")]
    Connection(#[from] ConnectionError),

    /// The task running the dispatch panicked or was aborted.
    #[error("dispatch worker failed: {0}")]
    WorkerFailed(String),
}

/// Event emitted while a run progresses.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    /// One recipient was attempted.
    Progress {
        /// Zero-based position of the recipient in load order.
        index: usize,
        /// Number of valid recipients in the run.
        total: usize,
        outcome: SendOutcome,
    },
    /// The run reached a terminal state. Always the last event.
    Finished(Result<DispatchReport, AbortReason>),
}

/// Destination for [`DispatchEvent`]s.
///
/// A sink whose receiver has been dropped silently discards events; a run
/// never fails because nobody is listening.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    sender: Option<mpsc::UnboundedSender<DispatchEvent>>,
}

impl ProgressSink {
    pub fn new(sender: mpsc::UnboundedSender<DispatchEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// A sink that drops every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Creates a sink and the receiver for its events.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn emit(&self, event: DispatchEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}

/// Runs one campaign against one recipient table.
///
/// A `Dispatcher` is consumed by [`run`](Self::run); each run needs a new one.
///
/// # Example
///
/// ```ignore
/// let provider = providers::from_config(&config, &settings);
/// let (sink, mut events) = ProgressSink::channel();
/// let cancel = CancellationToken::new();
///
/// let report = Dispatcher::new(settings)
///     .with_config(config)
///     .run(&campaign, &table, provider.as_ref(), &sink, &cancel)
///     .await?;
/// ```
#[derive(Debug)]
pub struct Dispatcher {
    settings: DispatchSettings,
    /// Checked before connecting when present.
    config: Option<ProviderConfig>,
    run_id: RunId,
    state: DispatchState,
}

impl Dispatcher {
    pub fn new(settings: DispatchSettings) -> Self {
        Self {
            settings,
            config: None,
            run_id: RunId::generate(),
            state: DispatchState::Idle,
        }
    }

    /// Validates `config` in the connecting phase, before the session is opened.
    pub fn with_config(mut self, config: ProviderConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Executes the run to a terminal state.
    ///
    /// Emits one [`DispatchEvent::Progress`] per attempted recipient and a
    /// final [`DispatchEvent::Finished`] carrying the same value this returns.
    ///
    /// # Errors
    ///
    /// Returns an [`AbortReason`] if the run could not start sending. Failed
    /// sends are not errors; they are reported in the [`DispatchReport`].
    pub async fn run(
        mut self,
        campaign: &Campaign,
        table: &RawTable,
        provider: &dyn DeliveryProvider,
        sink: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, AbortReason> {
        let result = self.execute(campaign, table, provider, sink, cancel).await;
        sink.emit(DispatchEvent::Finished(result.clone()));
        result
    }

    /// Spawns the run on the tokio runtime.
    pub fn spawn(
        self,
        campaign: Campaign,
        table: RawTable,
        provider: Box<dyn DeliveryProvider>,
    ) -> DispatchHandle {
        let (sink, events) = ProgressSink::channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            self.run(&campaign, &table, provider.as_ref(), &sink, &token)
                .await
        });

        DispatchHandle {
            events,
            cancel,
            task,
        }
    }

    async fn execute(
        &mut self,
        campaign: &Campaign,
        table: &RawTable,
        provider: &dyn DeliveryProvider,
        sink: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, AbortReason> {
        self.transition(DispatchState::Validating);
        let loaded = match load_recipients(table) {
            Ok(loaded) => loaded,
            Err(e) => return Err(self.abort(e.into())),
        };
        if loaded.recipients.is_empty() {
            return Err(self.abort(AbortReason::NoValidRecipients {
                skipped: loaded.skipped.len(),
            }));
        }

        self.transition(DispatchState::Connecting);
        if let Some(config) = &self.config {
            if let Err(e) = config.validate() {
                return Err(self.abort(e.into()));
            }
        }
        let mut session = match provider.open().await {
            Ok(session) => session,
            Err(e) => return Err(self.abort(e.into())),
        };

        self.transition(DispatchState::Sending);
        let total = loaded.recipients.len();
        let mut report = ReportBuilder::new(self.run_id.clone(), total, loaded.skipped);
        let mut cancelled = false;

        for (index, recipient) in loaded.recipients.into_iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(run_id = %self.run_id, attempted = index, total, "Dispatch cancelled");
                cancelled = true;
                break;
            }

            let rendered = render_message(campaign, &recipient);
            let message = OutgoingMessage {
                to: recipient.email().to_string(),
                subject: rendered.subject,
                body: rendered.body,
            };

            let outcome = match session.send(&message).await {
                Ok(message_id) => {
                    tracing::debug!(run_id = %self.run_id, index, to = %message.to, "Sent");
                    SendOutcome::success(recipient, message_id)
                }
                Err(e) => {
                    tracing::warn!(
                        run_id = %self.run_id,
                        index,
                        to = %message.to,
                        error = %e,
                        "Send failed"
                    );
                    SendOutcome::failure(recipient, e.to_string())
                }
            };

            report.record(outcome.clone());
            sink.emit(DispatchEvent::Progress {
                index,
                total,
                outcome,
            });

            if index + 1 < total && !self.settings.throttle.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.settings.throttle) => {}
                }
            }
        }

        self.transition(DispatchState::Finalizing);
        if let Err(e) = session.close().await {
            tracing::warn!(run_id = %self.run_id, error = %e, "Failed to close delivery session");
        }

        let (status, state) = if cancelled {
            (RunStatus::Cancelled, DispatchState::Cancelled)
        } else {
            (RunStatus::Completed, DispatchState::Completed)
        };
        let report = report.finalize(status);
        self.transition(state);

        tracing::info!(
            run_id = %self.run_id,
            attempted = report.outcomes().len(),
            succeeded = report.success_count(),
            failed = report.failure_count(),
            skipped = report.skipped_rows().len(),
            "Dispatch finished"
        );

        Ok(report)
    }

    fn transition(&mut self, next: DispatchState) {
        tracing::debug!(run_id = %self.run_id, from = %self.state, to = %next, "Dispatch state change");
        self.state = next;
    }

    fn abort(&mut self, reason: AbortReason) -> AbortReason {
        tracing::error!(run_id = %self.run_id, phase = %self.state, reason = %reason, "Dispatch aborted");
        self.transition(DispatchState::Aborted);
        reason
    }
}

/// Handle to a run started with [`Dispatcher::spawn`] or [`spawn_dispatch`].
pub struct DispatchHandle {
    events: mpsc::UnboundedReceiver<DispatchEvent>,
    cancel: CancellationToken,
    task: JoinHandle<Result<DispatchReport, AbortReason>>,
}

impl DispatchHandle {
    /// Requests cancellation. The in-flight send, if any, is allowed to finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this run, e.g. for a signal handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for the next event. Returns `None` once the run has ended and all
    /// events were received.
    pub async fn next_event(&mut self) -> Option<DispatchEvent> {
        self.events.recv().await
    }

    /// Waits for the run to end.
    pub async fn join(self) -> Result<DispatchReport, AbortReason> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(AbortReason::WorkerFailed(e.to_string())),
        }
    }
}

/// Runs a campaign with the provider selected by `config`.
pub async fn run_dispatch(
    campaign: &Campaign,
    table: &RawTable,
    config: &ProviderConfig,
    settings: &DispatchSettings,
    sink: &ProgressSink,
    cancel: &CancellationToken,
) -> Result<DispatchReport, AbortReason> {
    let provider = providers::from_config(config, settings);
    tracing::info!(provider = ?provider.kind(), "Starting dispatch");

    Dispatcher::new(settings.clone())
        .with_config(config.clone())
        .run(campaign, table, provider.as_ref(), sink, cancel)
        .await
}

/// Spawns [`run_dispatch`] on the tokio runtime.
pub fn spawn_dispatch(
    campaign: Campaign,
    table: RawTable,
    config: ProviderConfig,
    settings: DispatchSettings,
) -> DispatchHandle {
    let provider = providers::from_config(&config, &settings);
    Dispatcher::new(settings)
        .with_config(config)
        .spawn(campaign, table, provider)
}
