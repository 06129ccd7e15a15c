//! The engine actor and its handle.
//!
//! A single tokio task owns the [`EngineState`]. Callers hold a cloneable
//! [`EngineHandle`] that sends commands over an `mpsc` channel and awaits
//! the reply on a `oneshot`. Network calls are spawned off the actor; their
//! results come back as internal commands, so every mutation runs to
//! completion on the actor and push messages keep flowing while requests
//! are outstanding.
//!
//! Observers read [`EngineView`] snapshots from a `watch` channel, updated
//! after every handled command or message. Lifecycle notifications go out
//! on the [`EventBus`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use genqueue_client::api::{ApiError, GenerationPage, GenerationsApi};
use genqueue_client::messages::StreamMessage;
use genqueue_client::stream::ConnectionState;
use genqueue_core::inputs::InputPatch;
use genqueue_core::job::GenerationJob;
use genqueue_core::record::GenerationRecord;
use genqueue_core::snapshot::PersistedState;
use genqueue_core::types::{JobId, NodeId, WorkflowId};
use genqueue_events::EventBus;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};
use crate::history::DEFAULT_PAGE_SIZE;
use crate::state::EngineState;
use crate::submission::Submission;

/// Default interval between first-page history refreshes.
pub const DEFAULT_HISTORY_POLL: Duration = Duration::from_secs(30);

const DEFAULT_COMMAND_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// History page size; a page is "full" (more may follow) at this size.
    pub page_size: usize,
    /// Periodic first-page refresh, starting immediately. With `None` the
    /// engine never fetches on its own; call
    /// [`EngineHandle::refresh_history`].
    pub history_poll_interval: Option<Duration>,
    pub command_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            history_poll_interval: Some(DEFAULT_HISTORY_POLL),
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

/// Read-only snapshot of the engine for observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineView {
    /// Most recent first.
    pub jobs: Vec<GenerationJob>,
    pub selected_job_id: Option<JobId>,
    pub follow_latest: bool,
    pub queue_remaining: u32,
    pub has_more_history: bool,
    pub active_workflow_id: Option<WorkflowId>,
    pub connection: ConnectionState,
}

impl EngineView {
    fn capture(state: &EngineState, connection: ConnectionState) -> Self {
        Self {
            jobs: state.list(),
            selected_job_id: state.selection().selected().map(str::to_string),
            follow_latest: state.selection().follow_latest(),
            queue_remaining: state.queue_remaining(),
            has_more_history: state.cursor().has_more(),
            active_workflow_id: state.workflows().active_id(),
            connection,
        }
    }

    /// Job by canonical id.
    pub fn job(&self, id: &str) -> Option<&GenerationJob> {
        self.jobs.iter().find(|job| job.id() == id)
    }

    pub fn selected_job(&self) -> Option<&GenerationJob> {
        self.job(self.selected_job_id.as_deref()?)
    }
}

type Reply<T> = oneshot::Sender<EngineResult<T>>;

enum Command {
    ActivateWorkflow {
        id: WorkflowId,
        node_ids: HashSet<NodeId>,
        reply: oneshot::Sender<()>,
    },
    SetInput {
        patch: InputPatch,
        reply: Reply<()>,
    },
    Submit {
        patch: Option<InputPatch>,
        reply: Reply<JobId>,
    },
    Retry {
        job_id: JobId,
        reply: Reply<JobId>,
    },
    Select {
        job_id: JobId,
        reply: Reply<()>,
    },
    Next {
        reply: oneshot::Sender<Option<JobId>>,
    },
    Previous {
        reply: oneshot::Sender<Option<JobId>>,
    },
    SetFollowLatest {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    RefreshHistory {
        reply: Reply<bool>,
    },
    LoadMoreHistory {
        reply: Reply<bool>,
    },
    Get {
        job_id: JobId,
        reply: oneshot::Sender<Option<GenerationJob>>,
    },
    List {
        reply: oneshot::Sender<Vec<GenerationJob>>,
    },
    Persisted {
        reply: oneshot::Sender<PersistedState>,
    },

    // Results of spawned network calls.
    SubmissionSettled {
        job_id: JobId,
        result: Result<GenerationRecord, ApiError>,
    },
    HistoryFetched {
        offset: usize,
        result: Result<GenerationPage, ApiError>,
        reply: Option<Reply<bool>>,
    },
}

/// Builder for the engine actor.
pub struct Engine {
    state: EngineState,
    api: Arc<dyn GenerationsApi>,
    bus: Arc<EventBus>,
    config: EngineConfig,
    stream: Option<mpsc::Receiver<StreamMessage>>,
    connection: Option<watch::Receiver<ConnectionState>>,
}

impl Engine {
    pub fn new(
        state: EngineState,
        api: Arc<dyn GenerationsApi>,
        bus: Arc<EventBus>,
        config: EngineConfig,
    ) -> Self {
        Self {
            state,
            api,
            bus,
            config,
            stream: None,
            connection: None,
        }
    }

    /// Feed push-channel messages and connection state into the engine.
    pub fn with_stream(
        mut self,
        messages: mpsc::Receiver<StreamMessage>,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        self.stream = Some(messages);
        self.connection = Some(connection);
        self
    }

    /// Start the actor. It runs until `cancel` fires or every handle is
    /// dropped, and resolves to the state worth persisting.
    pub fn spawn(self, cancel: CancellationToken) -> (EngineHandle, JoinHandle<PersistedState>) {
        let (command_tx, command_rx) = mpsc::channel(self.config.command_buffer.max(1));
        let connection_state = self
            .connection
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(ConnectionState::Idle);
        let (view_tx, view_rx) = watch::channel(EngineView::capture(&self.state, connection_state));

        let actor = EngineActor {
            state: self.state,
            api: self.api,
            bus: self.bus,
            view: view_tx,
            commands: command_tx.downgrade(),
            connection_state,
            first_page_in_flight: false,
        };
        let ticker = self.config.history_poll_interval.map(poll_ticker);

        let task = tokio::spawn(actor.run(command_rx, self.stream, self.connection, ticker, cancel));

        let handle = EngineHandle {
            commands: command_tx,
            view: view_rx,
        };
        (handle, task)
    }
}

fn poll_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

struct EngineActor {
    state: EngineState,
    api: Arc<dyn GenerationsApi>,
    bus: Arc<EventBus>,
    view: watch::Sender<EngineView>,
    /// Weak so that outstanding handles, not the actor itself, keep the
    /// command channel open.
    commands: mpsc::WeakSender<Command>,
    connection_state: ConnectionState,
    first_page_in_flight: bool,
}

impl EngineActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut stream: Option<mpsc::Receiver<StreamMessage>>,
        mut connection: Option<watch::Receiver<ConnectionState>>,
        mut ticker: Option<Interval>,
        cancel: CancellationToken,
    ) -> PersistedState {
        tracing::info!("Generation engine started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Generation engine cancelled");
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        tracing::info!("All engine handles dropped");
                        break;
                    }
                },
                message = recv_stream(&mut stream) => match message {
                    Some(message) => self.on_stream_message(message),
                    None => {
                        tracing::debug!("Push message channel closed");
                        stream = None;
                    }
                },
                changed = connection_changed(&mut connection) => match changed {
                    Some(state) => self.connection_state = state,
                    None => connection = None,
                },
                _ = tick(&mut ticker) => {
                    if !self.first_page_in_flight {
                        self.fetch_page(0, None);
                    }
                }
            }

            self.publish_view();
        }

        self.state.to_persisted()
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::ActivateWorkflow { id, node_ids, reply } => {
                self.state.activate_workflow(id, node_ids);
                let _ = reply.send(());
            }
            Command::SetInput { patch, reply } => {
                let _ = reply.send(self.state.set_input(patch));
            }
            Command::Submit { patch, reply } => {
                let result = self
                    .state
                    .begin_submission(patch.as_ref())
                    .map(|submission| self.send_submission(submission));
                let _ = reply.send(result);
            }
            Command::Retry { job_id, reply } => {
                let result = self
                    .state
                    .retry(&job_id)
                    .map(|submission| self.send_submission(submission));
                let _ = reply.send(result);
            }
            Command::Select { job_id, reply } => {
                let _ = reply.send(self.state.select(&job_id));
            }
            Command::Next { reply } => {
                let _ = reply.send(self.state.select_next());
            }
            Command::Previous { reply } => {
                let _ = reply.send(self.state.select_previous());
            }
            Command::SetFollowLatest { enabled, reply } => {
                self.state.set_follow_latest(enabled);
                let _ = reply.send(());
            }
            Command::RefreshHistory { reply } => self.fetch_page(0, Some(reply)),
            Command::LoadMoreHistory { reply } => {
                if self.state.cursor().has_more() {
                    let offset = self.state.cursor().next_offset();
                    self.fetch_page(offset, Some(reply));
                } else {
                    let _ = reply.send(Ok(false));
                }
            }
            Command::Get { job_id, reply } => {
                let _ = reply.send(self.state.get(&job_id).cloned());
            }
            Command::List { reply } => {
                let _ = reply.send(self.state.list());
            }
            Command::Persisted { reply } => {
                let _ = reply.send(self.state.to_persisted());
            }
            Command::SubmissionSettled { job_id, result } => self.on_submission_settled(&job_id, result),
            Command::HistoryFetched {
                offset,
                result,
                reply,
            } => self.on_history_fetched(offset, result, reply),
        }
    }

    fn on_stream_message(&mut self, message: StreamMessage) {
        for event in self.state.apply_stream_message(message) {
            self.bus.publish(event);
        }
    }

    /// Send the creation request off the actor. Returns the local job id.
    fn send_submission(&mut self, submission: Submission) -> JobId {
        let job_id = submission.job_id.clone();
        let Some(commands) = self.commands.upgrade() else {
            return job_id;
        };
        let api = Arc::clone(&self.api);

        tokio::spawn(async move {
            let result = api.create_generation(&submission.request).await;
            let _ = commands
                .send(Command::SubmissionSettled {
                    job_id: submission.job_id,
                    result,
                })
                .await;
        });

        job_id
    }

    fn on_submission_settled(&mut self, job_id: &str, result: Result<GenerationRecord, ApiError>) {
        match result {
            Ok(record) => {
                if let Err(e) = self.state.confirm_submission(job_id, record) {
                    tracing::warn!(job_id, error = %e, "Could not apply creation response");
                }
            }
            Err(e) => {
                let error = EngineError::from(e);
                for event in self.state.fail_submission(job_id, &error) {
                    self.bus.publish(event);
                }
            }
        }
    }

    fn fetch_page(&mut self, offset: usize, reply: Option<Reply<bool>>) {
        let Some(commands) = self.commands.upgrade() else {
            if let Some(reply) = reply {
                let _ = reply.send(Err(EngineError::EngineStopped));
            }
            return;
        };
        if offset == 0 {
            self.first_page_in_flight = true;
        }
        let api = Arc::clone(&self.api);
        let limit = self.state.cursor().page_size();

        tokio::spawn(async move {
            let result = api.list_generations(limit, offset).await;
            let _ = commands
                .send(Command::HistoryFetched {
                    offset,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn on_history_fetched(
        &mut self,
        offset: usize,
        result: Result<GenerationPage, ApiError>,
        reply: Option<Reply<bool>>,
    ) {
        if offset == 0 {
            self.first_page_in_flight = false;
        }

        let outcome = match result {
            Ok(listing) => {
                let page = self.state.decode_page(listing, offset);
                if offset == 0 {
                    self.state.merge_first_page(page);
                } else {
                    self.state.append_page(page);
                }
                Ok(self.state.cursor().has_more())
            }
            Err(e) => {
                tracing::warn!(offset, error = %e, "History fetch failed");
                Err(EngineError::from(e))
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    fn publish_view(&self) {
        let view = EngineView::capture(&self.state, self.connection_state);
        self.view.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }
}

async fn recv_stream(stream: &mut Option<mpsc::Receiver<StreamMessage>>) -> Option<StreamMessage> {
    match stream {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Next connection state, or `None` once the sender is gone.
async fn connection_changed(
    connection: &mut Option<watch::Receiver<ConnectionState>>,
) -> Option<ConnectionState> {
    match connection {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Cloneable handle on a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<EngineView>,
}

impl EngineHandle {
    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> EngineResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| EngineError::EngineStopped)?;
        response.await.map_err(|_| EngineError::EngineStopped)
    }

    /// Make `id` the active workflow. `node_ids` is the set of nodes in its
    /// current graph; inputs for other nodes are left out of submissions.
    pub async fn activate_workflow(&self, id: WorkflowId, node_ids: HashSet<NodeId>) -> EngineResult<()> {
        self.call(|reply| Command::ActivateWorkflow { id, node_ids, reply })
            .await
    }

    pub async fn set_input(
        &self,
        node_id: impl Into<NodeId>,
        field: impl Into<String>,
        value: serde_json::Value,
    ) -> EngineResult<()> {
        let patch = InputPatch::new(node_id, field, value);
        self.call(|reply| Command::SetInput { patch, reply }).await?
    }

    /// Submit the current inputs, optionally with one field override.
    ///
    /// Returns as soon as the Pending record is in the list; confirmation
    /// and failure show up in the view. The returned id stays valid after
    /// the backend assigns the canonical one.
    pub async fn submit(&self, patch: Option<InputPatch>) -> EngineResult<JobId> {
        self.call(|reply| Command::Submit { patch, reply }).await?
    }

    /// Re-submit a job's inputs as a fresh job.
    pub async fn retry(&self, job_id: &str) -> EngineResult<JobId> {
        let job_id = job_id.to_string();
        self.call(|reply| Command::Retry { job_id, reply }).await?
    }

    pub async fn select(&self, job_id: &str) -> EngineResult<()> {
        let job_id = job_id.to_string();
        self.call(|reply| Command::Select { job_id, reply }).await?
    }

    /// Select the next older job.
    pub async fn next(&self) -> EngineResult<Option<JobId>> {
        self.call(|reply| Command::Next { reply }).await
    }

    /// Select the next newer job.
    pub async fn previous(&self) -> EngineResult<Option<JobId>> {
        self.call(|reply| Command::Previous { reply }).await
    }

    pub async fn set_follow_latest(&self, enabled: bool) -> EngineResult<()> {
        self.call(|reply| Command::SetFollowLatest { enabled, reply })
            .await
    }

    /// Re-fetch and merge the first history page. Returns whether more
    /// pages exist.
    pub async fn refresh_history(&self) -> EngineResult<bool> {
        self.call(|reply| Command::RefreshHistory { reply }).await?
    }

    /// Fetch and append the next history page, if any.
    pub async fn load_more_history(&self) -> EngineResult<bool> {
        self.call(|reply| Command::LoadMoreHistory { reply }).await?
    }

    /// Look up a job by canonical or provisional id.
    pub async fn get(&self, job_id: &str) -> EngineResult<Option<GenerationJob>> {
        let job_id = job_id.to_string();
        self.call(|reply| Command::Get { job_id, reply }).await
    }

    pub async fn list(&self) -> EngineResult<Vec<GenerationJob>> {
        self.call(|reply| Command::List { reply }).await
    }

    pub async fn persisted(&self) -> EngineResult<PersistedState> {
        self.call(|reply| Command::Persisted { reply }).await
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineView> {
        self.view.clone()
    }

    pub fn view(&self) -> EngineView {
        self.view.borrow().clone()
    }
}
