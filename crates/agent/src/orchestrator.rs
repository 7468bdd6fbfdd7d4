//! Task orchestrator: the state machine that drives one task.
//!
//! ```text
//! idle ─start─▶ running ─▶ completed | success | failed | error
//!                  │
//!                  └─interrupt─▶ idle
//! ```
//!
//! Each iteration walks the action sub-states:
//!
//! 1. **pulling-dom**: wait for the page to settle and capture a snapshot
//! 2. **performing-query**: format the prompt, call the model, parse the reply
//! 3. **performing-action**: dispatch the action and judge the page afterwards
//!
//! The task itself is an explicit [`Session`] value passed into and returned
//! from [`TaskOrchestrator::run`]. Every mutation persists the chat record
//! and broadcasts the new [`SessionState`].

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webpilot_browser::DomExecutor;
use webpilot_config::AppConfig;
use webpilot_core::action::{Action, ActionRecord};
use webpilot_core::error::{PageError, StoreError};
use webpilot_core::event::{EventBus, SessionEvent, SessionState};
use webpilot_core::history::{ChatRecord, HistoryEntry};
use webpilot_core::page::{Snapshot, SnapshotSource};
use webpilot_core::provider::{PromptParts, Usage};
use webpilot_core::store::HistoryStore;
use webpilot_core::task::{ActionStatus, Task, TaskProgress, TaskStatus, ValidationRules, Verdict};
use webpilot_providers::{Completion, GatewayError, Invocation, ModelGateway, ModelKey, StreamObserver};

use crate::context::{ContextFormatter, ContextInput};
use crate::parser::parse_response;

pub const INTERRUPTED_MESSAGE: &str = "Task interrupted by user.";

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("A task is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Could not load chat history: {0}")]
    Store(#[from] StoreError),
}

/// Knobs for one orchestrator, usually taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Model key; empty means the gateway default.
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub streaming: bool,
    pub max_steps: u32,
    pub total: u32,
    pub task_type: String,
    pub validation: ValidationRules,
    pub snapshot_char_budget: usize,
}

impl RunSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.default_model.clone(),
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
            streaming: config.streaming,
            max_steps: config.agent.max_steps,
            total: config.agent.total,
            task_type: config.agent.task_type.clone(),
            validation: config.agent.validation.clone(),
            snapshot_char_budget: config.agent.snapshot_char_budget,
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// One task in flight.
#[derive(Debug, Clone)]
pub struct Session {
    pub task: Task,
    pub record: ChatRecord,
    pub action_status: ActionStatus,
    pub target: ModelKey,
    /// Loop iterations used so far.
    pub steps: u32,
    /// Snapshot captured after the last action, reused by the next iteration.
    pending_snapshot: Option<Snapshot>,
}

impl Session {
    pub fn state(&self) -> SessionState {
        SessionState {
            chat_id: self.task.chat_id.clone(),
            status: self.task.status,
            action_status: self.action_status,
            progress: self.task.progress.clone(),
            entry_count: self.record.entries.len(),
            last_entry: self.record.entries.last().cloned(),
            timestamp: Utc::now(),
        }
    }

    /// Tokens spent by every model turn in this chat.
    pub fn total_tokens(&self) -> u64 {
        self.record.total_tokens()
    }
}

/// Why the loop stopped.
#[derive(Debug)]
enum Stop {
    /// `finish()`: success when progress is complete.
    Finished,
    /// `respond(...)`.
    Responded,
    /// The agent or the page rejected the task.
    Failed(String),
    /// Parse, gateway, page-read or budget failure.
    Error(String),
    Interrupted,
}

pub struct TaskOrchestrator {
    gateway: Arc<ModelGateway>,
    executor: Arc<DomExecutor>,
    snapshots: Arc<dyn SnapshotSource>,
    store: Arc<dyn HistoryStore>,
    bus: Arc<EventBus>,
    formatter: ContextFormatter,
    settings: RunSettings,
    running: AtomicBool,
    interrupted: AtomicBool,
    last_state: Mutex<SessionState>,
}

impl TaskOrchestrator {
    pub fn new(
        gateway: Arc<ModelGateway>,
        executor: Arc<DomExecutor>,
        snapshots: Arc<dyn SnapshotSource>,
        store: Arc<dyn HistoryStore>,
        settings: RunSettings,
    ) -> Self {
        Self {
            gateway,
            executor,
            snapshots,
            store,
            bus: Arc::new(EventBus::default()),
            formatter: ContextFormatter::new(settings.snapshot_char_budget),
            settings,
            running: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            last_state: Mutex::new(SessionState::idle()),
        }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SessionEvent>> {
        self.bus.subscribe()
    }

    /// The most recently committed state. Observers resync from here.
    pub fn current_state(&self) -> SessionState {
        self.last_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the running task to stop at its next check. Returns whether a task was running.
    pub fn interrupt(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        info!("Interrupt requested");
        self.interrupted.store(true, Ordering::SeqCst);
        true
    }

    /// Begin and run a task to its end.
    pub async fn start(
        &self,
        instructions: &str,
        chat_id: &str,
    ) -> Result<Session, OrchestratorError> {
        let session = self.begin(instructions, chat_id).await?;
        Ok(self.run(session).await)
    }

    /// idle → running: validate the model, load the chat, record the instruction.
    ///
    /// A second call while a task is running is rejected without touching
    /// any state.
    pub async fn begin(
        &self,
        instructions: &str,
        chat_id: &str,
    ) -> Result<Session, OrchestratorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(chat_id, "Rejected start: a task is already running");
            return Err(OrchestratorError::AlreadyRunning);
        }
        self.interrupted.store(false, Ordering::SeqCst);

        let prepared = self.prepare(instructions, chat_id).await;
        let mut session = match prepared {
            Ok(session) => session,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        info!(chat_id, model = %session.target, "Task started");
        session.record.entries.push(HistoryEntry::user(instructions));
        self.commit(&mut session).await;
        Ok(session)
    }

    async fn prepare(&self, instructions: &str, chat_id: &str) -> Result<Session, OrchestratorError> {
        let target = self.gateway.resolve(&self.settings.model)?;
        self.gateway.check(&target)?;
        let record = self.store.load(chat_id).await?;

        let mut task = Task::new(instructions, chat_id);
        task.progress = TaskProgress::new(self.settings.total, self.settings.task_type.clone())
            .with_rules(self.settings.validation.clone());
        task.status = TaskStatus::Running;

        Ok(Session {
            task,
            record,
            action_status: ActionStatus::Initializing,
            target,
            steps: 0,
            pending_snapshot: None,
        })
    }

    /// Drive a begun session until it reaches a terminal state or is interrupted.
    pub async fn run(&self, mut session: Session) -> Session {
        let stop = self.drive(&mut session).await;
        let chat_id = session.task.chat_id.clone();

        let status = match stop {
            Stop::Interrupted => {
                session
                    .record
                    .entries
                    .push(HistoryEntry::error(&session.task.instructions, INTERRUPTED_MESSAGE));
                TaskStatus::Idle
            }
            Stop::Finished if session.task.progress.is_done() => TaskStatus::Success,
            Stop::Finished | Stop::Responded => TaskStatus::Completed,
            Stop::Failed(message) => {
                session
                    .record
                    .entries
                    .push(HistoryEntry::error(&session.task.instructions, message));
                TaskStatus::Failed
            }
            Stop::Error(message) => {
                session
                    .record
                    .entries
                    .push(HistoryEntry::error(&session.task.instructions, message));
                TaskStatus::Error
            }
        };

        session.task.status = status;
        session.action_status = ActionStatus::Idle;
        session.task.timing.finished_at = Some(Utc::now());
        self.commit(&mut session).await;
        self.running.store(false, Ordering::SeqCst);

        info!(
            chat_id = %chat_id,
            status = ?status,
            steps = session.steps,
            completed = session.task.progress.completed,
            total = session.task.progress.total,
            tokens = session.total_tokens(),
            "Task ended"
        );
        session
    }

    async fn drive(&self, session: &mut Session) -> Stop {
        loop {
            if self.take_interrupt() {
                return Stop::Interrupted;
            }
            if session.steps >= self.settings.max_steps {
                return Stop::Error(format!(
                    "Stopped after {} steps without finishing the task.",
                    self.settings.max_steps
                ));
            }
            session.steps += 1;
            debug!(step = session.steps, "Iteration");

            // pulling-dom
            self.transition(session, ActionStatus::PullingDom).await;
            let snapshot = match session.pending_snapshot.take() {
                Some(snapshot) => snapshot,
                None => {
                    self.executor.await_stability().await;
                    if self.take_interrupt() {
                        return Stop::Interrupted;
                    }
                    match self.capture().await {
                        Ok(snapshot) => snapshot,
                        Err(e) => return Stop::Error(format!("Could not read the page: {e}")),
                    }
                }
            };

            // performing-query
            self.transition(session, ActionStatus::PerformingQuery).await;
            let prompt = self.formatter.format(&ContextInput {
                instructions: &session.task.instructions,
                history: &session.record.entries,
                snapshot: &snapshot,
                now: Utc::now(),
            });
            let completion = self.query(session, &prompt).await;
            if self.take_interrupt() {
                return Stop::Interrupted;
            }
            let completion = match completion {
                Ok(completion) => completion,
                Err(e) => return Stop::Error(e.to_string()),
            };

            let mut entry = HistoryEntry::ai(&session.task.instructions, &completion.text);
            entry.context_text = Some(prompt.user);
            entry.usage = Some(completion.usage);
            let parsed = parse_response(&completion.text);
            if let Ok(parsed) = &parsed {
                entry.action = Some(ActionRecord::from(&parsed.action));
                entry.element_snapshot = parsed
                    .action
                    .element_id()
                    .and_then(|id| snapshot.line_for(id))
                    .map(str::to_string);
            }
            session.record.entries.push(entry);
            self.commit(session).await;

            let action = match parsed {
                Ok(parsed) => parsed.action,
                Err(e) => {
                    warn!(error = %e, "Unparseable model reply");
                    return Stop::Error(format!("Could not understand the model reply: {e}"));
                }
            };

            // performing-action
            match &action {
                Action::Finish => return Stop::Finished,
                Action::Respond { .. } => return Stop::Responded,
                Action::Fail { message } => {
                    return Stop::Failed(format!("The agent gave up: {message}"));
                }
                _ => {}
            }
            self.transition(session, ActionStatus::PerformingAction).await;
            let record = ActionRecord::from(&action);
            let outcome = self.executor.perform(&action, snapshot.generation).await;
            if self.take_interrupt() {
                return Stop::Interrupted;
            }
            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    warn!(action = %record, error = %e, "Action failed");
                    return Stop::Failed(format!("Action {record} failed: {e}"));
                }
            };

            self.executor.await_stability().await;
            if self.take_interrupt() {
                return Stop::Interrupted;
            }
            let after = match self.capture().await {
                Ok(snapshot) => snapshot,
                Err(e) => return Stop::Error(format!("Could not read the page: {e}")),
            };

            let observed = format!("{}\n{}", result.message.unwrap_or_default(), after.text);
            let rules = session
                .task
                .progress
                .validation_rules
                .clone()
                .unwrap_or_default();
            match rules.judge(&observed) {
                Verdict::Success => {
                    if session.task.progress.advance() {
                        info!(
                            completed = session.task.progress.completed,
                            total = session.task.progress.total,
                            "Progress advanced"
                        );
                    }
                }
                Verdict::Pending(indicator) => {
                    debug!(%indicator, "Outcome pending, progress unchanged");
                }
                Verdict::Failure(indicator) => {
                    return Stop::Failed(format!(
                        "Action {record} led to a failure on the page (matched \"{indicator}\")."
                    ));
                }
                Verdict::NoMatch => {}
            }
            self.commit(session).await;
            session.pending_snapshot = Some(after);
        }
    }

    /// Capture a snapshot under a fresh generation. Older handles go stale here.
    async fn capture(&self) -> Result<Snapshot, PageError> {
        let generation = self.executor.registry().advance();
        self.snapshots.capture(generation).await
    }

    async fn query(
        &self,
        session: &Session,
        prompt: &PromptParts,
    ) -> Result<Completion, GatewayError> {
        let invocation = Invocation {
            target: session.target.clone(),
            prompt: prompt.clone(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };
        if !self.settings.streaming {
            return self.gateway.invoke(&invocation).await;
        }

        let mut streamer = EntryStreamer {
            bus: self.bus.as_ref(),
            last_state: &self.last_state,
            state: session.state(),
            entry: HistoryEntry::ai(&session.task.instructions, ""),
        };
        streamer.entry.streaming_id = Some(Uuid::new_v4().to_string());
        self.gateway.invoke_streaming(&invocation, &mut streamer).await
    }

    fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }

    async fn transition(&self, session: &mut Session, status: ActionStatus) {
        debug!(from = ?session.action_status, to = ?status, "Action status");
        session.action_status = status;
        self.commit(session).await;
    }

    /// Persist the record and broadcast the new state.
    async fn commit(&self, session: &mut Session) {
        session.task.timing.updated_at = Utc::now();
        session.record.progress = Some(session.task.progress.clone());
        session.record.timing = Some(session.task.timing.clone());
        if let Err(e) = self.store.save(&session.record).await {
            warn!(chat_id = %session.task.chat_id, error = %e, "Failed to persist chat history");
        }

        let state = session.state();
        *self.last_state.lock().unwrap_or_else(|e| e.into_inner()) = state.clone();
        self.bus.publish(SessionEvent::StateChanged(state));
    }
}

/// Mirrors a streamed reply into a partial ai entry and rebroadcasts it.
struct EntryStreamer<'a> {
    bus: &'a EventBus,
    last_state: &'a Mutex<SessionState>,
    state: SessionState,
    entry: HistoryEntry,
}

impl StreamObserver for EntryStreamer<'_> {
    fn on_chunk(&mut self, delta: &str, accumulated: &str) {
        self.entry.content_text = accumulated.to_string();
        if let Some(streaming_id) = &self.entry.streaming_id {
            self.bus.publish(SessionEvent::StreamDelta {
                chat_id: self.state.chat_id.clone(),
                streaming_id: streaming_id.clone(),
                delta: delta.to_string(),
            });
        }
        self.state.last_entry = Some(self.entry.clone());
        self.state.timestamp = Utc::now();
        *self.last_state.lock().unwrap_or_else(|e| e.into_inner()) = self.state.clone();
        self.bus.publish(SessionEvent::StateChanged(self.state.clone()));
    }

    fn on_usage(&mut self, usage: &Usage) {
        self.entry.usage = Some(*usage);
    }
}
