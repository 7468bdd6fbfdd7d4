//! Session event bus: pushes task state to whoever is watching.
//!
//! Delivery is at-most-once: a lagging or late subscriber simply misses
//! events. Observers that (re)connect must pull the current state from the
//! orchestrator instead of waiting for the next broadcast.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::history::HistoryEntry;
use crate::task::{ActionStatus, TaskProgress, TaskStatus};

/// A point-in-time view of the running (or last) task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub chat_id: String,
    pub status: TaskStatus,
    pub action_status: ActionStatus,
    pub progress: TaskProgress,
    pub entry_count: usize,
    /// The most recent history entry, including a partially streamed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_entry: Option<HistoryEntry>,
    pub timestamp: DateTime<Utc>,
}

impl SessionState {
    /// State reported when nothing has run yet.
    pub fn idle() -> Self {
        Self {
            chat_id: String::new(),
            status: TaskStatus::Idle,
            action_status: ActionStatus::Idle,
            progress: TaskProgress::default(),
            entry_count: 0,
            last_entry: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Any mutation of the task or its history.
    StateChanged(SessionState),

    /// A streamed model delta was appended to the in-progress entry.
    StreamDelta {
        chat_id: String,
        streaming_id: String,
        delta: String,
    },
}

/// A broadcast-based bus for session events.
pub struct EventBus {
    sender: broadcast::Sender<Arc<SessionEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SessionEvent>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
