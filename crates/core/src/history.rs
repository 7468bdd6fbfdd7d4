//! History entries: the append-only record of a chat.
//!
//! A chat outlives the tasks run in it: every instruction, model turn and
//! failure is kept so later prompts can show what was already tried.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::ActionRecord;
use crate::provider::Usage;
use crate::task::{TaskProgress, TaskTiming};

/// Who produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryRole {
    User,
    Ai,
    Error,
}

/// One entry in a chat's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub role: EntryRole,

    /// The user instruction this entry belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_text: Option<String>,

    /// The context block sent alongside the prompt, for ai entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_text: Option<String>,

    pub content_text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    pub timestamp: DateTime<Utc>,

    /// Set while the entry is still being filled by a streamed reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_id: Option<String>,

    /// Markup of the element the action targeted, captured at dispatch time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_snapshot: Option<String>,
}

impl HistoryEntry {
    fn base(role: EntryRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            prompt_text: None,
            context_text: None,
            content_text: content.into(),
            action: None,
            usage: None,
            timestamp: Utc::now(),
            streaming_id: None,
            element_snapshot: None,
        }
    }

    /// The user's instruction that opens a segment.
    pub fn user(instructions: impl Into<String>) -> Self {
        let instructions = instructions.into();
        let mut entry = Self::base(EntryRole::User, instructions.clone());
        entry.prompt_text = Some(instructions);
        entry
    }

    /// A model turn.
    pub fn ai(prompt: impl Into<String>, content: impl Into<String>) -> Self {
        let mut entry = Self::base(EntryRole::Ai, content);
        entry.prompt_text = Some(prompt.into());
        entry
    }

    /// A failure surfaced to the user.
    pub fn error(prompt: impl Into<String>, content: impl Into<String>) -> Self {
        let mut entry = Self::base(EntryRole::Error, content);
        entry.prompt_text = Some(prompt.into());
        entry
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming_id.is_some()
    }
}

/// Everything persisted for one chat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub chat_id: String,
    #[serde(default)]
    pub entries: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<TaskTiming>,
}

impl ChatRecord {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            ..Self::default()
        }
    }

    /// Merge a concurrently written record into this one.
    ///
    /// Last writer wins per entry list: a non-empty incoming list replaces
    /// ours wholesale, aggregates are taken from `incoming` when present.
    pub fn merge_from(&mut self, incoming: ChatRecord) {
        if !incoming.entries.is_empty() {
            self.entries = incoming.entries;
        }
        if incoming.progress.is_some() {
            self.progress = incoming.progress;
        }
        if incoming.timing.is_some() {
            self.timing = incoming.timing;
        }
    }

    /// Total tokens recorded across all ai entries.
    pub fn total_tokens(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(|e| e.usage.as_ref())
            .map(|u| u64::from(u.total_tokens))
            .sum()
    }
}
