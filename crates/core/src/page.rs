//! Page trait: the abstraction over one live browser tab.
//!
//! The DOM executor only ever talks to the page through this trait: it
//! evaluates small scripts, dispatches trusted input at coordinates, and
//! reads the navigation lifecycle. Implementations: Chromium over CDP,
//! scripted fakes in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PageError;

/// A numeric element id from one DOM snapshot, tagged with that snapshot's generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    pub id: u32,
    pub generation: u64,
}

impl ElementHandle {
    pub fn new(id: u32, generation: u64) -> Self {
        Self { id, generation }
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.generation)
    }
}

/// Where the page is in its navigation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Loading,
    Interactive,
    Complete,
}

impl LoadState {
    /// Maps `document.readyState` values.
    pub fn from_ready_state(state: &str) -> Self {
        match state {
            "complete" => Self::Complete,
            "interactive" => Self::Interactive,
            _ => Self::Loading,
        }
    }
}

/// Keys the executor needs to press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Plain Enter: submits forms and sends messages.
    Enter,
    /// Shift+Enter: a line break that does not submit.
    ShiftEnter,
}

/// One live tab.
#[async_trait]
pub trait Page: Send + Sync {
    /// Evaluate a script expression and return its JSON-serializable value.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, PageError>;

    /// Dispatch a trusted left click at viewport coordinates.
    async fn click_at(&self, x: f64, y: f64) -> Result<(), PageError>;

    /// Insert text into the focused element as if typed.
    async fn insert_text(&self, text: &str) -> Result<(), PageError>;

    async fn press_key(&self, key: Key) -> Result<(), PageError>;

    /// Start navigating to `url`. Does not wait for load.
    async fn navigate(&self, url: &str) -> Result<(), PageError>;

    async fn lifecycle(&self) -> Result<LoadState, PageError>;

    async fn url(&self) -> Result<String, PageError>;
}

/// A text serialization of the interactive page content.
///
/// Interactive elements carry a leading numeric id adjacent to an opening
/// tag, e.g. `42<button aria-label="Submit">`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub text: String,
    pub url: String,
    pub generation: u64,
}

impl Snapshot {
    pub fn handle(&self, id: u32) -> ElementHandle {
        ElementHandle::new(id, self.generation)
    }

    /// The snapshot line describing element `id`, if present.
    pub fn line_for(&self, id: u32) -> Option<&str> {
        let needle = format!("{id}<");
        self.text.lines().map(str::trim_start).find(|line| {
            line.starts_with(&needle)
        })
    }
}

/// Produces DOM snapshots. The extractor itself lives outside the agent core.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Capture a new snapshot and register its handles under `generation`.
    async fn capture(&self, generation: u64) -> Result<Snapshot, PageError>;
}
