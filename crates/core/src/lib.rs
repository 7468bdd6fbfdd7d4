//! # WebPilot Core
//!
//! Domain types, traits, and error definitions for the WebPilot page agent.
//! This crate has **no framework dependencies**: it defines the domain model
//! that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`Provider`] for model backends
//! - [`Page`] and [`SnapshotSource`] for the live browser tab
//! - [`HistoryStore`] for chat persistence
//!
//! Implementations live in their own crates, so tests can swap in scripted
//! fakes and the dependency graph points inward at core.

pub mod action;
pub mod error;
pub mod event;
pub mod history;
pub mod page;
pub mod provider;
pub mod store;
pub mod task;

// Re-export key types at crate root for ergonomics
pub use action::{Action, ActionRecord, ActionResult, ArgValue, ParamType, ToolName, TOOLS};
pub use error::{ElementError, Error, PageError, ProviderError, Result, StoreError};
pub use event::{EventBus, SessionEvent, SessionState};
pub use history::{ChatRecord, EntryRole, HistoryEntry};
pub use page::{ElementHandle, Key, LoadState, Page, Snapshot, SnapshotSource};
pub use provider::{
    AuthMode, PromptParts, Provider, ProviderDescriptor, ProviderRequest, ProviderResponse,
    ResponseShape, StreamChunk, Usage,
};
pub use store::HistoryStore;
pub use task::{ActionStatus, Task, TaskProgress, TaskStatus, TaskTiming, ValidationRules, Verdict};
