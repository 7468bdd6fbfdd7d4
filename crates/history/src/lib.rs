//! History stores for WebPilot.

pub mod file_store;
pub mod in_memory;

pub use file_store::FileHistoryStore;
pub use in_memory::InMemoryHistoryStore;
