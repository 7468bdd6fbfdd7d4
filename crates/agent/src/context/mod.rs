//! Prompt construction: history segments, the page context block, and the
//! static guidance tables.

pub mod formatter;
pub mod rules;

pub use formatter::{ContextFormatter, ContextInput, system_prompt};
