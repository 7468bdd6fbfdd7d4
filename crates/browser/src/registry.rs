//! Snapshot generations.
//!
//! Every DOM snapshot gets a fresh generation number; element ids are only
//! meaningful within the generation that assigned them. The page-side half
//! of the registry lives in `window.__webpilot` and is filled by the
//! snapshot extractor.

use std::sync::atomic::{AtomicU64, Ordering};
use webpilot_core::error::ElementError;
use webpilot_core::page::ElementHandle;

#[derive(Debug, Default)]
pub struct ElementRegistry {
    generation: AtomicU64,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation of the most recent snapshot. Zero before the first one.
    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Start a new generation. Handles from older generations become stale.
    pub fn advance(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reject handles that were not issued by the current generation.
    pub fn check(&self, handle: ElementHandle) -> Result<(), ElementError> {
        let current = self.current();
        if handle.generation == current && current != 0 {
            Ok(())
        } else {
            Err(ElementError::Stale {
                id: handle.id,
                handle_generation: handle.generation,
                current_generation: current,
            })
        }
    }
}
