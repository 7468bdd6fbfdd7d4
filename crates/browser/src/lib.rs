//! DOM action execution for WebPilot.
//!
//! The executor talks to a live tab only through the
//! [`Page`](webpilot_core::page::Page) trait. A Chromium implementation is
//! available behind the `chromium` feature; tests use the scripted page in
//! [`mock`].

pub mod executor;
pub mod geometry;
pub mod registry;
pub mod scripts;
pub mod snapshot;
pub mod stability;
pub mod text;

#[cfg(feature = "chromium")]
pub mod chromium;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use executor::{DomExecutor, ResolvedElement};
pub use geometry::{Point, Visibility};
pub use registry::ElementRegistry;
pub use snapshot::ScriptSnapshotSource;
pub use stability::{Stability, StabilityGate};

#[cfg(feature = "chromium")]
pub use chromium::ChromiumPage;
