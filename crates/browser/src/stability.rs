//! Page-stability gate.
//!
//! A page is considered stable once the navigation lifecycle reports
//! `complete` and the readiness probe sees non-empty, non-busy content.
//! A settle delay follows. The whole wait is bounded; on timeout the gate
//! logs a warning and lets the caller proceed.

use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use webpilot_config::BrowserConfig;
use webpilot_core::page::{LoadState, Page};

use crate::scripts;

/// Outcome of a stability wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Ready,
    /// The timeout elapsed first; the caller proceeds anyway.
    TimedOut,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Probe {
    #[serde(default)]
    text_length: u64,
    #[serde(default)]
    busy: bool,
}

/// Polls a page until it looks settled.
#[derive(Debug, Clone)]
pub struct StabilityGate {
    pub timeout: Duration,
    pub poll: Duration,
    pub settle: Duration,
}

impl StabilityGate {
    pub fn from_config(config: &BrowserConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.stability_timeout_ms),
            poll: Duration::from_millis(config.poll_ms.max(1)),
            settle: Duration::from_millis(config.settle_ms),
        }
    }

    pub async fn await_stability(&self, page: &dyn Page) -> Stability {
        let deadline = Instant::now() + self.timeout;
        loop {
            if self.is_ready(page).await {
                tokio::time::sleep(self.settle).await;
                debug!("Page stable");
                return Stability::Ready;
            }
            if Instant::now() >= deadline {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Page did not stabilize in time, proceeding anyway"
                );
                return Stability::TimedOut;
            }
            tokio::time::sleep(self.poll).await;
        }
    }

    async fn is_ready(&self, page: &dyn Page) -> bool {
        match page.lifecycle().await {
            Ok(LoadState::Complete) => {}
            Ok(state) => {
                debug!(?state, "Page still loading");
                return false;
            }
            Err(e) => {
                debug!(error = %e, "Lifecycle check failed");
                return false;
            }
        }

        match page.evaluate(&scripts::readiness_probe()).await {
            Ok(value) => match serde_json::from_value::<Probe>(value) {
                Ok(probe) => probe.text_length > 0 && !probe.busy,
                Err(e) => {
                    debug!(error = %e, "Unexpected readiness probe result");
                    false
                }
            },
            Err(e) => {
                debug!(error = %e, "Readiness probe failed");
                false
            }
        }
    }
}

impl Default for StabilityGate {
    fn default() -> Self {
        Self::from_config(&BrowserConfig::default())
    }
}
