//! The WebPilot agent: parse model replies, build prompts, and drive tasks.
//!
//! One task runs as a loop over three action sub-states:
//!
//! 1. **Pull the DOM**: wait for the page to settle and capture a snapshot
//! 2. **Query the model**: format history and page context, invoke the gateway
//! 3. **Act**: parse the reply, dispatch the action, judge the page afterwards
//!
//! The loop ends on a terminal action, on the first error, on the step
//! budget, or on an interrupt.

pub mod context;
pub mod orchestrator;
pub mod parser;

#[cfg(test)]
mod test_helpers;

pub use context::{ContextFormatter, ContextInput};
pub use orchestrator::{OrchestratorError, RunSettings, Session, TaskOrchestrator};
pub use parser::{ParseError, ParsedResponse, parse_action, parse_response};
