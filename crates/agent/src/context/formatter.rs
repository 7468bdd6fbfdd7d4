//! Prompt assembly for one model turn.
//!
//! The system part carries the tool vocabulary and output grammar. The user
//! part replays the chat history grouped into per-instruction segments,
//! followed by a context block describing the live page.
//!
//! # Determinism
//!
//! Output depends only on [`ContextInput`]: the clock reading and the page
//! location are passed in, never read here.

use chrono::{DateTime, Utc};
use std::fmt::Write;
use webpilot_core::action::TOOLS;
use webpilot_core::history::{EntryRole, HistoryEntry};
use webpilot_core::page::Snapshot;
use webpilot_core::provider::PromptParts;

use super::rules::{GENERAL_RULES, guidance_for};
use crate::parser::extract_tag;

/// Everything one prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct ContextInput<'a> {
    pub instructions: &'a str,
    /// The full chat history, oldest first.
    pub history: &'a [HistoryEntry],
    pub snapshot: &'a Snapshot,
    pub now: DateTime<Utc>,
}

/// One user instruction and everything recorded while pursuing it.
#[derive(Debug)]
struct Segment<'a> {
    prompt: &'a str,
    entries: Vec<&'a HistoryEntry>,
}

#[derive(Debug, Clone)]
pub struct ContextFormatter {
    snapshot_char_budget: usize,
}

impl ContextFormatter {
    pub fn new(snapshot_char_budget: usize) -> Self {
        Self {
            snapshot_char_budget: snapshot_char_budget.max(1),
        }
    }

    pub fn format(&self, input: &ContextInput<'_>) -> PromptParts {
        let mut user = format!("Task: {}\n\n", input.instructions);
        user.push_str(&self.render_history(input));
        user.push('\n');
        user.push_str(&self.context_block(input));
        PromptParts::new(system_prompt(), user)
    }

    /// Previous segments as bare action lines, the current one with reasoning.
    pub fn render_history(&self, input: &ContextInput<'_>) -> String {
        let segments = segments(input.history);
        let current = segments
            .iter()
            .rposition(|s| s.prompt == input.instructions);

        let mut out = String::new();
        let mut step = 0u32;
        let mut previous_header = false;

        for (index, segment) in segments.iter().enumerate() {
            if Some(index) == current {
                continue;
            }
            if !previous_header {
                out.push_str("## Previous tasks\n");
                previous_header = true;
            }
            let _ = writeln!(out, "Task: {}", segment.prompt);
            for entry in &segment.entries {
                if entry.role == EntryRole::Ai {
                    step += 1;
                    let _ = writeln!(out, "Step {step}: {}", action_line(entry));
                }
            }
        }

        out.push_str("## Current task\n");
        let Some(current) = current.map(|i| &segments[i]) else {
            out.push_str("No actions taken yet.\n");
            return out;
        };
        let mut any = false;
        for entry in &current.entries {
            match entry.role {
                EntryRole::Ai => {
                    step += 1;
                    any = true;
                    let _ = writeln!(out, "Step {step}:");
                    if let Some(thought) = extract_tag(&entry.content_text, "thought") {
                        let _ = writeln!(out, "  Thought: {thought}");
                    }
                    let _ = writeln!(out, "  Action: {}", action_line(entry));
                    if let Some(markup) = element_markup(entry, input.snapshot) {
                        let _ = writeln!(out, "  Element: {markup}");
                    }
                }
                EntryRole::Error => {
                    any = true;
                    let _ = writeln!(out, "  Error: {}", entry.content_text);
                }
                EntryRole::User => {}
            }
        }
        if !any {
            out.push_str("No actions taken yet.\n");
        }
        out
    }

    /// Time, location, the page snapshot and guidance.
    pub fn context_block(&self, input: &ContextInput<'_>) -> String {
        let mut out = String::from("# Context\n");
        let _ = writeln!(out, "Time: {}", input.now.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "URL: {}", input.snapshot.url);
        out.push_str("Page snapshot:\n");
        out.push_str(&self.truncate(&input.snapshot.text));
        if !out.ends_with('\n') {
            out.push('\n');
        }

        let guidance = guidance_for(&input.snapshot.url);
        if !guidance.is_empty() {
            out.push_str("\nSite guidance:\n");
            for line in guidance {
                let _ = writeln!(out, "- {line}");
            }
        }
        out.push_str("\nGeneral rules:\n");
        for line in GENERAL_RULES {
            let _ = writeln!(out, "- {line}");
        }
        out
    }

    fn truncate(&self, text: &str) -> String {
        let total = text.chars().count();
        if total <= self.snapshot_char_budget {
            return text.to_string();
        }
        let cut = text
            .char_indices()
            .nth(self.snapshot_char_budget)
            .map_or(text.len(), |(i, _)| i);
        format!(
            "{}\n[snapshot truncated: showing {} of {total} characters]\n",
            &text[..cut],
            self.snapshot_char_budget
        )
    }
}

/// Group entries by the user instruction that opened them.
fn segments(history: &[HistoryEntry]) -> Vec<Segment<'_>> {
    let mut out: Vec<Segment<'_>> = Vec::new();
    for entry in history {
        match entry.role {
            EntryRole::User => out.push(Segment {
                prompt: &entry.content_text,
                entries: Vec::new(),
            }),
            _ => match out.last_mut() {
                Some(segment) => segment.entries.push(entry),
                // Entries recorded before any instruction keep the prompt they carry.
                None => out.push(Segment {
                    prompt: entry.prompt_text.as_deref().unwrap_or_default(),
                    entries: vec![entry],
                }),
            },
        }
    }
    out
}

fn action_line(entry: &HistoryEntry) -> String {
    match &entry.action {
        Some(action) => action.to_string(),
        None => "(no valid action)".into(),
    }
}

/// Markup captured at dispatch time, else the id's line in the live snapshot.
fn element_markup<'a>(entry: &'a HistoryEntry, snapshot: &'a Snapshot) -> Option<&'a str> {
    if let Some(captured) = entry.element_snapshot.as_deref() {
        return Some(captured);
    }
    let id = entry.action.as_ref()?.args.get("elementId").and_then(|v| match v {
        webpilot_core::action::ArgValue::Number(n) if *n >= 0.0 && n.fract() == 0.0 => {
            u32::try_from(*n as u64).ok()
        }
        _ => None,
    })?;
    snapshot.line_for(id)
}

/// Tool vocabulary and output grammar.
pub fn system_prompt() -> String {
    let mut out = String::from(
        "You are a browser agent. You operate one web page on behalf of the user by \
         choosing exactly one tool call per turn.\n\n\
         The page is described as a snapshot. Interactive elements start with a \
         numeric id right before their tag, e.g. 42<button aria-label=\"Submit\">. \
         Refer to elements by that id.\n\n## Tools\n",
    );
    for tool in TOOLS {
        let _ = writeln!(out, "- {}: {}", tool.signature(), tool.description);
    }
    out.push_str(
        "\n## Output format\n\
         Reply with exactly one thought and one action:\n\
         <thought>your reasoning about the page and the next step</thought>\n\
         <action>toolName(arguments)</action>\n\n\
         String arguments must be fully quoted. Numbers and true/false are bare.\n\
         In setValue text, \\n presses Enter (submit) and may appear once, at the end. \
         \\r inserts a line break without submitting and may appear at most twice.\n\n\
         ## Example\n\
         <thought>The search box is element 12. I will type the query and submit it.</thought>\n\
         <action>setValue(12, \"running shoes\\n\")</action>\n",
    );
    out
}
