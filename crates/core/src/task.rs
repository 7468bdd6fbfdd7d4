//! Task, progress and status types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level task state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Idle,
    Running,
    /// The agent stopped on its own (finished or responded).
    Completed,
    /// The agent finished with all tracked progress achieved.
    Success,
    /// The page or the agent rejected an action.
    Failed,
    /// Infrastructure, parse or unexpected failure.
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Success | Self::Failed | Self::Error
        )
    }
}

/// What the running loop is doing right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionStatus {
    #[default]
    Idle,
    Initializing,
    PullingDom,
    PerformingQuery,
    PerformingAction,
}

/// Substring indicators used to judge the outcome of an action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default)]
    pub success_indicators: Vec<String>,
    #[serde(default)]
    pub failure_indicators: Vec<String>,
    #[serde(default)]
    pub pending_indicators: Vec<String>,
}

impl ValidationRules {
    pub fn is_empty(&self) -> bool {
        self.success_indicators.is_empty()
            && self.failure_indicators.is_empty()
            && self.pending_indicators.is_empty()
    }
}

/// What a set of validation rules concluded about some page text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Pending(String),
    Failure(String),
    NoMatch,
}

impl ValidationRules {
    /// Judge `text` against the indicators.
    ///
    /// Failure wins over pending, pending wins over success. Matching is a
    /// case-insensitive substring test.
    pub fn judge(&self, text: &str) -> Verdict {
        let haystack = text.to_lowercase();
        let hit = |list: &[String]| {
            list.iter()
                .find(|i| !i.is_empty() && haystack.contains(&i.to_lowercase()))
                .cloned()
        };
        if let Some(indicator) = hit(&self.failure_indicators) {
            return Verdict::Failure(indicator);
        }
        if let Some(indicator) = hit(&self.pending_indicators) {
            return Verdict::Pending(indicator);
        }
        if self.success_indicators.is_empty() || hit(&self.success_indicators).is_some() {
            return Verdict::Success;
        }
        Verdict::NoMatch
    }
}

/// Progress counter for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub total: u32,
    pub completed: u32,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_rules: Option<ValidationRules>,
}

impl TaskProgress {
    pub fn new(total: u32, kind: impl Into<String>) -> Self {
        Self {
            total: total.max(1),
            completed: 0,
            kind: kind.into(),
            validation_rules: None,
        }
    }

    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.validation_rules = if rules.is_empty() { None } else { Some(rules) };
        self
    }

    /// Advance by one, saturating at `total`. Returns whether the counter moved.
    pub fn advance(&mut self) -> bool {
        if self.completed < self.total {
            self.completed += 1;
            true
        } else {
            false
        }
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

impl Default for TaskProgress {
    fn default() -> Self {
        Self::new(1, "single")
    }
}

/// Wall-clock bookkeeping for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTiming {
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskTiming {
    pub fn start() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        let end = self.finished_at.unwrap_or(self.updated_at);
        (end - self.started_at).num_milliseconds()
    }
}

/// The unit of work: one instruction being carried out in one chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub instructions: String,
    pub chat_id: String,
    pub progress: TaskProgress,
    pub timing: TaskTiming,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(instructions: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            chat_id: chat_id.into(),
            progress: TaskProgress::default(),
            timing: TaskTiming::start(),
            status: TaskStatus::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_saturates_at_total() {
        let mut p = TaskProgress::new(2, "count");
        assert!(p.advance());
        assert!(p.advance());
        assert!(!p.advance());
        assert_eq!(p.completed, 2);
        assert!(p.is_done());
    }

    #[test]
    fn zero_total_is_clamped() {
        let p = TaskProgress::new(0, "single");
        assert_eq!(p.total, 1);
    }

    #[test]
    fn empty_rules_are_dropped() {
        let p = TaskProgress::default().with_rules(ValidationRules::default());
        assert!(p.validation_rules.is_none());
    }

    #[test]
    fn unconfigured_rules_default_to_success() {
        assert_eq!(ValidationRules::default().judge("anything"), Verdict::Success);
    }

    #[test]
    fn judge_priorities() {
        let rules = ValidationRules {
            success_indicators: vec!["results for".into()],
            failure_indicators: vec!["no results".into()],
            pending_indicators: vec!["loading".into()],
        };
        assert_eq!(rules.judge("12 Results for shoes"), Verdict::Success);
        assert_eq!(
            rules.judge("No results. results for nothing"),
            Verdict::Failure("no results".into())
        );
        assert_eq!(
            rules.judge("Loading results for"),
            Verdict::Pending("loading".into())
        );
        assert_eq!(rules.judge("homepage"), Verdict::NoMatch);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TaskStatus::Success).unwrap(), r#""success""#);
        assert_eq!(
            serde_json::to_string(&ActionStatus::PullingDom).unwrap(),
            r#""pulling-dom""#
        );
        assert!(TaskStatus::Error.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }
}
