use serde::{Deserialize, Serialize};

use crate::action::Decision;

/// Role of one entry in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// The permanent first turn carrying the goal and action protocol.
    System,
    /// A page-state snapshot (user message to the model).
    Observation,
    /// An action the model decided on (assistant message).
    Decision,
}

/// One entry in the bounded conversation window.
///
/// Only `Observation` turns may carry a screenshot (base64 PNG). The system
/// turn is always first and survives every trim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl ConversationTurn {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            text: text.into(),
            screenshot: None,
        }
    }

    pub fn observation(text: impl Into<String>, screenshot: Option<String>) -> Self {
        Self {
            role: TurnRole::Observation,
            text: text.into(),
            screenshot,
        }
    }

    pub fn decision(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Decision,
            text: text.into(),
            screenshot: None,
        }
    }
}

/// Token counts reported by a model backend for one call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Priced cost summary derived from accumulated token usage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub calls: u32,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
}

/// Immutable record of one executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step: u32,
    pub decision: Decision,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub console_errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// How a session left the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The model signalled `done`.
    Done,
    /// The model signalled `fail`.
    Failed,
    /// Step or wall-clock budget ran out. Not an error.
    BudgetExhausted,
    /// Decision failure or an unrecoverable engine error.
    FatalError,
}

/// Final aggregate for one session. Built once at teardown, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub session_id: String,
    pub goal: String,
    pub outcome: SessionOutcome,
    /// True only if the outcome is `Done` AND zero steps failed.
    pub passed: bool,
    pub total_steps: u32,
    pub failed_steps: u32,
    pub steps: Vec<StepResult>,
    pub summary: String,
    pub duration_ms: u64,
    pub cost: CostBreakdown,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_dir: Option<String>,
}

impl Report {
    /// Derive the overall pass flag from an outcome and the step list.
    pub fn derive_passed(outcome: SessionOutcome, steps: &[StepResult]) -> bool {
        outcome == SessionOutcome::Done
            && steps.iter().all(|s| s.status == StepStatus::Passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;

    fn step(n: u32, status: StepStatus) -> StepResult {
        StepResult {
            step: n,
            decision: Decision {
                kind: ActionKind::Screenshot,
                description: "capture".into(),
                reasoning: None,
            },
            status,
            duration_ms: 10,
            url: "https://example.com".into(),
            title: "Example".into(),
            console_errors: vec![],
            screenshot_path: None,
            error: None,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn passed_requires_done_and_clean_steps() {
        let clean = vec![step(1, StepStatus::Passed)];
        let dirty = vec![step(1, StepStatus::Passed), step(2, StepStatus::Failed)];

        assert!(Report::derive_passed(SessionOutcome::Done, &clean));
        assert!(!Report::derive_passed(SessionOutcome::Done, &dirty));
        assert!(!Report::derive_passed(SessionOutcome::BudgetExhausted, &clean));
        assert!(!Report::derive_passed(SessionOutcome::Failed, &clean));
        assert!(!Report::derive_passed(SessionOutcome::FatalError, &clean));
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let v = serde_json::to_value(SessionOutcome::BudgetExhausted).unwrap();
        assert_eq!(v, serde_json::json!("budget_exhausted"));
    }
}
