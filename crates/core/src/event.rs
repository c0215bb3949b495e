use serde::{Deserialize, Serialize};

use crate::types::{SessionOutcome, StepStatus};

/// One structured progress event. The session orchestrator emits these over
/// an optional channel; surrounding transports (SSE, CLI) only ever consume
/// this stream plus the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    SessionStart {
        session_id: String,
        goal: String,
    },
    StepStart {
        step: u32,
    },
    /// The model is being consulted; `text` is its stated plan once known.
    AgenticThinking {
        step: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    StepComplete {
        step: u32,
        status: StepStatus,
        action: String,
        description: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    AgenticDone {
        step: u32,
        summary: String,
    },
    AgenticFail {
        step: u32,
        reason: String,
    },
    Complete {
        outcome: SessionOutcome,
        passed: bool,
        total_steps: u32,
        failed_steps: u32,
    },
    Error {
        message: String,
    },
}

/// Optional sink for progress events. Send failures are ignored — a closed
/// consumer must never stall the session.
pub type EventSink = tokio::sync::mpsc::UnboundedSender<AgentEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_a_type_tag() {
        let ev = AgentEvent::StepComplete {
            step: 3,
            status: StepStatus::Failed,
            action: "click".into(),
            description: "Click the Save button".into(),
            error: Some("element not found".into()),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "step_complete");
        assert_eq!(v["step"], 3);
        assert_eq!(v["status"], "failed");
    }

    #[test]
    fn optional_fields_are_omitted() {
        let ev = AgentEvent::AgenticThinking { step: 1, text: None };
        let v = serde_json::to_value(&ev).unwrap();
        assert!(v.get("text").is_none());
    }
}
