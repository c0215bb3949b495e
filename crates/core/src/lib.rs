pub mod action;
pub mod config;
pub mod error;
pub mod event;
pub mod paths;
pub mod types;

pub use action::{ActionKind, Decision, ScrollTarget, WaitValue};
pub use config::{Config, SessionSpec};
pub use error::{Error, Result};
pub use event::{AgentEvent, EventSink};
pub use paths::Paths;
pub use types::{
    ConversationTurn, CostBreakdown, Report, SessionOutcome, StepResult, StepStatus,
    TokenUsage, TurnRole,
};

/// Truncate a string to at most `max_chars` characters, respecting UTF-8
/// char boundaries. Returns a borrowed slice; never panics mid-codepoint.
pub fn safe_truncate(s: &str, max_chars: usize) -> &str {
    if s.chars().count() <= max_chars {
        return s;
    }
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(safe_truncate("héllo", 2), "hé");
        assert_eq!(safe_truncate("abc", 10), "abc");
        assert_eq!(safe_truncate("", 3), "");
    }
}
