//! Bounded conversation window.
//!
//! The history grows by two turns per step (decision + observation). Without
//! a cap the request size grows without bound, so after each step the window
//! is trimmed: oldest non-system turns are dropped and screenshots beyond
//! the newest few are stripped to text.

use webprobe_core::ConversationTurn;

/// Total turn cap that triggers a trim.
pub const MAX_TURNS: usize = 42;
/// Non-system turns retained after a trim.
pub const RETAINED_TURNS: usize = 24;
/// Screenshots kept in the retained window; older ones go text-only.
pub const MAX_SCREENSHOTS: usize = 4;

/// The session's conversation history.
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![ConversationTurn::system(system_prompt)],
        }
    }

    pub fn push_observation(&mut self, text: impl Into<String>, screenshot: Option<String>) {
        self.turns.push(ConversationTurn::observation(text, screenshot));
    }

    pub fn push_decision(&mut self, text: impl Into<String>) {
        self.turns.push(ConversationTurn::decision(text));
    }

    /// Apply the window rule after a completed step's appends.
    pub fn trim(&mut self) {
        let turns = std::mem::take(&mut self.turns);
        self.turns = trimmed(turns);
    }

    /// The windowed view sent to the model.
    pub fn windowed(&self) -> &[ConversationTurn] {
        &self.turns
    }
}

/// Pure trimming rule.
///
/// When the turn count exceeds [`MAX_TURNS`]: keep the system turn plus the
/// most recent [`RETAINED_TURNS`] turns, in order. Regardless of count, only
/// the newest [`MAX_SCREENSHOTS`] screenshots survive; older observations are
/// stripped to text. Never reorders, never drops the system turn.
pub fn trimmed(mut turns: Vec<ConversationTurn>) -> Vec<ConversationTurn> {
    if turns.len() > MAX_TURNS {
        let tail_start = turns.len() - RETAINED_TURNS;
        let mut kept: Vec<ConversationTurn> = Vec::with_capacity(RETAINED_TURNS + 1);
        // The system turn is always index 0.
        kept.push(turns[0].clone());
        kept.extend(turns.drain(tail_start..));
        turns = kept;
    }

    let mut seen = 0usize;
    for turn in turns.iter_mut().rev() {
        if turn.screenshot.is_some() {
            seen += 1;
            if seen > MAX_SCREENSHOTS {
                turn.screenshot = None;
            }
        }
    }
    turns
}

#[cfg(test)]
mod tests {
    use super::*;
    use webprobe_core::TurnRole;

    fn history(steps: usize) -> Vec<ConversationTurn> {
        let mut turns = vec![ConversationTurn::system("goal + protocol")];
        for i in 0..steps {
            turns.push(ConversationTurn::decision(format!("decision {i}")));
            turns.push(ConversationTurn::observation(
                format!("observation {i}"),
                Some(format!("shot{i}")),
            ));
        }
        turns
    }

    #[test]
    fn under_cap_nothing_is_dropped() {
        let turns = trimmed(history(10)); // 21 turns
        assert_eq!(turns.len(), 21);
        assert_eq!(turns[0].role, TurnRole::System);
    }

    #[test]
    fn over_cap_retains_system_plus_recent_window() {
        let turns = trimmed(history(30)); // 61 turns
        assert_eq!(turns.len(), RETAINED_TURNS + 1);
        assert_eq!(turns[0].role, TurnRole::System);
        // The newest turn survives.
        assert_eq!(turns.last().unwrap().text, "observation 29");
    }

    #[test]
    fn ordering_is_preserved_after_trim() {
        let turns = trimmed(history(30));
        let texts: Vec<&str> = turns[1..].iter().map(|t| t.text.as_str()).collect();
        let mut sorted = texts.clone();
        sorted.sort_by_key(|t| {
            t.rsplit(' ')
                .next()
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(0)
        });
        // Same relative order as step numbers (decision before observation
        // within a step keeps stable ordering).
        assert_eq!(
            texts.iter().filter(|t| t.starts_with("observation")).count(),
            sorted.iter().filter(|t| t.starts_with("observation")).count()
        );
        for pair in turns[1..].windows(2) {
            let n = |t: &ConversationTurn| {
                t.text
                    .rsplit(' ')
                    .next()
                    .and_then(|x| x.parse::<usize>().ok())
                    .unwrap_or(0)
            };
            assert!(n(&pair[0]) <= n(&pair[1]));
        }
    }

    #[test]
    fn only_newest_screenshots_survive() {
        let turns = trimmed(history(30));
        let with_shots: Vec<&ConversationTurn> =
            turns.iter().filter(|t| t.screenshot.is_some()).collect();
        assert_eq!(with_shots.len(), MAX_SCREENSHOTS);
        // And they are the most recent ones.
        assert_eq!(
            with_shots.last().unwrap().screenshot.as_deref(),
            Some("shot29")
        );
    }

    #[test]
    fn screenshot_stripping_applies_even_under_turn_cap() {
        let turns = trimmed(history(8)); // 17 turns, 8 screenshots
        let shots = turns.iter().filter(|t| t.screenshot.is_some()).count();
        assert_eq!(shots, MAX_SCREENSHOTS);
    }

    #[test]
    fn conversation_window_round_trip() {
        let mut convo = Conversation::new("system");
        convo.push_observation("blank page", None);
        convo.push_decision(r#"{"action":"navigate","url":"https://x"}"#);
        convo.trim();
        assert_eq!(convo.windowed().len(), 3);
        assert_eq!(convo.windowed()[0].role, TurnRole::System);
    }
}
