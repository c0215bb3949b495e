//! One model call per step: send the windowed conversation, parse the
//! returned action, record token usage.

use tracing::debug;
use webprobe_core::{ConversationTurn, Decision, Result};
use webprobe_providers::Provider;

use crate::cost::CostTracker;

pub struct DecisionEngine {
    provider: Box<dyn Provider>,
    pub cost: CostTracker,
}

impl DecisionEngine {
    pub fn new(provider: Box<dyn Provider>) -> Self {
        let cost = CostTracker::new(provider.model());
        Self { provider, cost }
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Ask the model for the next action. A response that does not parse is
    /// a decision failure; the caller terminates the session on it.
    pub async fn decide(&mut self, system: &str, turns: &[ConversationTurn]) -> Result<Decision> {
        let completion = self.provider.complete(system, turns).await?;
        self.cost.record(completion.usage);
        debug!(
            output_chars = completion.text.len(),
            total_tokens = completion.usage.total(),
            "Model responded"
        );
        Decision::parse(&completion.text)
    }

    /// Best-effort closing summary for the report. Any failure falls back
    /// to the provided default text.
    pub async fn summarize(
        &mut self,
        system: &str,
        turns: &[ConversationTurn],
        fallback: &str,
    ) -> String {
        let mut prompt_turns = turns.to_vec();
        prompt_turns.push(ConversationTurn::observation(
            "The session has ended. In two or three plain sentences, summarize what was \
             tested, what worked, and what (if anything) failed. Respond with prose only.",
            None,
        ));
        match self.provider.complete(system, &prompt_turns).await {
            Ok(completion) => {
                self.cost.record(completion.usage);
                let text = completion.text.trim();
                if text.is_empty() {
                    fallback.to_string()
                } else {
                    text.to_string()
                }
            }
            Err(_) => fallback.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use webprobe_core::{ActionKind, Error, TokenUsage};
    use webprobe_providers::Completion;

    struct ScriptedProvider {
        responses: Mutex<Vec<std::result::Result<String, String>>>,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn complete(
            &self,
            _system: &str,
            _turns: &[ConversationTurn],
        ) -> Result<Completion> {
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err("exhausted".to_string()));
            match next {
                Ok(text) => Ok(Completion {
                    text,
                    usage: TokenUsage {
                        input_tokens: 100,
                        output_tokens: 20,
                    },
                }),
                Err(e) => Err(Error::Provider(e)),
            }
        }

        fn model(&self) -> &str {
            "gpt-4o"
        }
    }

    fn engine_with(responses: Vec<std::result::Result<String, String>>) -> DecisionEngine {
        DecisionEngine::new(Box::new(ScriptedProvider {
            responses: Mutex::new(responses),
        }))
    }

    #[tokio::test]
    async fn decide_parses_and_records_usage() {
        let mut engine =
            engine_with(vec![Ok(r#"{"action":"verify_no_error"}"#.to_string())]);
        let decision = engine.decide("sys", &[]).await.unwrap();
        assert_eq!(decision.kind, ActionKind::VerifyNoError);
        let b = engine.cost.breakdown();
        assert_eq!(b.calls, 1);
        assert_eq!(b.input_tokens, 100);
    }

    #[tokio::test]
    async fn malformed_output_is_a_decision_error() {
        let mut engine = engine_with(vec![Ok("I cannot decide right now.".to_string())]);
        let err = engine.decide("sys", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Decision(_)));
    }

    #[tokio::test]
    async fn summarize_falls_back_on_provider_error() {
        let mut engine = engine_with(vec![Err("backend down".to_string())]);
        let summary = engine.summarize("sys", &[], "goal reached").await;
        assert_eq!(summary, "goal reached");
    }
}
