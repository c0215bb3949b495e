use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};
use webprobe_core::types::{ConversationTurn, TokenUsage, TurnRole};
use webprobe_core::{Error, Result};

use crate::{Completion, Provider};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible chat-completions backend. The large-context option:
/// screenshots ride along as `image_url` data-URI content parts.
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAIProvider {
    pub fn new(
        api_key: &str,
        api_base: Option<&str>,
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key: api_key.to_string(),
            api_base: api_base
                .unwrap_or(OPENAI_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            max_tokens,
            temperature,
        }
    }

    /// Map conversation turns to chat-completions messages.
    fn build_messages(system: &str, turns: &[ConversationTurn]) -> Vec<Value> {
        let mut messages = vec![json!({"role": "system", "content": system})];

        for turn in turns {
            match turn.role {
                // The system turn travels as the dedicated parameter above;
                // skip any copy kept in the window.
                TurnRole::System => {}
                TurnRole::Observation => {
                    if let Some(ref shot) = turn.screenshot {
                        messages.push(json!({
                            "role": "user",
                            "content": [
                                {"type": "text", "text": turn.text},
                                {
                                    "type": "image_url",
                                    "image_url": {
                                        "url": format!("data:image/png;base64,{}", shot)
                                    }
                                }
                            ]
                        }));
                    } else {
                        messages.push(json!({"role": "user", "content": turn.text}));
                    }
                }
                TurnRole::Decision => {
                    messages.push(json!({"role": "assistant", "content": turn.text}));
                }
            }
        }
        messages
    }

    fn build_request(&self, system: &str, turns: &[ConversationTurn]) -> Value {
        json!({
            "model": self.model,
            "messages": Self::build_messages(system, turns),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn complete(&self, system: &str, turns: &[ConversationTurn]) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.api_base);
        let request = self.build_request(system, turns);

        info!(
            model = %self.model,
            turns = turns.len(),
            "Calling OpenAI chat completions"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("OpenAI request failed: {e}")))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(status = %status, body = %raw_body, "OpenAI API error");
            return Err(Error::Provider(format!(
                "OpenAI API error {status}: {raw_body}"
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&raw_body)
            .map_err(|e| Error::Provider(format!("OpenAI response parse failed: {e}")))?;

        let text = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let usage = parsed.usage.unwrap_or_default();

        debug!(
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            "OpenAI call complete"
        );

        Ok(Completion {
            text,
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAIProvider {
        OpenAIProvider::new("sk-test", None, "gpt-4o", 1024, 0.1)
    }

    #[test]
    fn request_has_low_temperature_and_bounded_output() {
        let req = provider().build_request("sys", &[]);
        assert!(req["temperature"].as_f64().unwrap() < 0.5);
        assert_eq!(req["max_tokens"], 1024);
        assert_eq!(req["model"], "gpt-4o");
    }

    #[test]
    fn observation_with_screenshot_becomes_image_part() {
        let turns = vec![ConversationTurn::observation("PAGE STATE", Some("aGk=".into()))];
        let req = provider().build_request("sys", &turns);
        let msgs = req["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1]["role"], "user");
        let parts = msgs[1]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert!(parts[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[test]
    fn decision_turns_become_assistant_messages() {
        let turns = vec![
            ConversationTurn::observation("obs", None),
            ConversationTurn::decision(r#"{"action":"screenshot"}"#),
        ];
        let req = provider().build_request("sys", &turns);
        let msgs = req["messages"].as_array().unwrap();
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[1]["role"], "user");
        assert_eq!(msgs[2]["role"], "assistant");
    }
}
