use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};
use webprobe_core::types::{ConversationTurn, TokenUsage, TurnRole};
use webprobe_core::{Error, Result};

use crate::{Completion, Provider};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Anthropic messages-API backend. Screenshots are sent as base64 image
/// source blocks; the system prompt rides as the top-level parameter.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicProvider {
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
                .unwrap_or(ANTHROPIC_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            max_tokens,
            temperature,
        }
    }

    /// The messages API rejects consecutive same-role entries, so turns
    /// sharing a role merge their content blocks into one message.
    fn build_messages(turns: &[ConversationTurn]) -> Vec<Value> {
        let mut messages: Vec<Value> = Vec::new();

        for turn in turns {
            let (role, blocks) = match turn.role {
                TurnRole::System => continue,
                TurnRole::Observation => {
                    let mut blocks = vec![json!({"type": "text", "text": turn.text})];
                    if let Some(ref shot) = turn.screenshot {
                        blocks.push(json!({
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": "image/png",
                                "data": shot,
                            }
                        }));
                    }
                    ("user", blocks)
                }
                TurnRole::Decision => {
                    ("assistant", vec![json!({"type": "text", "text": turn.text})])
                }
            };

            match messages.last_mut() {
                Some(last) if last["role"] == role => {
                    if let Some(content) = last["content"].as_array_mut() {
                        content.extend(blocks);
                    }
                }
                _ => messages.push(json!({"role": role, "content": blocks})),
            }
        }
        messages
    }

    fn build_request(&self, system: &str, turns: &[ConversationTurn]) -> Value {
        json!({
            "model": self.model,
            "system": system,
            "messages": Self::build_messages(turns),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(&self, system: &str, turns: &[ConversationTurn]) -> Result<Completion> {
        let url = format!("{}/messages", self.api_base);
        let request = self.build_request(system, turns);

        info!(
            model = %self.model,
            turns = turns.len(),
            "Calling Anthropic messages API"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Anthropic request failed: {e}")))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(status = %status, body = %raw_body, "Anthropic API error");
            return Err(Error::Provider(format!(
                "Anthropic API error {status}: {raw_body}"
            )));
        }

        let parsed: MessagesResponse = serde_json::from_str(&raw_body)
            .map_err(|e| Error::Provider(format!("Anthropic response parse failed: {e}")))?;

        let text = parsed
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        let usage = parsed.usage.unwrap_or_default();

        debug!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Anthropic call complete"
        );

        Ok(Completion {
            text,
            usage: TokenUsage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
            },
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
