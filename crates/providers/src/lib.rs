pub mod anthropic;
pub mod factory;
pub mod openai;

use async_trait::async_trait;
use webprobe_core::types::{ConversationTurn, TokenUsage};
use webprobe_core::Result;

/// Result of one model call: raw text plus the backend's token accounting.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// The single capability the engine needs from any model backend: send the
/// windowed conversation (text turns, observation turns may carry one
/// image) and get text back. Everything provider-specific — message
/// shapes, vision blocks, auth headers — stays below this trait.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn complete(&self, system: &str, turns: &[ConversationTurn]) -> Result<Completion>;

    /// Model identifier used for cost lookup and logging.
    fn model(&self) -> &str;
}

pub use anthropic::AnthropicProvider;
pub use factory::{create_provider, infer_provider_from_model};
pub use openai::OpenAIProvider;
