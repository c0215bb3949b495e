use tracing::warn;
use webprobe_core::{Config, Error, Result};

use crate::{AnthropicProvider, OpenAIProvider, Provider};

const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

/// Guess the backing provider from a model name prefix.
pub fn infer_provider_from_model(model: &str) -> Option<&'static str> {
    let m = model.to_lowercase();
    if m.starts_with("claude") {
        Some("anthropic")
    } else if m.starts_with("gpt") || m.starts_with("o1") || m.starts_with("o3") || m.starts_with("o4") {
        Some("openai")
    } else {
        None
    }
}

/// Build the provider for a session. Precedence: explicit provider request,
/// then inference from the requested model name, then config preference,
/// then whichever provider has a key. Falls back with a warning when the
/// preferred one is not configured.
pub fn create_provider(
    config: &Config,
    requested_provider: Option<&str>,
    requested_model: Option<&str>,
) -> Result<Box<dyn Provider>> {
    let preferred = requested_provider
        .map(|p| p.to_lowercase())
        .or_else(|| requested_model.and_then(infer_provider_from_model).map(String::from))
        .or_else(|| config.provider.clone());

    let name = match preferred.as_deref() {
        Some("openai") if config.providers.openai.is_configured() => "openai",
        Some("anthropic") if config.providers.anthropic.is_configured() => "anthropic",
        Some(other) => {
            let fallback = first_available(config).ok_or_else(|| {
                Error::Config(format!(
                    "provider '{other}' is not configured and no API key is set; \
                     set OPENAI_API_KEY or ANTHROPIC_API_KEY, or edit ~/.webprobe/config.json"
                ))
            })?;
            if matches!(other, "openai" | "anthropic") {
                warn!(requested = other, using = fallback, "Requested provider has no API key, substituting");
            } else {
                warn!(requested = other, using = fallback, "Unknown provider name, substituting");
            }
            fallback
        }
        None => first_available(config).ok_or_else(|| {
            Error::Config(
                "no provider configured; set OPENAI_API_KEY or ANTHROPIC_API_KEY, \
                 or edit ~/.webprobe/config.json"
                    .to_string(),
            )
        })?,
    };

    let session = &config.session;
    match name {
        "anthropic" => {
            let pc = &config.providers.anthropic;
            let model = requested_model
                .map(str::to_string)
                .or_else(|| pc.model.clone())
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string());
            Ok(Box::new(AnthropicProvider::new(
                &pc.api_key,
                pc.api_base.as_deref(),
                &model,
                session.max_output_tokens,
                session.temperature,
            )))
        }
        _ => {
            let pc = &config.providers.openai;
            let model = requested_model
                .map(str::to_string)
                .or_else(|| pc.model.clone())
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
            Ok(Box::new(OpenAIProvider::new(
                &pc.api_key,
                pc.api_base.as_deref(),
                &model,
                session.max_output_tokens,
                session.temperature,
            )))
        }
    }
}

fn first_available(config: &Config) -> Option<&'static str> {
    if config.providers.openai.is_configured() {
        Some("openai")
    } else if config.providers.anthropic.is_configured() {
        Some("anthropic")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(openai_key: &str, anthropic_key: &str) -> Config {
        let mut cfg = Config::default();
        cfg.providers.openai.api_key = openai_key.to_string();
        cfg.providers.anthropic.api_key = anthropic_key.to_string();
        cfg
    }

    #[test]
    fn infers_provider_from_model_prefix() {
        assert_eq!(infer_provider_from_model("claude-sonnet-4-20250514"), Some("anthropic"));
        assert_eq!(infer_provider_from_model("gpt-4o-mini"), Some("openai"));
        assert_eq!(infer_provider_from_model("o3-mini"), Some("openai"));
        assert_eq!(infer_provider_from_model("llama-3"), None);
    }

    #[test]
    fn model_name_selects_backend() {
        let cfg = config_with("sk-o", "sk-a");
        let p = create_provider(&cfg, None, Some("claude-sonnet-4-20250514")).unwrap();
        assert!(p.model().starts_with("claude"));
    }

    #[test]
    fn falls_back_when_preferred_has_no_key() {
        let cfg = config_with("sk-o", "");
        let p = create_provider(&cfg, Some("anthropic"), None).unwrap();
        assert_eq!(p.model(), DEFAULT_OPENAI_MODEL);
    }

    #[test]
    fn errors_when_nothing_is_configured() {
        let cfg = config_with("", "");
        assert!(create_provider(&cfg, None, None).is_err());
    }
}
