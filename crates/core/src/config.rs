use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    /// Default model for this provider when the session does not pick one.
    #[serde(default)]
    pub model: Option<String>,
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub anthropic: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDefaults {
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    /// Settle delay between an action and the next observation.
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    /// Bounded output size for each model call.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Fixed low temperature — determinism over creativity.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_headless() -> bool {
    true
}

fn default_max_steps() -> u32 {
    25
}

fn default_max_duration_secs() -> u64 {
    600
}

fn default_step_delay_ms() -> u64 {
    1200
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

fn default_max_output_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.1
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            max_steps: default_max_steps(),
            max_duration_secs: default_max_duration_secs(),
            step_delay_ms: default_step_delay_ms(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub session: SessionDefaults,
    /// Preferred provider name ("openai" | "anthropic"). Optional; inferred
    /// from the model prefix or availability when absent.
    #[serde(default)]
    pub provider: Option<String>,
}

impl Config {
    /// Load config from `~/.webprobe/config.json` (or an explicit path),
    /// then fill missing API keys from the environment. A missing file
    /// yields defaults — keys can come entirely from env vars.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let paths = Paths::new();
        let file = path.map(|p| p.to_path_buf()).unwrap_or(paths.config_file());

        let mut config: Config = if file.is_file() {
            let raw = std::fs::read_to_string(&file)?;
            serde_json::from_str(&raw)?
        } else {
            Config::default()
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if self.providers.openai.api_key.is_empty() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                self.providers.openai.api_key = key;
            }
        }
        if self.providers.anthropic.api_key.is_empty() {
            if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
                self.providers.anthropic.api_key = key;
            }
        }
    }
}

/// Per-session parameters: the goal plus overrides of the configured
/// defaults. Built by the CLI (or an embedding transport) per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSpec {
    pub goal: String,
    #[serde(default)]
    pub start_url: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub headless: bool,
    pub max_steps: u32,
    pub max_duration_secs: u64,
    pub step_delay_ms: u64,
    pub viewport_width: u32,
    pub viewport_height: u32,
    #[serde(default)]
    pub record_video: bool,
}

impl SessionSpec {
    pub fn new(goal: impl Into<String>, defaults: &SessionDefaults) -> Self {
        Self {
            goal: goal.into(),
            start_url: None,
            provider: None,
            model: None,
            headless: defaults.headless,
            max_steps: defaults.max_steps,
            max_duration_secs: defaults.max_duration_secs,
            step_delay_ms: defaults.step_delay_ms,
            viewport_width: defaults.viewport_width,
            viewport_height: defaults.viewport_height,
            record_video: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let d = SessionDefaults::default();
        assert!(d.headless);
        assert_eq!(d.max_steps, 25);
        assert_eq!(d.viewport_width, 1280);
        assert!(d.temperature < 0.5);
    }

    #[test]
    fn config_parses_camel_case() {
        let raw = r#"{
            "providers": {
                "openai": { "apiKey": "sk-test", "model": "gpt-4o" }
            },
            "session": { "maxSteps": 5, "headless": false }
        }"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.providers.openai.api_key, "sk-test");
        assert!(cfg.providers.openai.is_configured());
        assert!(!cfg.providers.anthropic.is_configured());
        assert_eq!(cfg.session.max_steps, 5);
        assert!(!cfg.session.headless);
        // Unspecified fields keep their defaults.
        assert_eq!(cfg.session.viewport_height, 720);
    }

    #[test]
    fn spec_inherits_defaults() {
        let d = SessionDefaults::default();
        let spec = SessionSpec::new("verify the dashboard loads", &d);
        assert_eq!(spec.max_steps, d.max_steps);
        assert!(spec.start_url.is_none());
        assert!(!spec.record_video);
    }
}
