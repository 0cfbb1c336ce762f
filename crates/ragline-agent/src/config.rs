use ragline_core::{RagError, RagResult};
use serde::{Deserialize, Serialize};

/// Generation service flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Ollama `/api/generate`.
    #[default]
    Ollama,
    /// Any OpenAI-compatible chat completions endpoint.
    OpenAi,
}

/// `[model]` section: which generation service answers questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Overrides the built-in system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Language the answer should be written in, e.g. "Bahasa Indonesia".
    #[serde(default)]
    pub answer_language: Option<String>,
}

fn default_model_id() -> String {
    "llama2".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model_id: default_model_id(),
            api_key: None,
            api_base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            system_prompt: None,
            answer_language: None,
        }
    }
}

impl ModelConfig {
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url.trim_end_matches('/')
        } else {
            match self.provider {
                LlmProvider::Ollama => "http://localhost:11434",
                LlmProvider::OpenAi => "https://api.openai.com",
            }
        }
    }

    pub fn validate(&self) -> RagResult<()> {
        if self.model_id.trim().is_empty() {
            return Err(RagError::Config("model.model_id is empty".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(RagError::Config(format!(
                "model.temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 || self.timeout_secs == 0 {
            return Err(RagError::Config(
                "model.max_tokens and model.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_section() {
        let config: ModelConfig = toml::from_str("").unwrap();
        assert_eq!(config.provider, LlmProvider::Ollama);
        assert_eq!(config.model_id, "llama2");
        assert_eq!(config.max_tokens, 2000);
        assert_eq!(config.base_url(), "http://localhost:11434");
        config.validate().unwrap();
    }

    #[test]
    fn test_openai_section() {
        let config: ModelConfig = toml::from_str(
            r#"
            provider = "openai"
            model_id = "gpt-4o-mini"
            api_base_url = "http://localhost:8000/"
            temperature = 0.2
            answer_language = "Bahasa Indonesia"
            "#,
        )
        .unwrap();
        assert_eq!(config.provider, LlmProvider::OpenAi);
        assert_eq!(config.base_url(), "http://localhost:8000");
        assert_eq!(config.answer_language.as_deref(), Some("Bahasa Indonesia"));
    }

    #[test]
    fn test_validate_rejects_bad_temperature() {
        let config = ModelConfig {
            temperature: 3.5,
            ..ModelConfig::default()
        };
        assert!(matches!(config.validate(), Err(RagError::Config(_))));
    }
}
