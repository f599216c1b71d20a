//! LLM client configuration.

use serde::{Deserialize, Serialize};

/// LLM provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Ollama API (local, default)
    #[default]
    Ollama,
    /// OpenAI-compatible API (OpenAI, Groq, Together.ai, etc.)
    OpenAI,
    /// Google Generative Language API (Gemini)
    Gemini,
}

impl LlmProvider {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Some(Self::Ollama),
            "openai" | "groq" | "together" => Some(Self::OpenAI),
            "gemini" | "google" => Some(Self::Gemini),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAI => "openai",
            Self::Gemini => "gemini",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Self::Ollama => "llama3.1:8b",
            Self::OpenAI => "gpt-4o-mini",
            Self::Gemini => "gemini-1.5-flash",
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoint for a provider name as given in `LLM_PROVIDER`.
fn endpoint_for(provider_name: &str) -> Option<&'static str> {
    match provider_name {
        "groq" => Some("https://api.groq.com/openai"),
        "openai" => Some("https://api.openai.com"),
        "together" => Some("https://api.together.xyz"),
        "gemini" | "google" => Some("https://generativelanguage.googleapis.com"),
        _ => None,
    }
}

/// Configuration for the model boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// LLM provider (ollama, openai or gemini)
    #[serde(default)]
    pub provider: LlmProvider,
    /// API endpoint (provider-specific defaults apply)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// API key for hosted providers
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Model name
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens in response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Temperature for generation (0.0 - 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// HTTP timeout for a single model call, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Replace model-call faults with the `API_Error` sentinel payload
    #[serde(default = "default_degrade_errors")]
    pub degrade_errors: bool,
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    LlmProvider::Ollama.default_model().to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.1
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_degrade_errors() -> bool {
    true
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self::base_default().with_env_overrides()
    }
}

impl LlmConfig {
    /// Defaults without consulting the environment.
    pub fn base_default() -> Self {
        Self {
            provider: LlmProvider::default(),
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
            degrade_errors: default_degrade_errors(),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `LLM_PROVIDER`: "ollama" (default), "gemini", "openai", "groq", or "together"
    /// - `LLM_ENDPOINT`: API endpoint (defaults based on provider)
    /// - `LLM_API_KEY`: API key for any hosted provider
    /// - `GOOGLE_API_KEY` / `GEMINI_API_KEY`, `GROQ_API_KEY`, `OPENAI_API_KEY`
    /// - `LLM_MODEL`: Model name
    /// - `LLM_MAX_TOKENS`, `LLM_TEMPERATURE`, `LLM_TIMEOUT_SECS`
    /// - `LLM_DEGRADE_ERRORS`: "false" to surface model faults instead of the sentinel payload
    ///
    /// An explicit `LLM_PROVIDER` wins over auto-detection from API keys.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn with_overrides_from(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        let provider_before = self.provider;

        let explicit_provider = var("LLM_PROVIDER").map(|p| p.to_lowercase());
        if let Some(ref val) = explicit_provider {
            if let Some(provider) = LlmProvider::from_name(val) {
                self.provider = provider;
            }
        }

        let explicit_endpoint = var("LLM_ENDPOINT");
        if let Some(ref endpoint) = explicit_endpoint {
            self.endpoint = endpoint.clone();
        }

        if let Some(key) = var("LLM_API_KEY") {
            self.api_key = Some(key);
        }

        let google_key = || var("GOOGLE_API_KEY").or_else(|| var("GEMINI_API_KEY"));

        if let Some(ref provider_name) = explicit_provider {
            if explicit_endpoint.is_none() {
                if let Some(endpoint) = endpoint_for(provider_name) {
                    self.endpoint = endpoint.to_string();
                }
            }
            if self.api_key.is_none() {
                self.api_key = match provider_name.as_str() {
                    "gemini" | "google" => google_key(),
                    "groq" => var("GROQ_API_KEY"),
                    "openai" => var("OPENAI_API_KEY"),
                    _ => None,
                };
            }
        } else if self.api_key.is_none() {
            // No explicit provider - auto-detect from available keys
            let detected = if let Some(key) = google_key() {
                Some((key, LlmProvider::Gemini, "gemini"))
            } else if let Some(key) = var("GROQ_API_KEY") {
                Some((key, LlmProvider::OpenAI, "groq"))
            } else {
                var("OPENAI_API_KEY").map(|key| (key, LlmProvider::OpenAI, "openai"))
            };
            if let Some((key, provider, name)) = detected {
                self.api_key = Some(key);
                self.provider = provider;
                if explicit_endpoint.is_none() {
                    if let Some(endpoint) = endpoint_for(name) {
                        self.endpoint = endpoint.to_string();
                    }
                }
            }
        }

        if let Some(model) = var("LLM_MODEL") {
            self.model = model;
        } else if self.provider != provider_before
            && self.model == provider_before.default_model()
        {
            self.model = self.provider.default_model().to_string();
        }

        if let Some(n) = var("LLM_MAX_TOKENS").and_then(|v| v.parse().ok()) {
            self.max_tokens = n;
        }
        if let Some(t) = var("LLM_TEMPERATURE").and_then(|v| v.parse().ok()) {
            self.temperature = t;
        }
        if let Some(s) = var("LLM_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.request_timeout_secs = s;
        }
        if let Some(val) = var("LLM_DEGRADE_ERRORS") {
            self.degrade_errors = val.eq_ignore_ascii_case("true") || val == "1";
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_base_default() {
        let config = LlmConfig::base_default();
        assert_eq!(config.provider, LlmProvider::Ollama);
        assert_eq!(config.endpoint, "http://localhost:11434");
        assert!(config.degrade_errors);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_google_key_selects_gemini() {
        let config =
            LlmConfig::base_default().with_overrides_from(vars(&[("GOOGLE_API_KEY", "g-123")]));
        assert_eq!(config.provider, LlmProvider::Gemini);
        assert_eq!(config.api_key.as_deref(), Some("g-123"));
        assert_eq!(config.model, "gemini-1.5-flash");
        assert!(config.endpoint.contains("generativelanguage"));
    }

    #[test]
    fn test_explicit_provider_wins() {
        let config = LlmConfig::base_default().with_overrides_from(vars(&[
            ("LLM_PROVIDER", "groq"),
            ("GOOGLE_API_KEY", "g-123"),
            ("GROQ_API_KEY", "gsk-1"),
            ("LLM_MODEL", "llama-3.1-70b-versatile"),
        ]));
        assert_eq!(config.provider, LlmProvider::OpenAI);
        assert_eq!(config.api_key.as_deref(), Some("gsk-1"));
        assert_eq!(config.endpoint, "https://api.groq.com/openai");
        assert_eq!(config.model, "llama-3.1-70b-versatile");
    }

    #[test]
    fn test_degrade_override() {
        let config =
            LlmConfig::base_default().with_overrides_from(vars(&[("LLM_DEGRADE_ERRORS", "false")]));
        assert!(!config.degrade_errors);
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = LlmConfig::base_default();
        config.api_key = Some("secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
