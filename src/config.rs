//! Configuration for the tree indexer.
//!
//! Supports both environment variables and a YAML config file.
//! Environment variables take precedence over config file values.

use crate::error::{Result, TreeIndexError};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Supported LLM providers.
///
/// Unknown provider names must fail fast at validation, before any
/// network call is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Any OpenAI-compatible chat-completions endpoint.
    OpenAi,
    /// The Anthropic messages API.
    Anthropic,
}

impl Provider {
    /// Default API base URL for the provider.
    pub fn default_api_base(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com",
            Provider::Anthropic => "https://api.anthropic.com",
        }
    }

    /// Default model name for the provider.
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Anthropic => "claude-3-5-haiku-latest",
        }
    }
}

impl FromStr for Provider {
    type Err = TreeIndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            other => Err(TreeIndexError::InvalidConfig(format!(
                "Unknown LLM provider '{}'. Supported providers: openai, anthropic.",
                other
            ))),
        }
    }
}

/// LLM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Which provider wire format to speak.
    pub provider: Provider,

    /// Base URL for the LLM API (e.g., "https://api.openai.com").
    pub api_base: String,

    /// API key for authentication.
    pub api_key: String,

    /// Model name (e.g., "gpt-4o-mini", "claude-3-5-haiku-latest").
    pub model: String,

    /// Maximum tokens for a response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum concurrent in-flight LLM calls. The pipeline sizes this
    /// from its `verification_concurrency` option; the value here applies
    /// to directly constructed clients.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry count for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff in milliseconds; doubles on each retry.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.0
}

fn default_max_concurrency() -> usize {
    20
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            api_base: String::new(),
            api_key: String::new(),
            model: String::new(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_concurrency: default_max_concurrency(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// LLM settings.
    pub llm: LlmConfig,
}

/// Configuration file structure (YAML format).
#[derive(Debug, Deserialize)]
struct ConfigFile {
    llm: Option<LlmFileSection>,
}

#[derive(Debug, Deserialize)]
struct LlmFileSection {
    provider: Option<String>,
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    max_concurrency: Option<usize>,
    timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (LLM_PROVIDER, LLM_API_BASE, LLM_API_KEY, LLM_MODEL)
    /// 2. Config file (~/.config/pdf-tree-index/config.yaml)
    /// 3. Provider defaults
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                config = Self::load_from_file(&config_path)?;
            }
        }

        if let Ok(provider) = env::var("LLM_PROVIDER") {
            config.llm.provider = provider.parse()?;
        }

        if let Ok(api_base) = env::var("LLM_API_BASE") {
            config.llm.api_base = api_base;
        }

        if let Ok(api_key) = env::var("LLM_API_KEY") {
            config.llm.api_key = api_key;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            config.llm.model = model;
        }

        if let Ok(max_tokens) = env::var("LLM_MAX_TOKENS") {
            if let Ok(tokens) = max_tokens.parse() {
                config.llm.max_tokens = tokens;
            }
        }

        if let Ok(temperature) = env::var("LLM_TEMPERATURE") {
            if let Ok(temp) = temperature.parse() {
                config.llm.temperature = temp;
            }
        }

        config.fill_provider_defaults();

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TreeIndexError::io(path, e))?;

        let file_config: ConfigFile = serde_yaml::from_str(&content).map_err(|e| {
            TreeIndexError::InvalidConfig(format!("Failed to parse config file: {}", e))
        })?;

        let mut config = Config::default();

        if let Some(llm) = file_config.llm {
            if let Some(provider) = llm.provider {
                config.llm.provider = provider.parse()?;
            }
            if let Some(api_base) = llm.api_base {
                config.llm.api_base = api_base;
            }
            if let Some(api_key) = llm.api_key {
                config.llm.api_key = api_key;
            }
            if let Some(model) = llm.model {
                config.llm.model = model;
            }
            if let Some(max_tokens) = llm.max_tokens {
                config.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                config.llm.temperature = temperature;
            }
            if let Some(max_concurrency) = llm.max_concurrency {
                config.llm.max_concurrency = max_concurrency;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                config.llm.timeout_secs = timeout_secs;
            }
        }

        config.fill_provider_defaults();

        Ok(config)
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "pdf-tree-index")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Fill api_base and model from provider defaults when unset.
    fn fill_provider_defaults(&mut self) {
        if self.llm.api_base.is_empty() {
            self.llm.api_base = self.llm.provider.default_api_base().to_string();
        }
        if self.llm.model.is_empty() {
            self.llm.model = self.llm.provider.default_model().to_string();
        }
    }

    /// Validate that required configuration is present.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.is_empty() {
            return Err(TreeIndexError::InvalidConfig(
                "LLM API key is required. Set LLM_API_KEY environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.api_base.is_empty() {
            return Err(TreeIndexError::InvalidConfig(
                "LLM API base URL is required. Set LLM_API_BASE environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.model.is_empty() {
            return Err(TreeIndexError::InvalidConfig(
                "LLM model is required. Set LLM_MODEL environment variable or add to config file."
                    .to_string(),
            ));
        }

        if self.llm.max_concurrency == 0 {
            return Err(TreeIndexError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a config from explicit values (useful for testing).
    pub fn with_llm(
        provider: Provider,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let mut config = Self {
            llm: LlmConfig {
                provider,
                api_key: api_key.into(),
                model: model.into(),
                ..Default::default()
            },
        };
        config.fill_provider_defaults();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!("Anthropic".parse::<Provider>().unwrap(), Provider::Anthropic);
        assert!("mistral".parse::<Provider>().is_err());
        assert!("".parse::<Provider>().is_err());
    }

    #[test]
    fn test_default_config_fails_validation() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_llm_fills_provider_defaults() {
        let config = Config::with_llm(Provider::Anthropic, "test-key", "claude-3-5-haiku-latest");
        assert_eq!(config.llm.api_base, "https://api.anthropic.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let llm = LlmConfig::default();
        assert_eq!(llm.max_tokens, 4096);
        assert_eq!(llm.temperature, 0.0);
        assert_eq!(llm.max_concurrency, 20);
        assert_eq!(llm.timeout_secs, 60);
        assert_eq!(llm.max_retries, 3);
    }
}
