//! LLM adapter used for analytics narratives.
//!
//! DESIGN
//! ======
//! Configured from environment variables. The client is optional: when the
//! key is missing, startup logs a warning and narrative endpoints answer
//! `E_AI_UNAVAILABLE`. Everything else in the service works without it.

pub mod anthropic;
pub mod types;

use std::time::Duration;

use crate::config::env_parse;
pub use types::LlmChat;
use types::{ChatResponse, LlmError, Message};

const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Typed LLM configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl LlmConfig {
    /// Required: `LLM_API_KEY_ENV` naming the env var that holds the key.
    /// Optional: `LLM_MODEL`, `LLM_REQUEST_TIMEOUT_SECS`, `LLM_CONNECT_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::MissingApiKey`] when either variable is unset.
    pub fn from_env() -> Result<Self, LlmError> {
        let key_var =
            std::env::var("LLM_API_KEY_ENV").map_err(|_| LlmError::MissingApiKey { var: "LLM_API_KEY_ENV".into() })?;
        let api_key = std::env::var(&key_var).map_err(|_| LlmError::MissingApiKey { var: key_var.clone() })?;

        Ok(Self {
            api_key,
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_owned()),
            request_timeout: Duration::from_secs(env_parse("LLM_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)),
            connect_timeout: Duration::from_secs(env_parse("LLM_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)),
        })
    }
}

/// Concrete LLM client backed by the Anthropic Messages API.
pub struct LlmClient {
    inner: anthropic::AnthropicClient,
    model: String,
}

impl LlmClient {
    /// # Errors
    ///
    /// Returns an error if the API key is missing or the HTTP client fails.
    pub fn from_env() -> Result<Self, LlmError> {
        let config = LlmConfig::from_env()?;
        let inner = anthropic::AnthropicClient::new(config.api_key, config.request_timeout, config.connect_timeout)?;
        Ok(Self { inner, model: config.model })
    }
}

#[async_trait::async_trait]
impl LlmChat for LlmClient {
    async fn chat(&self, max_tokens: u32, system: &str, messages: &[Message]) -> Result<ChatResponse, LlmError> {
        self.inner.chat(&self.model, max_tokens, system, messages).await
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
