//! Text-model providers.
//!
//! The classifier, consistency judge, reasoner and feedback writer are all
//! chat-completion endpoints behind [`LlmProvider`]. Concrete backends:
//! - [`OpenAiCompatibleProvider`] (feature `openai`): OpenAI and any
//!   endpoint speaking the same chat-completions dialect (e.g. DeepSeek)
//! - [`RetryingProvider`]: exponential backoff around any provider
//!
//! Credentials go through the [`secrets`] module so they never reach logs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::resilience::CallFailure;

mod factory;
mod openai;
mod retry;
pub mod secrets;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use openai::{
    OpenAiCompatibleProvider, OpenAiProviderFactory, DEEPSEEK_API_KEY_ENV, DEEPSEEK_BASE_URL,
    OPENAI_API_KEY_ENV, OPENAI_BASE_URL,
};
pub use retry::{RetryPolicy, RetryingProvider};
pub use secrets::{ApiCredential, CredentialSource};

/// Errors from text-model providers.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Response parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::HttpError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_) => true,
            ProviderError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl CallFailure for ProviderError {
    fn is_persistent(&self) -> bool {
        matches!(self, ProviderError::AuthError | ProviderError::NotConfigured(_))
    }
}

/// Settings for one completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub model: String,

    pub max_tokens: u32,

    pub temperature: f32,

    /// Per-request HTTP timeout
    #[serde(with = "crate::config::humantime_serde")]
    pub timeout: Duration,
}

impl CompletionConfig {
    pub fn new(model: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            temperature,
            ..Default::default()
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_tokens: 1024,
            temperature: 0.1,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A chat message for completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Response from a completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: TokenUsage,
    /// Model that actually served the request
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Token accounting for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A chat-completion backend.
///
/// Providers are shared across concurrent entity tasks, so implementations
/// must tolerate concurrent `complete` calls.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    async fn health_check(&self) -> bool;

    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Rough token count for budget checks (~4 chars per token).
    fn estimate_tokens(&self, text: &str) -> u32 {
        (text.len() / 4) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_roles_serialize_lowercase() {
        let json = serde_json::to_value(ChatMessage::system("be terse")).unwrap();
        assert_eq!(json["role"], "system");

        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(ChatMessage::assistant("ok").role, ChatRole::Assistant);
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 120,
            completion_tokens: 30,
        };
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn test_transient_errors() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_transient());
        assert!(ProviderError::ApiError {
            status: 503,
            message: "overloaded".to_string()
        }
        .is_transient());
        assert!(!ProviderError::ApiError {
            status: 400,
            message: "bad request".to_string()
        }
        .is_transient());
        assert!(!ProviderError::AuthError.is_transient());
    }
}
