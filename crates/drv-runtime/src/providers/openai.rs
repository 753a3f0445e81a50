//! OpenAI-compatible chat-completions provider.
//!
//! Serves both OpenAI and endpoints that mirror its API (DeepSeek is the one
//! the default configuration uses for the reasoning role). HTTP support is
//! behind the `openai` feature; without it `complete` reports
//! `NotConfigured`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
#[cfg(feature = "openai")]
use std::time::Duration;

use super::{
    factory::ProviderFactory,
    secrets::{ApiCredential, CredentialSource},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError,
};
#[cfg(feature = "openai")]
use super::TokenUsage;

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DEEPSEEK_API_KEY_ENV: &str = "DEEPSEEK_API_KEY";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

/// Chat-completions client for an OpenAI-style endpoint.
pub struct OpenAiCompatibleProvider {
    name: String,
    credential: ApiCredential,
    base_url: String,
    #[cfg(feature = "openai")]
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCompatibleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleProvider")
            .field("name", &self.name)
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiCompatibleProvider {
    fn build(
        name: impl Into<String>,
        credential: ApiCredential,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            credential,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            #[cfg(feature = "openai")]
            client: reqwest::Client::new(),
        }
    }

    /// OpenAI with an explicit key.
    pub fn new(api_key: impl Into<String>) -> Self {
        let credential = ApiCredential::new(api_key, CredentialSource::Programmatic);
        Self::build("openai", credential, OPENAI_BASE_URL)
    }

    /// Build from JSON configuration.
    ///
    /// Recognized keys: `name`, `base_url`, `api_key`, `api_key_env`. The
    /// key falls back to the environment variable named by `api_key_env`
    /// (default `OPENAI_API_KEY`).
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let env_var = config["api_key_env"].as_str().unwrap_or(OPENAI_API_KEY_ENV);
        let credential = ApiCredential::resolve(config, "api_key", env_var)?;

        let name = config["name"].as_str().unwrap_or("openai");
        tracing::debug!(provider = name, source = %credential.source(), "Loaded API key");
        let base_url = config["base_url"].as_str().unwrap_or(OPENAI_BASE_URL);

        Ok(Self::build(name, credential, base_url))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Debug, Serialize)]
#[cfg_attr(not(feature = "openai"), allow(dead_code))]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(not(feature = "openai"), allow(dead_code))]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(not(feature = "openai"), allow(dead_code))]
struct ChatChoice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(not(feature = "openai"), allow(dead_code))]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(not(feature = "openai"), allow(dead_code))]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(not(feature = "openai"), allow(dead_code))]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(not(feature = "openai"), allow(dead_code))]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    #[cfg(feature = "openai")]
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = ChatRequest {
            model: &config.model,
            messages: &messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };

        // Only expose the credential at the point of use
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::AuthError);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("response had no choices".to_string()))?;

        let usage = body
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            usage,
            model: body.model,
            finish_reason: choice.finish_reason,
        })
    }

    #[cfg(not(feature = "openai"))]
    async fn complete(
        &self,
        _messages: Vec<ChatMessage>,
        _config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        Err(ProviderError::NotConfigured(
            "OpenAI-compatible provider requires the 'openai' feature".to_string(),
        ))
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Factory for OpenAI-compatible providers.
///
/// ```json
/// {
///   "name": "deepseek",
///   "base_url": "https://api.deepseek.com",
///   "api_key_env": "DEEPSEEK_API_KEY"
/// }
/// ```
pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "openai"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(OpenAiCompatibleProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        let env_var = config["api_key_env"].as_str().unwrap_or(OPENAI_API_KEY_ENV);
        if !ApiCredential::is_resolvable(config, "api_key", env_var) {
            return Err(ProviderError::NotConfigured(format!(
                "API key required: set 'api_key' in config or {} env",
                env_var
            )));
        }

        if let Some(url) = config["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }

        Ok(())
    }
}
