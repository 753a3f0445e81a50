//! Runtime configuration.
//!
//! Loaded from YAML. Durations are written in humantime form (`"30s"`,
//! `"2m"`). Every field has a default, so an empty document is valid.
//!
//! ```yaml
//! sampling_stride: 2
//! max_concurrency: 8
//! timeouts:
//!   grounder: 90s
//! text:
//!   reason:
//!     provider: openai
//!     settings: { name: deepseek, base_url: "https://api.deepseek.com", api_key_env: DEEPSEEK_API_KEY }
//!     completion: { model: deepseek-chat, max_tokens: 1024, temperature: 0.1, timeout: 60s }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use drv_core::MAX_CAUSAL_FRAMES;

use crate::collaborators::{CollaboratorRole, DetectionThresholds, TextRole};
use crate::providers::{
    CompletionConfig, LlmProvider, ProviderError, ProviderRegistry, RetryPolicy,
    RetryingProvider, DEEPSEEK_API_KEY_ENV, DEEPSEEK_BASE_URL, OPENAI_API_KEY_ENV,
    OPENAI_BASE_URL,
};
use crate::resilience::CircuitBreakerConfig;

/// `serde(with = ...)` adapter for humantime durations.
pub mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

/// Errors from loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Provider for text.{role} rejected its settings: {source}")]
    Provider {
        role: TextRole,
        #[source]
        source: ProviderError,
    },
}

/// Per-role call timeouts. A timed-out call abstains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    #[serde(with = "humantime_serde")]
    pub detector: Duration,

    #[serde(with = "humantime_serde")]
    pub segmenter: Duration,

    #[serde(with = "humantime_serde")]
    pub grounder: Duration,

    #[serde(with = "humantime_serde")]
    pub captioner: Duration,

    /// Applies to all four text roles.
    #[serde(with = "humantime_serde")]
    pub text: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            detector: Duration::from_secs(15),
            segmenter: Duration::from_secs(15),
            grounder: Duration::from_secs(120),
            captioner: Duration::from_secs(120),
            text: Duration::from_secs(60),
        }
    }
}

impl TimeoutConfig {
    pub fn for_role(&self, role: CollaboratorRole) -> Duration {
        match role {
            CollaboratorRole::ClassDetector | CollaboratorRole::GroundedDetector => self.detector,
            CollaboratorRole::Segmenter => self.segmenter,
            CollaboratorRole::PrimaryGrounder | CollaboratorRole::SecondaryGrounder => {
                self.grounder
            }
            CollaboratorRole::Captioner => self.captioner,
            CollaboratorRole::Classifier
            | CollaboratorRole::Judge
            | CollaboratorRole::Reasoner
            | CollaboratorRole::FeedbackWriter => self.text,
        }
    }

    fn all(&self) -> [(&'static str, Duration); 5] {
        [
            ("detector", self.detector),
            ("segmenter", self.segmenter),
            ("grounder", self.grounder),
            ("captioner", self.captioner),
            ("text", self.text),
        ]
    }
}

/// Token budgets for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub global_max_tokens: u32,

    /// Roles missing from the map are only bound by the global budget.
    /// Reason and feedback calls count against both but are never refused.
    pub per_role_max_tokens: BTreeMap<TextRole, u32>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        let per_role_max_tokens = BTreeMap::from([
            (TextRole::Classify, 4_000),
            (TextRole::Judge, 24_000),
        ]);
        Self {
            global_max_tokens: 48_000,
            per_role_max_tokens,
        }
    }
}

/// How to build and call the provider for one text role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRoleConfig {
    /// Registered provider type, e.g. `"openai"`.
    pub provider: String,

    /// Provider-specific settings passed to its factory.
    #[serde(default)]
    pub settings: JsonValue,

    pub completion: CompletionConfig,
}

impl TextRoleConfig {
    fn openai_compatible(
        name: &str,
        base_url: &str,
        api_key_env: &str,
        completion: CompletionConfig,
    ) -> Self {
        Self {
            provider: "openai".to_string(),
            settings: serde_json::json!({
                "name": name,
                "base_url": base_url,
                "api_key_env": api_key_env,
            }),
            completion,
        }
    }
}

/// Text-model settings for all four roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextRolesConfig {
    pub classify: TextRoleConfig,
    pub judge: TextRoleConfig,
    pub reason: TextRoleConfig,
    pub feedback: TextRoleConfig,
}

impl Default for TextRolesConfig {
    fn default() -> Self {
        Self {
            classify: TextRoleConfig::openai_compatible(
                "openai",
                OPENAI_BASE_URL,
                OPENAI_API_KEY_ENV,
                CompletionConfig::new("gpt-4o", 0.1),
            ),
            // Served locally behind an OpenAI-compatible endpoint
            judge: TextRoleConfig::openai_compatible(
                "qwen2-vl",
                "http://localhost:8000/v1",
                "QWEN_API_KEY",
                CompletionConfig::new("qwen2-vl", 0.2),
            ),
            reason: TextRoleConfig::openai_compatible(
                "deepseek",
                DEEPSEEK_BASE_URL,
                DEEPSEEK_API_KEY_ENV,
                CompletionConfig::new("deepseek-chat", 0.1),
            ),
            feedback: TextRoleConfig::openai_compatible(
                "openai",
                OPENAI_BASE_URL,
                OPENAI_API_KEY_ENV,
                CompletionConfig::new("gpt-4o", 0.6),
            ),
        }
    }
}

impl TextRolesConfig {
    pub fn for_role(&self, role: TextRole) -> &TextRoleConfig {
        match role {
            TextRole::Classify => &self.classify,
            TextRole::Judge => &self.judge,
            TextRole::Reason => &self.reason,
            TextRole::Feedback => &self.feedback,
        }
    }
}

/// Configuration for a verification pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Keep every n-th decoded frame.
    pub sampling_stride: usize,

    pub detection: DetectionThresholds,

    /// Upper bound on frames sent to the captioner per claim.
    pub max_causal_frames: usize,

    /// Entities processed concurrently within one stage.
    pub max_concurrency: usize,

    pub timeouts: TimeoutConfig,

    pub circuit_breaker: CircuitBreakerConfig,

    pub budgets: BudgetConfig,

    /// Backoff applied inside each text provider.
    pub retry: RetryPolicy,

    pub text: TextRolesConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sampling_stride: 1,
            detection: DetectionThresholds::default(),
            max_causal_frames: MAX_CAUSAL_FRAMES,
            max_concurrency: 4,
            timeouts: TimeoutConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            budgets: BudgetConfig::default(),
            retry: RetryPolicy::default(),
            text: TextRolesConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling_stride == 0 {
            return Err(ConfigError::Invalid(
                "sampling_stride must be at least 1".to_string(),
            ));
        }
        if self.max_causal_frames == 0 {
            return Err(ConfigError::Invalid(
                "max_causal_frames must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        let DetectionThresholds {
            box_threshold,
            text_threshold,
        } = self.detection;
        let thresholds = [("box_threshold", box_threshold), ("text_threshold", text_threshold)];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "detection.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        for (name, timeout) in self.timeouts.all() {
            if timeout.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "timeouts.{} must be positive",
                    name
                )));
            }
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }

        for role in TextRole::ALL {
            let completion = &self.text.for_role(role).completion;
            if !(0.0..=2.0).contains(&completion.temperature) {
                return Err(ConfigError::Invalid(format!(
                    "text.{}.completion.temperature must be within [0, 2]",
                    role
                )));
            }
            if completion.max_tokens == 0 {
                return Err(ConfigError::Invalid(format!(
                    "text.{}.completion.max_tokens must be positive",
                    role
                )));
            }
        }

        Ok(())
    }

    /// Timeout for one collaborator call.
    pub fn role_timeout(&self, role: CollaboratorRole) -> Duration {
        self.timeouts.for_role(role)
    }

    /// Have each text role's factory check its settings and credentials.
    pub fn validate_providers(&self, registry: &ProviderRegistry) -> Result<(), ConfigError> {
        for role in TextRole::ALL {
            let spec = self.text.for_role(role);
            registry
                .validate(&spec.provider, &spec.settings)
                .map_err(|source| ConfigError::Provider { role, source })?;
        }
        Ok(())
    }

    /// Build the provider for each text role from the registry, wrapped in
    /// the configured retry policy.
    pub fn build_providers(
        &self,
        registry: &ProviderRegistry,
    ) -> Result<BTreeMap<TextRole, Arc<dyn LlmProvider>>, ProviderError> {
        TextRole::ALL
            .into_iter()
            .map(|role| {
                let spec = self.text.for_role(role);
                let provider = registry.create(&spec.provider, &spec.settings)?;
                let provider: Arc<dyn LlmProvider> =
                    Arc::new(RetryingProvider::new(provider, self.retry.clone()));
                Ok((role, provider))
            })
            .collect()
    }
}
