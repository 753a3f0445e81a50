//! API keys for text-model providers.
//!
//! A key is wrapped in [`ApiCredential`] the moment it is read from a role's
//! provider settings or the environment. It prints as `[REDACTED]` and is
//! zeroed on drop (via `secrecy`).

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// The role's `settings` block
    Config,
    Environment,
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialSource::Config => "config",
            CredentialSource::Environment => "environment",
            CredentialSource::Programmatic => "programmatic",
        })
    }
}

pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
        }
    }

    /// Take `settings[key]` if present, otherwise the `env_var` variable.
    pub fn resolve(settings: &JsonValue, key: &str, env_var: &str) -> Result<Self, ProviderError> {
        if let Some(value) = settings[key].as_str() {
            return Ok(Self::new(value, CredentialSource::Config));
        }
        match std::env::var(env_var) {
            Ok(value) => Ok(Self::new(value, CredentialSource::Environment)),
            Err(_) => Err(ProviderError::NotConfigured(format!(
                "API key required: set '{}' in the provider settings or {} in the environment",
                key, env_var
            ))),
        }
    }

    /// Whether [`resolve`](Self::resolve) would find a key.
    pub fn is_resolvable(settings: &JsonValue, key: &str, env_var: &str) -> bool {
        settings[key].as_str().is_some() || std::env::var_os(env_var).is_some()
    }

    /// The raw key, for the request header only.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiCredential([REDACTED] from {})", self.source)
    }
}
