//! Structured output from text collaborators.
//!
//! Text collaborators are asked for JSON but return free text. This module
//! strips code-fence markup, parses the payload, and reports the outcome as a
//! [`Structured`] value. Unparseable output is an ordinary outcome; each call
//! site resolves it to its documented default.

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::types::{ClassificationResult, ConsistencyVerdict};

lazy_static! {
    /// Opening or closing code fence, with an optional language tag.
    static ref CODE_FENCE: Regex = Regex::new(r"```[A-Za-z0-9_-]*").unwrap();
}

/// Reason used when a consistency judgment cannot be parsed.
pub const CONSISTENCY_PARSE_FAILED: &str = "Output parsing failed";

/// Remove code-fence markers and surrounding whitespace.
pub fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").trim().to_string()
}

/// Outcome of asking a text collaborator for a structured record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Structured<T> {
    /// The collaborator answered with a well-formed record.
    Parsed { value: T },

    /// The collaborator answered, but not with the requested shape.
    Unparseable { raw: String, reason: String },

    /// No answer: the call failed, timed out, or was skipped.
    Unavailable { reason: String },
}

impl<T> Structured<T> {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Structured::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Structured::Parsed { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Structured::Parsed { value } => Some(value),
            _ => None,
        }
    }

    /// The parsed value, or `default` for any other outcome.
    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Structured::Parsed { value } => value,
            _ => default,
        }
    }

    /// The parsed value, or one built from the failure reason.
    pub fn unwrap_or_else(self, f: impl FnOnce(&str) -> T) -> T {
        match self {
            Structured::Parsed { value } => value,
            Structured::Unparseable { reason, .. } | Structured::Unavailable { reason } => {
                f(&reason)
            }
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Structured<U> {
        match self {
            Structured::Parsed { value } => Structured::Parsed { value: f(value) },
            Structured::Unparseable { raw, reason } => Structured::Unparseable { raw, reason },
            Structured::Unavailable { reason } => Structured::Unavailable { reason },
        }
    }

    /// Chain a second parsing step onto a parsed value.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Structured<U>) -> Structured<U> {
        match self {
            Structured::Parsed { value } => f(value),
            Structured::Unparseable { raw, reason } => Structured::Unparseable { raw, reason },
            Structured::Unavailable { reason } => Structured::Unavailable { reason },
        }
    }
}

impl<T: Default> Structured<T> {
    pub fn unwrap_or_default(self) -> T {
        self.unwrap_or_else(|_| T::default())
    }
}

/// Parse collaborator text as a JSON object of type `T`.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Structured<T> {
    let cleaned = strip_code_fences(raw);

    let value: serde_json::Value = match serde_json::from_str(&cleaned) {
        Ok(v) => v,
        Err(e) => return unparseable(raw, format!("invalid JSON: {}", e)),
    };
    if !value.is_object() {
        return unparseable(raw, "expected a JSON object".to_string());
    }

    match serde_json::from_value(value) {
        Ok(value) => Structured::Parsed { value },
        Err(e) => unparseable(raw, format!("unexpected shape: {}", e)),
    }
}

fn unparseable<T>(raw: &str, reason: String) -> Structured<T> {
    tracing::debug!(reason = %reason, "Collaborator output was not structured");
    Structured::Unparseable {
        raw: raw.to_string(),
        reason,
    }
}

/// Parse a classification. Resolve with `unwrap_or_default()` to get the
/// empty classification (perceptive, no entities) on failure.
pub fn parse_classification(raw: &str) -> Structured<ClassificationResult> {
    parse_structured(raw)
}

/// JSON schema for the strict consistency record.
const CONSISTENCY_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["is_consistent", "reason"],
  "properties": {
    "is_consistent": { "type": "boolean" },
    "reason": { "type": "string" }
  }
}"#;

static CONSISTENCY_VALIDATOR: OnceLock<Option<jsonschema::Validator>> = OnceLock::new();

fn consistency_validator() -> Option<&'static jsonschema::Validator> {
    CONSISTENCY_VALIDATOR
        .get_or_init(|| {
            let schema: serde_json::Value = serde_json::from_str(CONSISTENCY_SCHEMA).ok()?;
            match jsonschema::options().build(&schema) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to compile consistency schema");
                    None
                }
            }
        })
        .as_ref()
}

/// Parse a consistency judgment, checking it against the strict schema.
pub fn parse_consistency(raw: &str) -> Structured<ConsistencyVerdict> {
    let cleaned = strip_code_fences(raw);
    let value: serde_json::Value = match serde_json::from_str(&cleaned) {
        Ok(v) => v,
        Err(e) => return unparseable(raw, format!("invalid JSON: {}", e)),
    };

    if let Some(validator) = consistency_validator() {
        if !validator.is_valid(&value) {
            let reason = validator
                .iter_errors(&value)
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return unparseable(raw, format!("schema violation: {}", reason));
        }
    }

    match serde_json::from_value(value) {
        Ok(value) => Structured::Parsed { value },
        Err(e) => unparseable(raw, format!("unexpected shape: {}", e)),
    }
}

/// Resolve a consistency outcome, substituting the negative verdict for
/// unparseable output.
pub fn resolve_consistency(outcome: Structured<ConsistencyVerdict>) -> ConsistencyVerdict {
    match outcome {
        Structured::Parsed { value } => value,
        Structured::Unparseable { .. } => ConsistencyVerdict::negative(CONSISTENCY_PARSE_FAILED),
        Structured::Unavailable { reason } => ConsistencyVerdict::negative(reason),
    }
}
