//! Perception collaborators.
//!
//! The detectors, segmenter, temporal grounders and captioner are external
//! models. The pipeline only sees them through these traits; text models go
//! through [`LlmProvider`](crate::providers::LlmProvider) instead.
//!
//! Collaborators that cannot serve concurrent calls report
//! `reentrant() == false` and are wrapped in a [`Gated`] handle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use drv_core::{BBox, Detection, Frame, GroundedBox, GroundingObservation, Mask};

use crate::providers::ProviderError;
use crate::resilience::CallFailure;

/// Errors from a collaborator call. Always converted to abstention.
#[derive(Error, Debug, Clone)]
pub enum CollaboratorError {
    #[error("Collaborator call failed: {0}")]
    CallFailed(String),

    #[error("Collaborator timed out after {0:?}")]
    Timeout(Duration),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

impl From<ProviderError> for CollaboratorError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout(d) => CollaboratorError::Timeout(d),
            ProviderError::NotConfigured(msg) => CollaboratorError::Unavailable(msg),
            ProviderError::AuthError => {
                CollaboratorError::Unavailable("authentication failed".to_string())
            }
            other => CollaboratorError::CallFailed(other.to_string()),
        }
    }
}

impl CallFailure for CollaboratorError {
    fn is_persistent(&self) -> bool {
        matches!(self, CollaboratorError::Unavailable(_))
    }
}

/// Every external model the pipeline calls, for breaker and timeout keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorRole {
    ClassDetector,
    GroundedDetector,
    Segmenter,
    PrimaryGrounder,
    SecondaryGrounder,
    Captioner,
    Classifier,
    Judge,
    Reasoner,
    FeedbackWriter,
}

impl CollaboratorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollaboratorRole::ClassDetector => "class_detector",
            CollaboratorRole::GroundedDetector => "grounded_detector",
            CollaboratorRole::Segmenter => "segmenter",
            CollaboratorRole::PrimaryGrounder => "primary_grounder",
            CollaboratorRole::SecondaryGrounder => "secondary_grounder",
            CollaboratorRole::Captioner => "captioner",
            CollaboratorRole::Classifier => "classifier",
            CollaboratorRole::Judge => "judge",
            CollaboratorRole::Reasoner => "reasoner",
            CollaboratorRole::FeedbackWriter => "feedback_writer",
        }
    }
}

impl fmt::Display for CollaboratorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four jobs text models do in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextRole {
    Classify,
    Judge,
    Reason,
    Feedback,
}

impl TextRole {
    pub const ALL: [TextRole; 4] = [
        TextRole::Classify,
        TextRole::Judge,
        TextRole::Reason,
        TextRole::Feedback,
    ];

    pub fn collaborator_role(&self) -> CollaboratorRole {
        match self {
            TextRole::Classify => CollaboratorRole::Classifier,
            TextRole::Judge => CollaboratorRole::Judge,
            TextRole::Reason => CollaboratorRole::Reasoner,
            TextRole::Feedback => CollaboratorRole::FeedbackWriter,
        }
    }

    /// Whether token budgets may refuse this role's calls. Every run ends
    /// with a verdict and feedback, so those two are metered but never refused.
    pub fn is_budgeted(&self) -> bool {
        matches!(self, TextRole::Classify | TextRole::Judge)
    }
}

impl fmt::Display for TextRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TextRole::Classify => "classify",
            TextRole::Judge => "judge",
            TextRole::Reason => "reason",
            TextRole::Feedback => "feedback",
        };
        f.write_str(label)
    }
}

/// Score cut-offs for the language-grounded detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionThresholds {
    pub box_threshold: f64,
    pub text_threshold: f64,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            box_threshold: 0.3,
            text_threshold: 0.25,
        }
    }
}

/// Closed-vocabulary detector: finds one object of a class in a frame.
#[async_trait]
pub trait ClassDetector: Send + Sync {
    async fn detect(&self, frame: &Frame, class: &str)
        -> Result<Option<Detection>, CollaboratorError>;

    fn reentrant(&self) -> bool {
        false
    }
}

/// Open-vocabulary detector grounding a text phrase in a frame.
///
/// Boxes are normalized center/extent, best first.
#[async_trait]
pub trait GroundedDetector: Send + Sync {
    async fn detect(
        &self,
        frame: &Frame,
        phrase: &str,
        thresholds: DetectionThresholds,
    ) -> Result<Vec<GroundedBox>, CollaboratorError>;

    fn reentrant(&self) -> bool {
        false
    }
}

/// Segments the object inside a pixel-space box prompt.
#[async_trait]
pub trait SegmentationRefiner: Send + Sync {
    async fn segment(&self, frame: &Frame, prompt: BBox)
        -> Result<Option<Mask>, CollaboratorError>;

    fn reentrant(&self) -> bool {
        false
    }
}

/// Locates an event phrase in a video.
#[async_trait]
pub trait TemporalGrounder: Send + Sync {
    async fn ground(&self, video: &Path, event: &str)
        -> Result<GroundingObservation, CollaboratorError>;

    fn reentrant(&self) -> bool {
        false
    }
}

/// Describes what happens across a handful of frames.
#[async_trait]
pub trait Captioner: Send + Sync {
    async fn caption(&self, frames: &[Frame], instruction: &str)
        -> Result<String, CollaboratorError>;

    fn reentrant(&self) -> bool {
        false
    }
}

/// A shared collaborator, serialized when it is not reentrant.
pub struct Gated<T: ?Sized> {
    inner: Arc<T>,
    gate: Option<Mutex<()>>,
}

impl<T: ?Sized + Send + Sync> Gated<T> {
    pub fn new(inner: Arc<T>, reentrant: bool) -> Self {
        Self {
            inner,
            gate: (!reentrant).then(|| Mutex::new(())),
        }
    }

    pub fn is_serialized(&self) -> bool {
        self.gate.is_some()
    }

    /// Run `f` against the collaborator, holding the gate if there is one.
    pub async fn call<'a, F, Fut, R>(&'a self, f: F) -> R
    where
        F: FnOnce(&'a T) -> Fut,
        Fut: Future<Output = R>,
    {
        let _permit = match &self.gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        f(&self.inner).await
    }
}

impl<T: ?Sized> fmt::Debug for Gated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gated")
            .field("serialized", &self.gate.is_some())
            .finish()
    }
}
