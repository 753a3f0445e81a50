//! # drv-runtime
//!
//! Async collaborator orchestration for video-answer hallucination
//! verification.
//!
//! `drv-core` decides how evidence fuses. This crate calls the models that
//! produce it:
//! - Vision collaborators (detectors, segmenter, temporal grounders,
//!   captioner) behind the traits in [`collaborators`]
//! - Text collaborators behind [`LlmProvider`], one per [`TextRole`]
//! - Per-call timeouts, a per-run circuit breaker and token budgets in
//!   [`resilience`]
//!
//! ## Failure Model
//!
//! A failed collaborator never fails a run. It abstains, and the fusion
//! gates in `drv-core` treat the abstention as missing evidence. Only frame
//! sampling errors and missing configuration surface as [`RuntimeError`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use drv_runtime::{ProviderRegistry, QaPair, RuntimeConfig, VerificationPipeline};
//!
//! let config = RuntimeConfig::from_yaml_file("drv.yaml")?;
//! let pipeline = VerificationPipeline::builder()
//!     .config(config)
//!     .text_providers_from_registry(&ProviderRegistry::with_defaults())?
//!     .decoder(decoder)
//!     .class_detector(yolo)
//!     .grounded_detector(grounding_dino)
//!     .segmenter(sam)
//!     .grounders(primary, secondary)
//!     .captioner(captioner)
//!     .build()?;
//!
//! let qa = QaPair::new("Why did the vase fall?");
//! let report = pipeline.run("clip.mp4", &qa, "The cat knocked it over.").await?;
//! println!("{:?}", report.assessment.has_hallucination);
//! ```

pub mod collaborators;
pub mod config;
pub mod fusers;
mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod text;

pub use collaborators::{
    Captioner, ClassDetector, CollaboratorError, CollaboratorRole, DetectionThresholds, Gated,
    GroundedDetector, SegmentationRefiner, TemporalGrounder, TextRole,
};
pub use config::{ConfigError, RuntimeConfig, TextRoleConfig, TextRolesConfig, TimeoutConfig};
pub use orchestrator::{
    RuntimeError, VerificationPipeline, VerificationPipelineBuilder, VerificationReport,
};
pub use providers::{LlmProvider, ProviderError, ProviderRegistry};
pub use resilience::{CallGuard, LlmUsage};
pub use text::TextToolkit;

// Core types callers need to drive a run
pub use drv_core::{QaPair, Stage, VideoDecoder};
