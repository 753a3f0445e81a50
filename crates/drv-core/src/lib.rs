//! # drv-core
//!
//! Deterministic evidence fusion for checking whether a vision-language
//! model's answer about a video is hallucinated.
//!
//! This crate holds every decision the verifier makes about model outputs,
//! and none of the model calls:
//! - Spatial agreement between two object detectors ([`perceptive`])
//! - Temporal agreement between two grounding models ([`temporal`])
//! - Frame selection for causal captioning ([`causal`])
//! - The perceptive → temporal → cognitive routing ladder ([`routing`])
//! - Parsing of structured text-collaborator output ([`structured`])
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same collaborator outputs always fuse the same way
//! 2. **No model calls**: Collaborators live in `drv-runtime`
//! 3. **Total**: Fusion and parsing never fail; abstention and unparseable
//!    output are values, not errors
//!
//! ## Example
//!
//! ```rust
//! use drv_core::{fuse_groundings, GroundingObservation, TimeInterval};
//!
//! let a = GroundingObservation::new(vec![TimeInterval::new(1.0, 5.0)], Some(0.8));
//! let b = GroundingObservation::new(vec![TimeInterval::new(3.0, 7.0)], Some(0.6));
//! let fused = fuse_groundings(&a, &b);
//!
//! assert_eq!(fused.time_intervals, vec![TimeInterval::new(3.0, 5.0)]);
//! ```

pub mod causal;
pub mod frames;
pub mod perceptive;
pub mod routing;
pub mod structured;
pub mod temporal;
pub mod types;

// Re-export main types at crate root
pub use causal::{
    linspace_indices, select_interval_frames, CAUSAL_CAPTION_INSTRUCTION, MAX_CAUSAL_FRAMES,
    NO_FRAMES_CAPTION,
};
pub use frames::{Frame, FrameReader, FrameSampler, SampledVideo, SamplerError, VideoDecoder};
pub use perceptive::{agree, fuse_track, refine_with_mask, GroundedBox, Mask};
pub use routing::{match_event_for_claim, RoutingPlan, Stage};
pub use structured::{
    parse_classification, parse_consistency, parse_structured, resolve_consistency,
    strip_code_fences, Structured, CONSISTENCY_PARSE_FAILED,
};
pub use temporal::{fuse_groundings, DEFAULT_GROUNDING_CONFIDENCE};
pub use types::{
    BBox, ClassificationResult, CognitiveEvidence, ConsistencyVerdict, Detection, Entities,
    EvidenceBundle, FeedbackBody, FusedInterval, FusedTrack, GroundingObservation,
    HallucinationAssessment, HallucinationLevel, QaPair, StructuredFeedback, TimeInterval,
    TrackEntry, NO_GROUNDING_ERROR,
};
