//! Verification pipeline.
//!
//! One `run` walks the stage ladder for a single (video, question, answer):
//! - Sample frames (blocking decode on the blocking pool)
//! - Classify the answer and extract entities
//! - Gather evidence for the stages the routing plan admits, fanning out
//!   per entity with bounded concurrency
//! - Ask for a verdict, then for corrective feedback
//!
//! Per-run state (circuit breaker, budgets, evidence) lives only inside
//! `run`, so a pipeline can serve many runs at once.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;

use drv_core::{
    match_event_for_claim, ClassificationResult, CognitiveEvidence, Entities, EvidenceBundle,
    FrameSampler, FusedInterval, FusedTrack, HallucinationAssessment, QaPair, RoutingPlan,
    SampledVideo, SamplerError, Stage, StructuredFeedback, VideoDecoder,
};

use crate::collaborators::{
    Captioner, ClassDetector, CollaboratorRole, Gated, GroundedDetector, SegmentationRefiner,
    TemporalGrounder, TextRole,
};
use crate::config::{ConfigError, RuntimeConfig};
use crate::fusers::{CausalEvidenceBuilder, ObjectEvidenceFuser, TemporalEvidenceFuser};
use crate::prompts;
use crate::providers::{LlmProvider, ProviderRegistry};
use crate::resilience::{CallGuard, LlmUsage};
use crate::text::TextToolkit;

/// Errors that abort a run or a pipeline build.
///
/// Collaborator failures never show up here; they become abstentions.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Frame sampling failed: {0}")]
    Sampling(#[from] SamplerError),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Everything one run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub classification: ClassificationResult,

    pub evidence: EvidenceBundle,

    pub assessment: HallucinationAssessment,

    pub feedback: StructuredFeedback,

    /// Stages walked, from `Sampled` to `Done`.
    pub stages: Vec<Stage>,

    pub frames_sampled: usize,

    pub llm_usage: LlmUsage,

    /// Collaborators whose circuit was open when the run finished.
    pub open_circuits: Vec<CollaboratorRole>,

    pub evaluated_at: DateTime<Utc>,
}

impl VerificationReport {
    pub fn has_hallucination(&self) -> Option<bool> {
        self.assessment.has_hallucination
    }
}

/// Video-answer hallucination verifier.
///
/// Collaborators are injected through [`VerificationPipelineBuilder`].
pub struct VerificationPipeline {
    config: RuntimeConfig,
    decoder: Arc<dyn VideoDecoder>,
    objects: ObjectEvidenceFuser,
    temporal: TemporalEvidenceFuser,
    causal: CausalEvidenceBuilder,
    text: TextToolkit,
}

impl VerificationPipeline {
    pub fn builder() -> VerificationPipelineBuilder {
        VerificationPipelineBuilder::new()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Verify `answer` to `qa` against the video at `video`.
    ///
    /// Fails only if the video cannot be sampled.
    pub async fn run(
        &self,
        video: impl AsRef<Path>,
        qa: &QaPair,
        answer: &str,
    ) -> Result<VerificationReport, RuntimeError> {
        let video = video.as_ref().to_path_buf();
        let span = tracing::info_span!("verify", video = %video.display());
        self.run_stages(video, qa, answer).instrument(span).await
    }

    async fn run_stages(
        &self,
        video: PathBuf,
        qa: &QaPair,
        answer: &str,
    ) -> Result<VerificationReport, RuntimeError> {
        let guard = CallGuard::new(&self.config);

        let sampled = self.sample(&video).await?;
        let mut stages = vec![Stage::Sampled];

        let mut classification = self
            .text
            .classify(qa, answer, &guard)
            .await
            .unwrap_or_else(|reason| {
                tracing::warn!(
                    reason,
                    "Classification unusable, assuming perceptive with no entities"
                );
                ClassificationResult::default()
            });
        classification.entities.dedup();
        stages.push(Stage::Classified);

        let plan = RoutingPlan::from_classification(&classification);
        tracing::info!(
            level = %plan.level,
            objects = classification.entities.objects.len(),
            events = classification.entities.events.len(),
            claims = classification.entities.causal_claims.len(),
            "Classified answer"
        );

        let entities = &classification.entities;
        let mut evidence = EvidenceBundle::default();
        let mut assessment = HallucinationAssessment::default();
        let mut feedback = StructuredFeedback::default();

        let mut stage = Stage::Classified;
        while stage != Stage::Done {
            stage = stage.advance(&plan);
            stages.push(stage);
            tracing::debug!(stage = ?stage, "Entering stage");

            match stage {
                Stage::PerceptiveEvidence => {
                    evidence.perceptive = self
                        .perceptive_evidence(&sampled, &entities.objects, &guard)
                        .await;
                }
                Stage::TemporalEvidence => {
                    evidence.temporal = self
                        .temporal_evidence(&video, &entities.events, &guard)
                        .await;
                }
                Stage::CognitiveEvidence => {
                    evidence.cognitive = self
                        .cognitive_evidence(&sampled, entities, &evidence.temporal, &guard)
                        .await;
                }
                Stage::Verdict => {
                    assessment = self
                        .text
                        .reason(&evidence, answer, &guard)
                        .await
                        .unwrap_or_else(|reason| {
                            tracing::warn!(reason, "No usable verdict");
                            HallucinationAssessment::default()
                        });
                }
                Stage::Feedback => {
                    feedback = self
                        .text
                        .feedback(&evidence, &assessment, &guard)
                        .await
                        .unwrap_or_else(|reason| {
                            tracing::warn!(reason, "No usable feedback");
                            StructuredFeedback::default()
                        });
                }
                Stage::Sampled | Stage::Classified | Stage::Done => {}
            }
        }

        let report = VerificationReport {
            classification,
            evidence,
            assessment,
            feedback,
            stages,
            frames_sampled: sampled.len(),
            llm_usage: guard.usage(),
            open_circuits: guard.breaker().open_roles(),
            evaluated_at: Utc::now(),
        };

        tracing::info!(
            has_hallucination = ?report.assessment.has_hallucination,
            llm_calls = report.llm_usage.llm_calls,
            tokens = report.llm_usage.total_tokens,
            "Verification complete"
        );
        Ok(report)
    }

    async fn sample(&self, video: &Path) -> Result<SampledVideo, RuntimeError> {
        let sampler = FrameSampler::new(self.config.sampling_stride)?;
        let decoder = Arc::clone(&self.decoder);
        let path = video.to_path_buf();

        let sampled = tokio::task::spawn_blocking(move || sampler.sample(decoder.as_ref(), &path))
            .await
            .map_err(|e| RuntimeError::Internal(format!("frame sampling task failed: {}", e)))??;
        Ok(sampled)
    }

    async fn perceptive_evidence(
        &self,
        video: &SampledVideo,
        objects: &[String],
        guard: &CallGuard,
    ) -> BTreeMap<String, FusedTrack> {
        stream::iter(objects)
            .map(|object| async move {
                let track = self.objects.fuse(&video.frames, object, guard).await;
                (object.clone(), track)
            })
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await
    }

    async fn temporal_evidence(
        &self,
        video: &Path,
        events: &[String],
        guard: &CallGuard,
    ) -> BTreeMap<String, FusedInterval> {
        stream::iter(events)
            .map(|event| async move {
                let interval = self.temporal.fuse(video, event, guard).await;
                (event.clone(), interval)
            })
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await
    }

    /// Explain each causal claim through the first fused event it mentions.
    async fn cognitive_evidence(
        &self,
        video: &SampledVideo,
        entities: &Entities,
        temporal: &BTreeMap<String, FusedInterval>,
        guard: &CallGuard,
    ) -> BTreeMap<String, CognitiveEvidence> {
        // Classification order, not map order: the first listed event wins.
        let events: Vec<&str> = entities
            .events
            .iter()
            .map(String::as_str)
            .filter(|event| temporal.contains_key(*event))
            .collect();
        let events = &events;

        stream::iter(&entities.causal_claims)
            .map(|claim| async move {
                let grounded = match_event_for_claim(claim, events.iter().copied()).and_then(
                    |event| {
                        temporal
                            .get(event)
                            .and_then(FusedInterval::first)
                            .map(|interval| (event, interval))
                    },
                );

                let evidence = match grounded {
                    Some((event, interval)) => {
                        let context = prompts::judge_context(event, interval);
                        self.causal
                            .explain(&video.frames, interval, &context, &self.text, guard)
                            .await
                    }
                    None => {
                        tracing::debug!(claim = %claim, "No grounded event for claim");
                        CognitiveEvidence::ungrounded()
                    }
                };
                (claim.clone(), evidence)
            })
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await
    }
}

impl std::fmt::Debug for VerificationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationPipeline")
            .field("config", &self.config)
            .field("missing_text_roles", &self.text.missing_roles())
            .finish_non_exhaustive()
    }
}

/// Builder for [`VerificationPipeline`].
#[derive(Default)]
pub struct VerificationPipelineBuilder {
    config: RuntimeConfig,
    decoder: Option<Arc<dyn VideoDecoder>>,
    class_detector: Option<Arc<dyn ClassDetector>>,
    grounded_detector: Option<Arc<dyn GroundedDetector>>,
    segmenter: Option<Arc<dyn SegmentationRefiner>>,
    grounders: Option<(Arc<dyn TemporalGrounder>, Arc<dyn TemporalGrounder>)>,
    captioner: Option<Arc<dyn Captioner>>,
    text_providers: BTreeMap<TextRole, Arc<dyn LlmProvider>>,
}

impl VerificationPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn VideoDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn class_detector(mut self, detector: Arc<dyn ClassDetector>) -> Self {
        self.class_detector = Some(detector);
        self
    }

    pub fn grounded_detector(mut self, detector: Arc<dyn GroundedDetector>) -> Self {
        self.grounded_detector = Some(detector);
        self
    }

    pub fn segmenter(mut self, segmenter: Arc<dyn SegmentationRefiner>) -> Self {
        self.segmenter = Some(segmenter);
        self
    }

    /// The two independent temporal grounders.
    pub fn grounders(
        mut self,
        primary: Arc<dyn TemporalGrounder>,
        secondary: Arc<dyn TemporalGrounder>,
    ) -> Self {
        self.grounders = Some((primary, secondary));
        self
    }

    pub fn captioner(mut self, captioner: Arc<dyn Captioner>) -> Self {
        self.captioner = Some(captioner);
        self
    }

    pub fn text_provider(mut self, role: TextRole, provider: Arc<dyn LlmProvider>) -> Self {
        self.text_providers.insert(role, provider);
        self
    }

    /// Use one provider for all four text roles.
    pub fn shared_text_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        for role in TextRole::ALL {
            self.text_providers.insert(role, Arc::clone(&provider));
        }
        self
    }

    /// Build text providers from the configuration's `text` section.
    ///
    /// Call after [`config`](Self::config).
    pub fn text_providers_from_registry(
        mut self,
        registry: &ProviderRegistry,
    ) -> Result<Self, RuntimeError> {
        let providers = self
            .config
            .build_providers(registry)
            .map_err(|e| RuntimeError::ProviderNotConfigured(e.to_string()))?;
        self.text_providers.extend(providers);
        Ok(self)
    }

    pub fn build(self) -> Result<VerificationPipeline, RuntimeError> {
        self.config.validate()?;

        let missing = |what: &str| RuntimeError::ProviderNotConfigured(format!("No {} set", what));
        let decoder = self.decoder.ok_or_else(|| missing("video decoder"))?;
        let class_detector = self.class_detector.ok_or_else(|| missing("class detector"))?;
        let grounded_detector = self
            .grounded_detector
            .ok_or_else(|| missing("grounded detector"))?;
        let segmenter = self.segmenter.ok_or_else(|| missing("segmenter"))?;
        let (primary, secondary) = self.grounders.ok_or_else(|| missing("temporal grounders"))?;
        let captioner = self.captioner.ok_or_else(|| missing("captioner"))?;

        let text = TextToolkit::new(self.text_providers, self.config.text.clone());
        let missing_roles = text.missing_roles();
        if !missing_roles.is_empty() {
            let roles: Vec<String> = missing_roles.iter().map(ToString::to_string).collect();
            return Err(RuntimeError::ProviderNotConfigured(format!(
                "No text provider for: {}",
                roles.join(", ")
            )));
        }

        let class_reentrant = class_detector.reentrant();
        let grounded_reentrant = grounded_detector.reentrant();
        let segmenter_reentrant = segmenter.reentrant();
        let primary_reentrant = primary.reentrant();
        let secondary_reentrant = secondary.reentrant();
        let captioner_reentrant = captioner.reentrant();

        Ok(VerificationPipeline {
            objects: ObjectEvidenceFuser::new(
                Gated::new(class_detector, class_reentrant),
                Gated::new(grounded_detector, grounded_reentrant),
                Gated::new(segmenter, segmenter_reentrant),
                self.config.detection,
            ),
            temporal: TemporalEvidenceFuser::new(
                Gated::new(primary, primary_reentrant),
                Gated::new(secondary, secondary_reentrant),
            ),
            causal: CausalEvidenceBuilder::new(
                Gated::new(captioner, captioner_reentrant),
                self.config.max_causal_frames,
            ),
            decoder,
            text,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_collaborators() {
        let err = VerificationPipeline::builder().build().unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::ProviderNotConfigured(msg) if msg.contains("video decoder")
        ));
    }

    #[test]
    fn test_build_validates_config() {
        let mut config = RuntimeConfig::default();
        config.max_concurrency = 0;
        let err = VerificationPipeline::builder()
            .config(config)
            .build()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Config(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_registry_without_credentials_is_not_configured() {
        let mut config = RuntimeConfig::default();
        for role in [
            &mut config.text.classify,
            &mut config.text.judge,
            &mut config.text.reason,
            &mut config.text.feedback,
        ] {
            role.settings["api_key_env"] = serde_json::json!("DRV_TEST_UNSET_KEY_7781");
        }

        let result = VerificationPipeline::builder()
            .config(config)
            .text_providers_from_registry(&ProviderRegistry::with_defaults());
        assert!(matches!(result, Err(RuntimeError::ProviderNotConfigured(_))));
    }
}
