//! End-to-end pipeline runs against scripted collaborators.

use async_trait::async_trait;
use image::RgbImage;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drv_core::{
    BBox, CognitiveEvidence, Detection, Frame, FrameReader, GroundedBox, GroundingObservation,
    HallucinationLevel, Mask, SamplerError, TimeInterval, NO_GROUNDING_ERROR,
};
use drv_runtime::prompts;
use drv_runtime::providers::{ChatMessage, CompletionConfig, CompletionResponse, TokenUsage};
use drv_runtime::{
    Captioner, ClassDetector, CollaboratorError, DetectionThresholds, GroundedDetector,
    LlmProvider, ProviderError, QaPair, RuntimeConfig, RuntimeError, SegmentationRefiner, Stage,
    TemporalGrounder, VerificationPipeline, VideoDecoder,
};

// ---------------------------------------------------------------------------
// Vision fakes
// ---------------------------------------------------------------------------

struct SyntheticReader {
    remaining: usize,
}

impl FrameReader for SyntheticReader {
    fn frame_rate(&self) -> f64 {
        1.0
    }

    fn read_next(&mut self) -> Option<RgbImage> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(RgbImage::new(8, 8))
    }
}

/// `frames` blank 8x8 frames at 1 fps; zero frames means the file is unreadable.
struct SyntheticDecoder {
    frames: usize,
}

impl VideoDecoder for SyntheticDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameReader + Send>, SamplerError> {
        if self.frames == 0 {
            return Err(SamplerError::SourceUnavailable {
                path: path.to_path_buf(),
                reason: "no such file".to_string(),
            });
        }
        Ok(Box::new(SyntheticReader {
            remaining: self.frames,
        }))
    }
}

struct CenterDetector;

#[async_trait]
impl ClassDetector for CenterDetector {
    async fn detect(
        &self,
        _frame: &Frame,
        _class: &str,
    ) -> Result<Option<Detection>, CollaboratorError> {
        Ok(Some(Detection::new(BBox::new(1.0, 1.0, 4.0, 4.0), 0.8)))
    }
}

struct CenterGrounder;

#[async_trait]
impl GroundedDetector for CenterGrounder {
    async fn detect(
        &self,
        _frame: &Frame,
        _phrase: &str,
        _thresholds: DetectionThresholds,
    ) -> Result<Vec<GroundedBox>, CollaboratorError> {
        Ok(vec![GroundedBox {
            cx: 0.5,
            cy: 0.5,
            w: 0.5,
            h: 0.5,
            logit: 0.6,
        }])
    }
}

struct SquareSegmenter;

#[async_trait]
impl SegmentationRefiner for SquareSegmenter {
    async fn segment(
        &self,
        _frame: &Frame,
        _prompt: BBox,
    ) -> Result<Option<Mask>, CollaboratorError> {
        let bits = (0..64)
            .map(|i| {
                let (x, y) = (i % 8, i / 8);
                (2..=5).contains(&x) && (2..=5).contains(&y)
            })
            .collect();
        Ok(Mask::new(8, 8, bits))
    }
}

/// Returns the same interval for every event and counts calls.
struct FixedGrounder {
    interval: TimeInterval,
    latency: Duration,
    calls: AtomicUsize,
}

impl FixedGrounder {
    fn new(start: f64, end: f64) -> Arc<Self> {
        Self::slow(start, end, Duration::ZERO)
    }

    fn slow(start: f64, end: f64, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            interval: TimeInterval::new(start, end),
            latency,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TemporalGrounder for FixedGrounder {
    async fn ground(
        &self,
        _video: &Path,
        _event: &str,
    ) -> Result<GroundingObservation, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(GroundingObservation::new(vec![self.interval], Some(0.8)))
    }
}

#[derive(Default)]
struct RecordingCaptioner {
    batches: Mutex<Vec<Vec<f64>>>,
}

#[async_trait]
impl Captioner for RecordingCaptioner {
    async fn caption(
        &self,
        frames: &[Frame],
        _instruction: &str,
    ) -> Result<String, CollaboratorError> {
        self.batches
            .lock()
            .push(frames.iter().map(|f| f.timestamp).collect());
        Ok("the ball rolls into the vase and the vase tips over".to_string())
    }
}

// ---------------------------------------------------------------------------
// Text fake
// ---------------------------------------------------------------------------

/// Answers by system prompt and records the user message of each call.
struct ScriptedText {
    classify: Result<String, ProviderError>,
    reason: Result<String, ProviderError>,
    calls: Mutex<Vec<(&'static str, String)>>,
}

impl ScriptedText {
    fn new(classification: &str) -> Arc<Self> {
        Self::with_verdict(
            classification,
            Ok(r#"{"has_hallucination": true, "error_points": ["the cat is not in the video"], "confidence": 0.9}"#
                .to_string()),
        )
    }

    fn with_verdict(classification: &str, reason: Result<String, ProviderError>) -> Arc<Self> {
        Arc::new(Self {
            classify: Ok(classification.to_string()),
            reason,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls_for(&self, role: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, user)| user.clone())
            .collect()
    }
}

#[async_trait]
impl LlmProvider for ScriptedText {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let system = messages[0].content.as_str();
        let user = messages.last().map(|m| m.content.clone()).unwrap_or_default();

        let (role, reply) = if system == prompts::CLASSIFY_SYSTEM_PROMPT.trim() {
            ("classify", self.classify.clone())
        } else if system == prompts::JUDGE_SYSTEM_PROMPT.trim() {
            (
                "judge",
                Ok(r#"{"is_consistent": true, "reason": "balls can knock vases over"}"#.to_string()),
            )
        } else if system == prompts::REASON_SYSTEM_PROMPT.trim() {
            ("reason", self.reason.clone())
        } else {
            (
                "feedback",
                Ok(r#"{"feedback": {"A": "no cat appears", "R": "describe the ball"}}"#.to_string()),
            )
        };
        self.calls.lock().push((role, user));

        reply.map(|content| CompletionResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
            },
            model: config.model.clone(),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    text: Arc<ScriptedText>,
    primary: Arc<FixedGrounder>,
    secondary: Arc<FixedGrounder>,
    captioner: Arc<RecordingCaptioner>,
    frames: usize,
}

impl Harness {
    fn new(classification: &str) -> Self {
        Self {
            text: ScriptedText::new(classification),
            primary: FixedGrounder::new(2.0, 6.0),
            secondary: FixedGrounder::new(2.0, 6.0),
            captioner: Arc::new(RecordingCaptioner::default()),
            frames: 10,
        }
    }

    fn pipeline(&self) -> VerificationPipeline {
        let mut config = RuntimeConfig::default();
        config.sampling_stride = 1;

        VerificationPipeline::builder()
            .config(config)
            .decoder(Arc::new(SyntheticDecoder {
                frames: self.frames,
            }))
            .class_detector(Arc::new(CenterDetector))
            .grounded_detector(Arc::new(CenterGrounder))
            .segmenter(Arc::new(SquareSegmenter))
            .grounders(self.primary.clone(), self.secondary.clone())
            .captioner(self.captioner.clone())
            .shared_text_provider(self.text.clone())
            .build()
            .unwrap()
    }
}

const COGNITIVE: &str = r#"{
    "hallucination_level": "cognitive",
    "entities": {
        "O": ["vase", "vase", "cat"],
        "E": ["ball rolls", "vase falls"],
        "C": ["vase falls because ball rolls into it", "cat sneezes so dog runs"]
    }
}"#;

fn qa() -> QaPair {
    QaPair::new("Why did the vase fall?").with_options(["A. the cat", "B. the ball"])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cognitive_answer_walks_every_stage() {
    let harness = Harness::new(COGNITIVE);
    let report = harness
        .pipeline()
        .run("clip.mp4", &qa(), "The cat knocked the vase over.")
        .await
        .unwrap();

    assert_eq!(
        report.stages,
        vec![
            Stage::Sampled,
            Stage::Classified,
            Stage::PerceptiveEvidence,
            Stage::TemporalEvidence,
            Stage::CognitiveEvidence,
            Stage::Verdict,
            Stage::Feedback,
            Stage::Done,
        ]
    );
    assert_eq!(
        report.classification.hallucination_level,
        HallucinationLevel::Cognitive
    );
    assert_eq!(report.frames_sampled, 10);

    // Repeated phrases are verified once.
    assert_eq!(report.classification.entities.objects, vec!["vase", "cat"]);
    assert_eq!(report.evidence.perceptive.len(), 2);
    assert_eq!(report.evidence.perceptive["vase"].len(), 10);

    assert_eq!(
        report.evidence.temporal["ball rolls"].time_intervals,
        vec![TimeInterval::new(2.0, 6.0)]
    );
    assert_eq!(report.evidence.temporal.len(), 2);

    assert_eq!(report.has_hallucination(), Some(true));
    assert_eq!(report.feedback.feedback.analysis, "no cat appears");
    assert!(report.open_circuits.is_empty());
    assert_eq!(report.llm_usage.llm_calls, 4);
}

#[tokio::test]
async fn test_claim_is_explained_through_first_listed_event() {
    let harness = Harness::new(COGNITIVE);
    let report = harness
        .pipeline()
        .run("clip.mp4", &qa(), "The cat knocked the vase over.")
        .await
        .unwrap();

    match &report.evidence.cognitive["vase falls because ball rolls into it"] {
        CognitiveEvidence::Explained {
            generated_caption,
            common_sense_check,
        } => {
            assert!(generated_caption.contains("tips over"));
            assert!(common_sense_check.is_consistent);
        }
        other => panic!("expected explained claim, got {:?}", other),
    }

    // Both events appear in the claim; "ball rolls" is listed first.
    let judged = harness.text.calls_for("judge");
    assert_eq!(judged.len(), 1);
    assert!(judged[0].contains("Event 'ball rolls' at interval [2, 6]"));

    // Frames at 2..=6 seconds fall inside the interval.
    assert_eq!(
        harness.captioner.batches.lock().clone(),
        vec![vec![2.0, 3.0, 4.0, 5.0, 6.0]]
    );
}

#[tokio::test]
async fn test_claim_without_event_is_ungrounded() {
    let harness = Harness::new(COGNITIVE);
    let report = harness
        .pipeline()
        .run("clip.mp4", &qa(), "The cat knocked the vase over.")
        .await
        .unwrap();

    assert_eq!(
        report.evidence.cognitive["cat sneezes so dog runs"],
        CognitiveEvidence::Ungrounded {
            error: NO_GROUNDING_ERROR.to_string()
        }
    );
}

#[tokio::test]
async fn test_disagreeing_grounders_leave_claims_ungrounded() {
    let mut harness = Harness::new(COGNITIVE);
    harness.secondary = FixedGrounder::new(7.0, 9.0);
    let report = harness
        .pipeline()
        .run("clip.mp4", &qa(), "The cat knocked the vase over.")
        .await
        .unwrap();

    assert!(!report.evidence.temporal["ball rolls"].is_grounded());
    assert!(report
        .evidence
        .cognitive
        .values()
        .all(|evidence| !evidence.is_grounded()));
    assert!(harness.captioner.batches.lock().is_empty());
    assert!(harness.text.calls_for("judge").is_empty());
}

#[tokio::test]
async fn test_perceptive_answer_skips_temporal_and_cognitive() {
    let harness = Harness::new(
        r#"{"hallucination_level": "perceptive", "entities": {"O": ["red car"], "E": ["car turns"], "C": ["car turns because light is red"]}}"#,
    );
    let report = harness
        .pipeline()
        .run("clip.mp4", &qa(), "A red car.")
        .await
        .unwrap();

    assert_eq!(
        report.stages,
        vec![
            Stage::Sampled,
            Stage::Classified,
            Stage::PerceptiveEvidence,
            Stage::Verdict,
            Stage::Feedback,
            Stage::Done,
        ]
    );
    assert!(report.evidence.perceptive.contains_key("red car"));
    assert!(report.evidence.temporal.is_empty());
    assert!(report.evidence.cognitive.is_empty());
    assert_eq!(harness.primary.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.secondary.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unparseable_classification_still_reaches_verdict() {
    let harness = Harness::new("I think this answer is perceptive.");
    let report = harness
        .pipeline()
        .run("clip.mp4", &qa(), "The cat knocked the vase over.")
        .await
        .unwrap();

    assert_eq!(
        report.classification.hallucination_level,
        HallucinationLevel::Perceptive
    );
    assert!(report.classification.entities.is_empty());
    assert_eq!(
        report.stages,
        vec![
            Stage::Sampled,
            Stage::Classified,
            Stage::Verdict,
            Stage::Feedback,
            Stage::Done,
        ]
    );
    assert_eq!(report.evidence, Default::default());
    assert_eq!(harness.text.calls_for("reason").len(), 1);
    assert_eq!(report.feedback.feedback.recommendations, "describe the ball");
}

#[tokio::test]
async fn test_failed_verdict_still_produces_feedback() {
    let harness = Harness {
        text: ScriptedText::with_verdict(
            COGNITIVE,
            Err(ProviderError::HttpError("connection reset".to_string())),
        ),
        ..Harness::new(COGNITIVE)
    };
    let report = harness
        .pipeline()
        .run("clip.mp4", &qa(), "The cat knocked the vase over.")
        .await
        .unwrap();

    assert_eq!(report.has_hallucination(), None);
    assert!(report.assessment.error_points.is_empty());
    assert_eq!(harness.text.calls_for("feedback").len(), 1);
    assert_eq!(report.stages.last(), Some(&Stage::Done));
}

#[tokio::test]
async fn test_unreadable_video_fails_the_run() {
    let mut harness = Harness::new(COGNITIVE);
    harness.frames = 0;
    let result = harness
        .pipeline()
        .run("missing.mp4", &qa(), "The cat knocked the vase over.")
        .await;

    assert!(matches!(
        result,
        Err(RuntimeError::Sampling(SamplerError::SourceUnavailable { .. }))
    ));
    assert!(harness.text.calls.lock().is_empty());
}

#[tokio::test]
async fn test_report_serializes_to_json() {
    let harness = Harness::new(COGNITIVE);
    let report = harness
        .pipeline()
        .run("clip.mp4", &qa(), "The cat knocked the vase over.")
        .await
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["classification"]["hallucination_level"], "cognitive");
    assert_eq!(json["stages"][2], "perceptive_evidence");
    assert_eq!(
        json["evidence"]["cognitive"]["cat sneezes so dog runs"]["error"],
        NO_GROUNDING_ERROR
    );
}

#[tokio::test]
async fn test_long_video_still_gets_verdict_and_feedback() {
    let mut harness = Harness::new(
        r#"{"hallucination_level": "perceptive", "entities": {"O": ["vase", "cat"]}}"#,
    );
    harness.frames = 300;
    let report = harness
        .pipeline()
        .run("long.mp4", &qa(), "The cat knocked the vase over.")
        .await
        .unwrap();

    assert_eq!(report.frames_sampled, 300);
    assert_eq!(report.evidence.perceptive["vase"].len(), 300);
    assert_eq!(harness.text.calls_for("reason").len(), 1);
    assert_eq!(harness.text.calls_for("feedback").len(), 1);
    assert_eq!(report.assessment.has_hallucination, Some(true));
    assert_eq!(report.llm_usage.skipped_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn test_queued_events_are_grounded_by_slow_grounders() {
    let mut harness = Harness::new(COGNITIVE);
    // Each call fits the default grounder timeout, two back to back do not
    harness.primary = FixedGrounder::slow(2.0, 6.0, Duration::from_secs(70));
    harness.secondary = FixedGrounder::slow(2.0, 6.0, Duration::from_secs(70));
    let report = harness
        .pipeline()
        .run("clip.mp4", &qa(), "The cat knocked the vase over.")
        .await
        .unwrap();

    for event in ["ball rolls", "vase falls"] {
        assert!(report.evidence.temporal[event].is_grounded(), "{} not grounded", event);
    }
    assert_eq!(harness.primary.calls.load(Ordering::SeqCst), 2);
    assert!(report.open_circuits.is_empty());
}
