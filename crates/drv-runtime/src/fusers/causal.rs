//! Causal evidence: caption the grounded interval, then sanity-check it.

use drv_core::{
    resolve_consistency, select_interval_frames, CognitiveEvidence, ConsistencyVerdict, Frame,
    Structured, TimeInterval, CAUSAL_CAPTION_INSTRUCTION, NO_FRAMES_CAPTION,
};

use crate::collaborators::{Captioner, CollaboratorRole, Gated};
use crate::resilience::CallGuard;
use crate::text::TextToolkit;

/// Caption recorded when the captioner could not be reached.
pub const CAPTION_UNAVAILABLE: &str = "Causal caption unavailable";

/// Verdict reason when the captioner could not be reached.
pub const CAPTIONER_UNAVAILABLE: &str = "Captioning collaborator unavailable";

/// Verdict reason when the judge could not be reached.
pub const JUDGE_UNAVAILABLE: &str = "Consistency check unavailable";

pub struct CausalEvidenceBuilder {
    captioner: Gated<dyn Captioner>,
    max_frames: usize,
}

impl CausalEvidenceBuilder {
    pub fn new(captioner: Gated<dyn Captioner>, max_frames: usize) -> Self {
        Self {
            captioner,
            max_frames,
        }
    }

    /// Caption the frames inside `interval` and have the judge check the
    /// caption against `context`.
    pub async fn explain(
        &self,
        frames: &[Frame],
        interval: TimeInterval,
        context: &str,
        text: &TextToolkit,
        guard: &CallGuard,
    ) -> CognitiveEvidence {
        let timestamps: Vec<f64> = frames.iter().map(|f| f.timestamp).collect();
        let selected: Vec<Frame> = select_interval_frames(&timestamps, interval, self.max_frames)
            .into_iter()
            .map(|i| frames[i].clone())
            .collect();

        let caption = if selected.is_empty() {
            tracing::debug!(interval = %interval, "No frames in interval, captioner skipped");
            NO_FRAMES_CAPTION.to_string()
        } else {
            let caption = guard
                .call_gated(CollaboratorRole::Captioner, &self.captioner, |c| {
                    c.caption(&selected, CAUSAL_CAPTION_INSTRUCTION)
                })
                .await;
            match caption {
                Some(caption) => caption,
                None => {
                    return CognitiveEvidence::Explained {
                        generated_caption: CAPTION_UNAVAILABLE.to_string(),
                        common_sense_check: ConsistencyVerdict::negative(CAPTIONER_UNAVAILABLE),
                    }
                }
            }
        };

        let common_sense_check = match text.judge_consistency(&caption, context, guard).await {
            Structured::Unavailable { reason } => {
                tracing::warn!(reason = %reason, "Consistency judge unavailable");
                ConsistencyVerdict::negative(JUDGE_UNAVAILABLE)
            }
            outcome => resolve_consistency(outcome),
        };

        CognitiveEvidence::Explained {
            generated_caption: caption,
            common_sense_check,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{CollaboratorError, TextRole};
    use crate::config::{RuntimeConfig, TextRolesConfig};
    use crate::providers::{
        ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
    };
    use async_trait::async_trait;
    use drv_core::CONSISTENCY_PARSE_FAILED;
    use image::RgbImage;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingCaptioner {
        seen: Mutex<Vec<Vec<f64>>>,
        fail: bool,
    }

    #[async_trait]
    impl Captioner for RecordingCaptioner {
        async fn caption(
            &self,
            frames: &[Frame],
            instruction: &str,
        ) -> Result<String, CollaboratorError> {
            assert_eq!(instruction, CAUSAL_CAPTION_INSTRUCTION);
            self.seen
                .lock()
                .push(frames.iter().map(|f| f.timestamp).collect());
            if self.fail {
                return Err(CollaboratorError::Unavailable("gpu busy".to_string()));
            }
            Ok("ball hits vase → vase falls".to_string())
        }
    }

    struct Judge {
        reply: Result<&'static str, ProviderError>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmProvider for Judge {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            self.prompts
                .lock()
                .extend(messages.into_iter().map(|m| m.content));
            self.reply.clone().map(|content| CompletionResponse {
                content: content.to_string(),
                usage: TokenUsage::default(),
                model: config.model.clone(),
                finish_reason: None,
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "judge"
        }
    }

    fn frames(n: usize) -> Vec<Frame> {
        (0..n)
            .map(|i| Frame::new(RgbImage::new(2, 2), i as f64, i))
            .collect()
    }

    fn toolkit(judge: Arc<Judge>) -> TextToolkit {
        let judge: Arc<dyn LlmProvider> = judge;
        TextToolkit::new(
            BTreeMap::from([(TextRole::Judge, judge)]),
            TextRolesConfig::default(),
        )
    }

    fn judge(reply: Result<&'static str, ProviderError>) -> Arc<Judge> {
        Arc::new(Judge {
            reply,
            prompts: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_long_interval_is_downsampled_to_eight() {
        let captioner = Arc::new(RecordingCaptioner::default());
        let builder = CausalEvidenceBuilder::new(Gated::new(captioner.clone(), false), 8);
        let judge = judge(Ok(r#"{"is_consistent": true, "reason": "plausible"}"#));
        let guard = CallGuard::new(&RuntimeConfig::default());

        let evidence = builder
            .explain(
                &frames(30),
                TimeInterval::new(5.0, 24.0),
                "Event 'ball rolls' at interval [5, 24]",
                &toolkit(judge.clone()),
                &guard,
            )
            .await;

        let seen = captioner.seen.lock().clone();
        assert_eq!(
            seen,
            vec![vec![5.0, 7.0, 10.0, 13.0, 15.0, 18.0, 21.0, 24.0]]
        );
        assert_eq!(
            evidence,
            CognitiveEvidence::Explained {
                generated_caption: "ball hits vase → vase falls".to_string(),
                common_sense_check: ConsistencyVerdict {
                    is_consistent: true,
                    reason: "plausible".to_string()
                },
            }
        );
        assert!(judge
            .prompts
            .lock()
            .iter()
            .any(|p| p.contains("Event 'ball rolls' at interval [5, 24]")));
    }

    #[tokio::test]
    async fn test_empty_interval_uses_sentinel_without_captioner() {
        let captioner = Arc::new(RecordingCaptioner::default());
        let builder = CausalEvidenceBuilder::new(Gated::new(captioner.clone(), false), 8);
        let guard = CallGuard::new(&RuntimeConfig::default());

        let evidence = builder
            .explain(
                &frames(5),
                TimeInterval::new(10.0, 12.0),
                "ctx",
                &toolkit(judge(Ok(r#"{"is_consistent": false, "reason": "nothing seen"}"#))),
                &guard,
            )
            .await;

        assert!(captioner.seen.lock().is_empty());
        match evidence {
            CognitiveEvidence::Explained {
                generated_caption, ..
            } => assert_eq!(generated_caption, NO_FRAMES_CAPTION),
            other => panic!("unexpected evidence: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unparseable_judgment_is_negative() {
        let builder = CausalEvidenceBuilder::new(
            Gated::new(Arc::new(RecordingCaptioner::default()), true),
            8,
        );
        let guard = CallGuard::new(&RuntimeConfig::default());

        let evidence = builder
            .explain(
                &frames(5),
                TimeInterval::new(1.0, 3.0),
                "ctx",
                &toolkit(judge(Ok("It is consistent."))),
                &guard,
            )
            .await;

        assert!(matches!(
            evidence,
            CognitiveEvidence::Explained { common_sense_check, .. }
                if common_sense_check == ConsistencyVerdict::negative(CONSISTENCY_PARSE_FAILED)
        ));
    }

    #[tokio::test]
    async fn test_captioner_failure_skips_judge() {
        let captioner = Arc::new(RecordingCaptioner {
            fail: true,
            ..Default::default()
        });
        let builder = CausalEvidenceBuilder::new(Gated::new(captioner, false), 8);
        let judge = judge(Ok(r#"{"is_consistent": true, "reason": "x"}"#));
        let guard = CallGuard::new(&RuntimeConfig::default());

        let evidence = builder
            .explain(
                &frames(5),
                TimeInterval::new(0.0, 4.0),
                "ctx",
                &toolkit(judge.clone()),
                &guard,
            )
            .await;

        assert_eq!(
            evidence,
            CognitiveEvidence::Explained {
                generated_caption: CAPTION_UNAVAILABLE.to_string(),
                common_sense_check: ConsistencyVerdict::negative(CAPTIONER_UNAVAILABLE),
            }
        );
        assert!(judge.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_judge_failure_is_negative() {
        let builder = CausalEvidenceBuilder::new(
            Gated::new(Arc::new(RecordingCaptioner::default()), false),
            8,
        );
        let guard = CallGuard::new(&RuntimeConfig::default());

        let evidence = builder
            .explain(
                &frames(5),
                TimeInterval::new(0.0, 4.0),
                "ctx",
                &toolkit(judge(Err(ProviderError::HttpError("reset".to_string())))),
                &guard,
            )
            .await;

        assert!(matches!(
            evidence,
            CognitiveEvidence::Explained { common_sense_check, .. }
                if common_sense_check.reason == JUDGE_UNAVAILABLE
        ));
    }
}
