//! Claim routing: which evidence stages run for a classification.
//!
//! A run walks a fixed ladder of stages. Evidence stages are admitted or
//! skipped by a [`RoutingPlan`] derived from the classification; the
//! bookkeeping stages always run.

use serde::{Deserialize, Serialize};

use crate::types::{ClassificationResult, HallucinationLevel};

/// One step of a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Sampled,
    Classified,
    PerceptiveEvidence,
    TemporalEvidence,
    CognitiveEvidence,
    Verdict,
    Feedback,
    Done,
}

impl Stage {
    /// The next stage on the ladder, ignoring routing.
    pub fn successor(self) -> Option<Stage> {
        match self {
            Stage::Sampled => Some(Stage::Classified),
            Stage::Classified => Some(Stage::PerceptiveEvidence),
            Stage::PerceptiveEvidence => Some(Stage::TemporalEvidence),
            Stage::TemporalEvidence => Some(Stage::CognitiveEvidence),
            Stage::CognitiveEvidence => Some(Stage::Verdict),
            Stage::Verdict => Some(Stage::Feedback),
            Stage::Feedback => Some(Stage::Done),
            Stage::Done => None,
        }
    }

    /// Minimum tier an evidence stage needs. `None` for non-evidence stages.
    pub fn required_level(self) -> Option<HallucinationLevel> {
        match self {
            Stage::PerceptiveEvidence => Some(HallucinationLevel::Perceptive),
            Stage::TemporalEvidence => Some(HallucinationLevel::Temporal),
            Stage::CognitiveEvidence => Some(HallucinationLevel::Cognitive),
            _ => None,
        }
    }

    pub fn is_evidence(self) -> bool {
        self.required_level().is_some()
    }

    /// Advance to the next stage the plan admits.
    pub fn advance(self, plan: &RoutingPlan) -> Stage {
        let mut next = self;
        while let Some(candidate) = next.successor() {
            if plan.admits(candidate) {
                return candidate;
            }
            next = candidate;
        }
        Stage::Done
    }
}

/// Which evidence stages a classification admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub level: HallucinationLevel,
    pub has_objects: bool,
    pub has_events: bool,
    pub has_claims: bool,
}

impl RoutingPlan {
    pub fn from_classification(classification: &ClassificationResult) -> Self {
        let entities = &classification.entities;
        Self {
            level: classification.hallucination_level,
            has_objects: !entities.objects.is_empty(),
            has_events: !entities.events.is_empty(),
            has_claims: !entities.causal_claims.is_empty(),
        }
    }

    /// Whether `stage` runs under this plan.
    ///
    /// Object evidence supports every tier, so it is gated only on having
    /// object phrases.
    pub fn admits(&self, stage: Stage) -> bool {
        let Some(required) = stage.required_level() else {
            return true;
        };
        let has_entities = match stage {
            Stage::PerceptiveEvidence => self.has_objects,
            Stage::TemporalEvidence => self.has_events,
            Stage::CognitiveEvidence => self.has_claims,
            _ => false,
        };
        has_entities && self.level.rank() >= required.rank()
    }

    /// The full stage sequence this plan walks, from `Sampled` to `Done`.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = vec![Stage::Sampled];
        let mut stage = Stage::Sampled;
        while stage != Stage::Done {
            stage = stage.advance(self);
            stages.push(stage);
        }
        stages
    }
}

/// The event a causal claim depends on.
///
/// Returns the first event phrase, in the given order, that appears verbatim
/// in the claim. Earlier phrases win even when a later one is a longer match.
pub fn match_event_for_claim<'a, I>(claim: &str, events: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    events.into_iter().find(|event| claim.contains(event))
}
