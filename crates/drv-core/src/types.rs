//! Core types for drv evidence fusion.
//!
//! These types mirror the records exchanged with the reasoning collaborators,
//! so their serialized field names are part of the contract.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An axis-aligned box in pixel coordinates: top-left corner plus extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Build a box from corner coordinates `(x1, y1)`–`(x2, y2)`.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x: x1,
            y: y1,
            w: x2 - x1,
            h: y2 - y1,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    /// Strictly positive width and height.
    pub fn has_area(&self) -> bool {
        self.w > 0.0 && self.h > 0.0
    }

    /// The intersection rectangle, or `None` when the boxes only touch or miss.
    pub fn intersection(&self, other: &BBox) -> Option<BBox> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        if x2 > x1 && y2 > y1 {
            Some(BBox::from_corners(x1, y1, x2, y2))
        } else {
            None
        }
    }
}

/// A single detector's finding for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f64,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f64) -> Self {
        Self { bbox, confidence }
    }
}

/// One agreed-upon observation of an object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackEntry {
    pub bbox: BBox,
    pub timestamp: f64,
    pub confidence: f64,
}

/// Frames on which both detectors agree about where an object is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusedTrack {
    pub entries: Vec<TrackEntry>,
}

impl FusedTrack {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.timestamp).collect()
    }
}

/// A closed time span in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct TimeInterval {
    pub start: f64,
    pub end: f64,
}

impl TimeInterval {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Inclusive on both ends.
    pub fn contains(&self, timestamp: f64) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }

    /// Overlap with `other`, if it has positive length.
    pub fn intersection(&self, other: &TimeInterval) -> Option<TimeInterval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (end > start).then(|| TimeInterval::new(start, end))
    }
}

impl From<(f64, f64)> for TimeInterval {
    fn from((start, end): (f64, f64)) -> Self {
        Self { start, end }
    }
}

impl From<TimeInterval> for (f64, f64) {
    fn from(interval: TimeInterval) -> Self {
        (interval.start, interval.end)
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// What one temporal-grounding collaborator reported for an event phrase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundingObservation {
    #[serde(default)]
    pub intervals: Vec<TimeInterval>,
    #[serde(default, alias = "conf")]
    pub confidence: Option<f64>,
}

impl GroundingObservation {
    pub fn new(intervals: Vec<TimeInterval>, confidence: Option<f64>) -> Self {
        Self {
            intervals,
            confidence,
        }
    }

    /// No intervals and no confidence.
    pub fn abstain() -> Self {
        Self::default()
    }
}

/// The trusted interval agreed on by both grounding collaborators.
///
/// An empty `time_intervals` means the event could not be grounded; the
/// confidence is still reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusedInterval {
    pub time_intervals: Vec<TimeInterval>,
    pub confidence: f64,
}

impl FusedInterval {
    pub fn is_grounded(&self) -> bool {
        !self.time_intervals.is_empty()
    }

    pub fn first(&self) -> Option<TimeInterval> {
        self.time_intervals.first().copied()
    }
}

/// Hallucination tier, ordered by how much evidence it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HallucinationLevel {
    #[default]
    Perceptive,
    Temporal,
    Cognitive,
}

impl HallucinationLevel {
    /// Position on the verification ladder.
    pub fn rank(&self) -> u8 {
        match self {
            HallucinationLevel::Perceptive => 0,
            HallucinationLevel::Temporal => 1,
            HallucinationLevel::Cognitive => 2,
        }
    }

    /// Parse a level label, case-insensitively. Unknown labels are `None`.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "perceptive" => Some(HallucinationLevel::Perceptive),
            "temporal" => Some(HallucinationLevel::Temporal),
            "cognitive" => Some(HallucinationLevel::Cognitive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HallucinationLevel::Perceptive => "perceptive",
            HallucinationLevel::Temporal => "temporal",
            HallucinationLevel::Cognitive => "cognitive",
        }
    }
}

impl fmt::Display for HallucinationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Classifiers are free-form text generators; an unrecognized label is treated
// as the lowest tier rather than rejecting the whole classification.
impl<'de> Deserialize<'de> for HallucinationLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = Option::<String>::deserialize(deserializer)?;
        Ok(label
            .as_deref()
            .and_then(HallucinationLevel::parse)
            .unwrap_or_default())
    }
}

/// Phrases extracted from the answer, grouped by what they claim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    /// Physical objects.
    #[serde(rename = "O", default)]
    pub objects: Vec<String>,

    /// Dynamic events / actions.
    #[serde(rename = "E", default)]
    pub events: Vec<String>,

    /// Cause-effect claims.
    #[serde(rename = "C", default)]
    pub causal_claims: Vec<String>,
}

impl Entities {
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.events.is_empty() && self.causal_claims.is_empty()
    }

    /// Drop blank and repeated phrases, keeping first occurrences in order.
    pub fn dedup(&mut self) {
        for phrases in [
            &mut self.objects,
            &mut self.events,
            &mut self.causal_claims,
        ] {
            let mut seen = std::collections::HashSet::new();
            phrases.retain(|p| !p.trim().is_empty() && seen.insert(p.clone()));
        }
    }
}

/// The classifier's reading of the answer: tier plus extracted entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(default)]
    pub hallucination_level: HallucinationLevel,
    #[serde(default)]
    pub entities: Entities,
}

/// Common-sense judgment of a causal caption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyVerdict {
    pub is_consistent: bool,
    pub reason: String,
}

impl ConsistencyVerdict {
    pub fn negative(reason: impl Into<String>) -> Self {
        Self {
            is_consistent: false,
            reason: reason.into(),
        }
    }
}

/// Message recorded for a causal claim with no usable temporal grounding.
pub const NO_GROUNDING_ERROR: &str = "No temporal grounding found for claim";

/// Evidence gathered for one causal claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CognitiveEvidence {
    Explained {
        generated_caption: String,
        common_sense_check: ConsistencyVerdict,
    },
    Ungrounded {
        error: String,
    },
}

impl CognitiveEvidence {
    pub fn ungrounded() -> Self {
        CognitiveEvidence::Ungrounded {
            error: NO_GROUNDING_ERROR.to_string(),
        }
    }

    pub fn is_grounded(&self) -> bool {
        matches!(self, CognitiveEvidence::Explained { .. })
    }
}

/// Everything gathered during one verification run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub perceptive: BTreeMap<String, FusedTrack>,
    pub temporal: BTreeMap<String, FusedInterval>,
    pub cognitive: BTreeMap<String, CognitiveEvidence>,
}

impl EvidenceBundle {
    pub fn is_empty(&self) -> bool {
        self.perceptive.is_empty() && self.temporal.is_empty() && self.cognitive.is_empty()
    }
}

/// The question the LVM was answering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
}

impl QaPair {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            options: Vec::new(),
        }
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }
}

/// The reasoning collaborator's verdict on the answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HallucinationAssessment {
    #[serde(default)]
    pub has_hallucination: Option<bool>,
    #[serde(default)]
    pub error_points: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Corrective guidance: evidence summary (`A`) and recommendations (`R`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackBody {
    #[serde(rename = "A", default)]
    pub analysis: String,
    #[serde(rename = "R", default)]
    pub recommendations: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredFeedback {
    #[serde(default)]
    pub feedback: FeedbackBody,
}
