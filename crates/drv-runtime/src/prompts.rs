//! Prompts for the four text roles.
//!
//! Each role gets a fixed system prompt (task plus the exact JSON shape to
//! return) and a user message carrying the run's data. Data is embedded as
//! pretty-printed JSON so the models see the same field names the parser
//! expects back.

use serde::Serialize;

use drv_core::{EvidenceBundle, HallucinationAssessment, QaPair, TimeInterval};

use crate::collaborators::TextRole;
use crate::providers::ChatMessage;

/// Classification: tier plus entity extraction.
pub const CLASSIFY_SYSTEM_PROMPT: &str = r#"
You analyze a video question, its options, and a vision-language model's answer.

1. Classify the hallucination level. Choose exactly one of perceptive, temporal, cognitive:
   - perceptive: errors in object, color or count recognition, OCR, or static spatial relations
   - temporal: errors in event order, dynamic attributes (speed, direction), or action sequence
   - cognitive: errors in causal reasoning, counterfactual prediction, or common sense
2. Extract every relevant entity from the answer:
   - O (objects): physical items, e.g. "red car", "baby"
   - E (events): dynamic actions, e.g. "eat snack", "walk to shelf"
   - C (causal claims): cause-effect statements, e.g. "baby cried because mom blamed him"

Write each event phrase exactly as it appears inside any causal claim that depends on it.

Output ONLY valid JSON, no extra text:
{
  "hallucination_level": "perceptive" | "temporal" | "cognitive",
  "entities": { "O": ["..."], "E": ["..."], "C": ["..."] }
}
"#;

/// Common-sense check of a causal caption.
pub const JUDGE_SYSTEM_PROMPT: &str = r#"
Judge whether a causal relationship observed in a video is consistent with common sense, and explain why.

Output ONLY valid JSON:
{
  "is_consistent": true | false,
  "reason": "explanation"
}
"#;

/// Final verdict from the gathered evidence.
pub const REASON_SYSTEM_PROMPT: &str = r#"
Judge whether a vision-language model's answer contains hallucinations by comparing it with independently gathered video evidence.

Evidence sections:
- perceptive: per object, the frames where two detectors agree on its location
- temporal: per event, the time interval two grounding models agree on (empty means not groundable)
- cognitive: per causal claim, a caption of the grounded interval and a common-sense check

Missing or empty evidence is not proof of hallucination on its own.

Output ONLY valid JSON:
{
  "has_hallucination": true | false,
  "error_points": ["error description", "..."],
  "confidence": 0.0-1.0
}
"#;

/// Corrective feedback for the answering model.
pub const FEEDBACK_SYSTEM_PROMPT: &str = r#"
Write structured feedback that helps a vision-language model correct hallucinations in its answer.

Output ONLY valid JSON:
{
  "feedback": {
    "A": "summary of the spatial, temporal and causal evidence",
    "R": "correction recommendations"
  }
}
"#;

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

/// Messages for classifying an answer.
pub fn classify_messages(qa: &QaPair, answer: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt(TextRole::Classify).trim()),
        ChatMessage::user(format!(
            "QA pair:\n{}\n\nModel answer:\n{}",
            to_json(qa),
            answer
        )),
    ]
}

/// Messages for judging a causal caption against its context.
pub fn judge_messages(caption: &str, context: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt(TextRole::Judge).trim()),
        ChatMessage::user(format!(
            "Causal relationship: {}\nVideo context: {}",
            caption, context
        )),
    ]
}

/// Messages for the final hallucination verdict.
pub fn reason_messages(evidence: &EvidenceBundle, answer: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt(TextRole::Reason).trim()),
        ChatMessage::user(format!(
            "Verification evidence:\n{}\n\nModel answer:\n{}",
            to_json(evidence),
            answer
        )),
    ]
}

/// Messages for corrective feedback.
pub fn feedback_messages(
    evidence: &EvidenceBundle,
    assessment: &HallucinationAssessment,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt(TextRole::Feedback).trim()),
        ChatMessage::user(format!(
            "Verification evidence:\n{}\n\nHallucination assessment:\n{}",
            to_json(evidence),
            to_json(assessment)
        )),
    ]
}

/// Context line handed to the judge for a grounded claim.
pub fn judge_context(event: &str, interval: TimeInterval) -> String {
    format!("Event '{}' at interval {}", event, interval)
}

/// System prompt for a text role.
pub fn system_prompt(role: TextRole) -> &'static str {
    match role {
        TextRole::Classify => CLASSIFY_SYSTEM_PROMPT,
        TextRole::Judge => JUDGE_SYSTEM_PROMPT,
        TextRole::Reason => REASON_SYSTEM_PROMPT,
        TextRole::Feedback => FEEDBACK_SYSTEM_PROMPT,
    }
}
