//! Text-model calls for the four text roles.
//!
//! Every call goes through the run's [`CallGuard`] and returns a
//! [`Structured`] outcome. Callers pick the default for their role; nothing
//! here returns an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use drv_core::{
    parse_classification, parse_consistency, parse_structured, ClassificationResult,
    ConsistencyVerdict, EvidenceBundle, HallucinationAssessment, QaPair, Structured,
    StructuredFeedback,
};

use crate::collaborators::TextRole;
use crate::config::TextRolesConfig;
use crate::prompts;
use crate::providers::{ChatMessage, LlmProvider};
use crate::resilience::CallGuard;

/// Reason attached to a call skipped for lack of budget.
pub const BUDGET_EXHAUSTED: &str = "Token budget exhausted";

/// The text-model side of a verification pipeline.
pub struct TextToolkit {
    providers: BTreeMap<TextRole, Arc<dyn LlmProvider>>,
    config: TextRolesConfig,
}

impl TextToolkit {
    pub fn new(
        providers: BTreeMap<TextRole, Arc<dyn LlmProvider>>,
        config: TextRolesConfig,
    ) -> Self {
        Self { providers, config }
    }

    /// Roles without a provider.
    pub fn missing_roles(&self) -> Vec<TextRole> {
        TextRole::ALL
            .into_iter()
            .filter(|role| !self.providers.contains_key(role))
            .collect()
    }

    /// Raw completion text for `role`.
    pub async fn complete(
        &self,
        role: TextRole,
        messages: Vec<ChatMessage>,
        guard: &CallGuard,
    ) -> Structured<String> {
        let Some(provider) = self.providers.get(&role) else {
            return Structured::unavailable(format!("No provider for {} role", role));
        };
        let completion = &self.config.for_role(role).completion;

        let prompt_tokens: u32 = messages
            .iter()
            .map(|m| provider.estimate_tokens(&m.content))
            .sum();
        if !guard.admit_text(role, prompt_tokens + completion.max_tokens) {
            return Structured::unavailable(BUDGET_EXHAUSTED);
        }

        tracing::debug!(
            role = %role,
            provider = provider.name(),
            model = %completion.model,
            "Text call"
        );
        match guard
            .call(role.collaborator_role(), provider.complete(messages, completion))
            .await
        {
            Some(response) => {
                guard
                    .budget()
                    .record_usage(role, &response.usage, &response.model);
                Structured::Parsed {
                    value: response.content,
                }
            }
            None => Structured::unavailable(format!("{} collaborator unavailable", role)),
        }
    }

    /// Classify the answer's hallucination tier and extract its entities.
    pub async fn classify(
        &self,
        qa: &QaPair,
        answer: &str,
        guard: &CallGuard,
    ) -> Structured<ClassificationResult> {
        let raw = self
            .complete(TextRole::Classify, prompts::classify_messages(qa, answer), guard)
            .await;
        raw.and_then(|text| parse_classification(&text))
    }

    /// Ask the judge whether a causal caption is consistent with common sense.
    pub async fn judge_consistency(
        &self,
        caption: &str,
        context: &str,
        guard: &CallGuard,
    ) -> Structured<ConsistencyVerdict> {
        let raw = self
            .complete(TextRole::Judge, prompts::judge_messages(caption, context), guard)
            .await;
        raw.and_then(|text| parse_consistency(&text))
    }

    pub async fn reason(
        &self,
        evidence: &EvidenceBundle,
        answer: &str,
        guard: &CallGuard,
    ) -> Structured<HallucinationAssessment> {
        let raw = self
            .complete(TextRole::Reason, prompts::reason_messages(evidence, answer), guard)
            .await;
        raw.and_then(|text| parse_structured(&text))
    }

    pub async fn feedback(
        &self,
        evidence: &EvidenceBundle,
        assessment: &HallucinationAssessment,
        guard: &CallGuard,
    ) -> Structured<StructuredFeedback> {
        let raw = self
            .complete(
                TextRole::Feedback,
                prompts::feedback_messages(evidence, assessment),
                guard,
            )
            .await;
        raw.and_then(|text| parse_structured(&text))
    }
}

impl std::fmt::Debug for TextToolkit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let providers: BTreeMap<String, &str> = self
            .providers
            .iter()
            .map(|(role, p)| (role.to_string(), p.name()))
            .collect();
        f.debug_struct("TextToolkit")
            .field("providers", &providers)
            .finish()
    }
}
