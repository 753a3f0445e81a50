//! Token budgets for text-model calls.
//!
//! One global budget for the run plus an optional budget per text role.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::collaborators::TextRole;
use crate::config::BudgetConfig;
use crate::providers::TokenUsage;

/// Token budget for one scope.
pub struct TokenBudget {
    pub max_tokens: u32,
    used: AtomicU32,
}

impl TokenBudget {
    pub fn new(max_tokens: u32) -> Self {
        Self {
            max_tokens,
            used: AtomicU32::new(0),
        }
    }

    pub fn can_afford(&self, tokens: u32) -> bool {
        self.remaining() >= tokens
    }

    pub fn record(&self, tokens: u32) {
        self.used.fetch_add(tokens, Ordering::SeqCst);
    }

    pub fn remaining(&self) -> u32 {
        self.max_tokens.saturating_sub(self.used())
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }
}

/// Accumulated text-model usage for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub total_tokens: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub llm_calls: u32,

    /// Estimated cost in USD
    pub estimated_cost: f64,

    /// Calls skipped because a budget was exhausted
    pub skipped_calls: u32,
}

impl LlmUsage {
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total();
        self.llm_calls += 1;
        self.estimated_cost += Self::estimate_cost(usage, model);
    }

    fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        // USD per million tokens
        let (input_rate, output_rate) = match model {
            m if m.contains("gpt-4o-mini") => (0.15, 0.6),
            m if m.contains("gpt-4o") => (2.5, 10.0),
            m if m.contains("deepseek-reasoner") => (0.55, 2.19),
            m if m.contains("deepseek") => (0.27, 1.1),
            // Self-hosted models
            _ => (0.0, 0.0),
        };

        let input_cost = (usage.prompt_tokens as f64 / 1_000_000.0) * input_rate;
        let output_cost = (usage.completion_tokens as f64 / 1_000_000.0) * output_rate;
        input_cost + output_cost
    }
}

/// Budget tracker for one verification run.
pub struct BudgetTracker {
    role_budgets: HashMap<TextRole, TokenBudget>,
    global_budget: TokenBudget,
    usage: RwLock<LlmUsage>,
}

impl BudgetTracker {
    pub fn new(config: &BudgetConfig) -> Self {
        let role_budgets = config
            .per_role_max_tokens
            .iter()
            .map(|(role, max)| (*role, TokenBudget::new(*max)))
            .collect();

        Self {
            role_budgets,
            global_budget: TokenBudget::new(config.global_max_tokens),
            usage: RwLock::new(LlmUsage::default()),
        }
    }

    pub fn can_afford(&self, role: TextRole, estimated_tokens: u32) -> bool {
        let role_ok = self
            .role_budgets
            .get(&role)
            .map(|b| b.can_afford(estimated_tokens))
            .unwrap_or(true);

        role_ok && self.global_budget.can_afford(estimated_tokens)
    }

    pub fn record_usage(&self, role: TextRole, usage: &TokenUsage, model: &str) {
        let total = usage.total();
        if let Some(budget) = self.role_budgets.get(&role) {
            budget.record(total);
        }
        self.global_budget.record(total);
        self.usage.write().add(usage, model);
    }

    pub fn record_skip(&self) {
        self.usage.write().skipped_calls += 1;
    }

    pub fn get_usage(&self) -> LlmUsage {
        self.usage.read().clone()
    }

    pub fn remaining_global(&self) -> u32 {
        self.global_budget.remaining()
    }

    /// Remaining budget for `role`; the global remainder if it has none of its own.
    pub fn remaining_role(&self, role: TextRole) -> u32 {
        self.role_budgets
            .get(&role)
            .map(|b| b.remaining())
            .unwrap_or_else(|| self.remaining_global())
    }
}

impl Default for BudgetTracker {
    fn default() -> Self {
        Self::new(&BudgetConfig::default())
    }
}
