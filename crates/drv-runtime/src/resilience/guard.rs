//! Per-run call guard: circuit breaker, timeout and token budget in one place.

use std::fmt::Display;
use std::future::Future;

use crate::collaborators::{CollaboratorRole, Gated, TextRole};
use crate::config::{RuntimeConfig, TimeoutConfig};

use super::{BudgetTracker, CircuitBreaker, LlmUsage};

/// A collaborator error the breaker can classify.
pub trait CallFailure: Display {
    /// Whether later calls to the same collaborator will fail the same way,
    /// e.g. a missing deployment or rejected credentials.
    fn is_persistent(&self) -> bool;
}

/// Wraps every collaborator call of one verification run.
///
/// A call that is skipped, fails or times out yields `None`. Callers turn
/// that into the role's abstain value. Only persistent failures count
/// toward the breaker; a bad frame or a slow call never silences the role
/// for the rest of the run.
pub struct CallGuard {
    breaker: CircuitBreaker,
    budget: BudgetTracker,
    timeouts: TimeoutConfig,
}

impl CallGuard {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            budget: BudgetTracker::new(&config.budgets),
            timeouts: config.timeouts.clone(),
        }
    }

    pub async fn call<T, E, F>(&self, role: CollaboratorRole, call: F) -> Option<T>
    where
        E: CallFailure,
        F: Future<Output = Result<T, E>>,
    {
        if self.breaker.is_open(role) {
            tracing::debug!(role = %role, "Circuit open, abstaining");
            return None;
        }

        let timeout = self.timeouts.for_role(role);
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => {
                self.breaker.record_success(role);
                Some(value)
            }
            Ok(Err(e)) if e.is_persistent() => {
                tracing::warn!(role = %role, error = %e, "Collaborator unavailable");
                self.breaker.record_failure(role);
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(role = %role, error = %e, "Collaborator call failed");
                None
            }
            Err(_) => {
                tracing::warn!(role = %role, timeout = ?timeout, "Collaborator call timed out");
                None
            }
        }
    }

    /// [`call`](Self::call) against a [`Gated`] collaborator.
    ///
    /// The timeout covers the collaborator call only. Waiting for the gate
    /// while sibling calls run is not counted.
    pub async fn call_gated<'a, C, T, E, F, Fut>(
        &self,
        role: CollaboratorRole,
        collaborator: &'a Gated<C>,
        f: F,
    ) -> Option<T>
    where
        C: ?Sized + Send + Sync,
        E: CallFailure,
        F: FnOnce(&'a C) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.breaker.is_open(role) {
            tracing::debug!(role = %role, "Circuit open, abstaining");
            return None;
        }
        collaborator.call(|c| self.call(role, f(c))).await
    }

    /// Whether a text call of `estimated_tokens` fits the remaining budget.
    /// A refusal is counted as a skipped call. Roles that are not budgeted
    /// are always admitted.
    pub fn admit_text(&self, role: TextRole, estimated_tokens: u32) -> bool {
        if !role.is_budgeted() || self.budget.can_afford(role, estimated_tokens) {
            return true;
        }
        tracing::warn!(
            role = %role,
            estimated_tokens,
            remaining = self.budget.remaining_role(role),
            "Token budget exhausted, skipping call"
        );
        self.budget.record_skip();
        false
    }

    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn usage(&self) -> LlmUsage {
        self.budget.get_usage()
    }
}
