//! Resilience for collaborator calls.
//!
//! All state here is created per run and dropped with it:
//! - Circuit breaker per collaborator role, tripped by persistent failures
//! - Token budgets per text role and globally
//! - [`CallGuard`] applying both plus per-role timeouts

mod budget;
mod circuit_breaker;
mod guard;

pub use budget::{BudgetTracker, LlmUsage, TokenBudget};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use guard::{CallFailure, CallGuard};
