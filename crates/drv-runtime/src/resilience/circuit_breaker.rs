//! Per-role circuit breaker.
//!
//! When a collaborator fails repeatedly, its circuit opens and the rest of
//! its calls abstain immediately instead of waiting out another timeout.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::collaborators::CollaboratorRole;
use crate::config::humantime_serde;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Time before a probe call is allowed through
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,

    /// Probe successes needed to close the circuit again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CircuitState {
    Closed { failures: u32 },

    /// All calls abstain
    Open { opened_at: Instant },

    /// Probe calls are allowed through
    HalfOpen { successes: u32 },
}

/// Circuit breaker with one independent circuit per collaborator role.
pub struct CircuitBreaker {
    states: RwLock<HashMap<CollaboratorRole, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Whether calls to `role` should be skipped.
    pub fn is_open(&self, role: CollaboratorRole) -> bool {
        let states = self.states.read();
        match states.get(&role) {
            Some(CircuitState::Open { opened_at }) => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    drop(states);
                    self.transition_to_half_open(role);
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    pub fn record_success(&self, role: CollaboratorRole) {
        let mut states = self.states.write();
        match states.get(&role).cloned() {
            Some(CircuitState::HalfOpen { successes }) => {
                if successes + 1 >= self.config.success_threshold {
                    states.insert(role, CircuitState::Closed { failures: 0 });
                    tracing::info!(role = %role, "Circuit closed after successful recovery");
                } else {
                    states.insert(
                        role,
                        CircuitState::HalfOpen {
                            successes: successes + 1,
                        },
                    );
                }
            }
            Some(CircuitState::Closed { .. }) => {
                states.insert(role, CircuitState::Closed { failures: 0 });
            }
            _ => {}
        }
    }

    pub fn record_failure(&self, role: CollaboratorRole) {
        let mut states = self.states.write();
        let failures = match states.get(&role).cloned() {
            Some(CircuitState::Closed { failures }) => failures + 1,
            None => 1,
            Some(CircuitState::HalfOpen { .. }) => {
                states.insert(
                    role,
                    CircuitState::Open {
                        opened_at: Instant::now(),
                    },
                );
                tracing::warn!(role = %role, "Circuit reopened after failed recovery probe");
                return;
            }
            Some(CircuitState::Open { .. }) => return,
        };

        if failures >= self.config.failure_threshold {
            states.insert(
                role,
                CircuitState::Open {
                    opened_at: Instant::now(),
                },
            );
            tracing::warn!(role = %role, failures, "Circuit opened after repeated failures");
        } else {
            states.insert(role, CircuitState::Closed { failures });
        }
    }

    fn transition_to_half_open(&self, role: CollaboratorRole) {
        let mut states = self.states.write();
        if matches!(states.get(&role), Some(CircuitState::Open { .. })) {
            states.insert(role, CircuitState::HalfOpen { successes: 0 });
            tracing::info!(role = %role, "Circuit half-open, allowing a probe call");
        }
    }

    pub fn state(&self, role: CollaboratorRole) -> CircuitState {
        self.states
            .read()
            .get(&role)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }

    /// Roles whose circuit is currently open.
    pub fn open_roles(&self) -> Vec<CollaboratorRole> {
        let mut roles: Vec<_> = self
            .states
            .read()
            .iter()
            .filter(|(_, state)| matches!(state, CircuitState::Open { .. }))
            .map(|(role, _)| *role)
            .collect();
        roles.sort();
        roles
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::default();
        assert!(!cb.is_open(CollaboratorRole::Captioner));
        assert!(matches!(
            cb.state(CollaboratorRole::Captioner),
            CircuitState::Closed { failures: 0 }
        ));
    }

    #[test]
    fn test_circuit_opens_after_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });

        cb.record_failure(CollaboratorRole::Segmenter);
        assert!(!cb.is_open(CollaboratorRole::Segmenter));

        cb.record_failure(CollaboratorRole::Segmenter);
        assert!(cb.is_open(CollaboratorRole::Segmenter));
        assert_eq!(cb.open_roles(), vec![CollaboratorRole::Segmenter]);
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = CircuitBreaker::default();

        cb.record_failure(CollaboratorRole::Judge);
        cb.record_failure(CollaboratorRole::Judge);
        cb.record_success(CollaboratorRole::Judge);

        cb.record_failure(CollaboratorRole::Judge);
        cb.record_failure(CollaboratorRole::Judge);
        assert!(!cb.is_open(CollaboratorRole::Judge));
    }

    #[test]
    fn test_roles_are_independent() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });

        cb.record_failure(CollaboratorRole::PrimaryGrounder);
        assert!(cb.is_open(CollaboratorRole::PrimaryGrounder));
        assert!(!cb.is_open(CollaboratorRole::SecondaryGrounder));
    }

    #[test]
    fn test_half_open_after_recovery_timeout() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::ZERO,
            success_threshold: 1,
        });

        cb.record_failure(CollaboratorRole::Reasoner);
        assert!(!cb.is_open(CollaboratorRole::Reasoner));
        assert!(matches!(
            cb.state(CollaboratorRole::Reasoner),
            CircuitState::HalfOpen { .. }
        ));

        cb.record_success(CollaboratorRole::Reasoner);
        assert!(matches!(
            cb.state(CollaboratorRole::Reasoner),
            CircuitState::Closed { failures: 0 }
        ));
    }
}
