//! Async evidence fusers.
//!
//! Each fuser drives its collaborators through the run's
//! [`CallGuard`](crate::resilience::CallGuard) and hands the results to the
//! deterministic gates in `drv-core`. Fusers never fail: a collaborator that
//! errors, times out or is circuit-broken simply abstains.

mod causal;
mod object;
mod temporal;

pub use causal::{
    CausalEvidenceBuilder, CAPTIONER_UNAVAILABLE, CAPTION_UNAVAILABLE, JUDGE_UNAVAILABLE,
};
pub use object::ObjectEvidenceFuser;
pub use temporal::TemporalEvidenceFuser;
