//! Temporal evidence: two grounders, one interval.

use std::path::Path;

use drv_core::{fuse_groundings, FusedInterval, GroundingObservation};

use crate::collaborators::{CollaboratorRole, Gated, TemporalGrounder};
use crate::resilience::CallGuard;

pub struct TemporalEvidenceFuser {
    primary: Gated<dyn TemporalGrounder>,
    secondary: Gated<dyn TemporalGrounder>,
}

impl TemporalEvidenceFuser {
    pub fn new(
        primary: Gated<dyn TemporalGrounder>,
        secondary: Gated<dyn TemporalGrounder>,
    ) -> Self {
        Self { primary, secondary }
    }

    /// Ground `event` with both grounders concurrently and intersect their
    /// first intervals. A failed grounder counts as an empty observation.
    pub async fn fuse(&self, video: &Path, event: &str, guard: &CallGuard) -> FusedInterval {
        let (primary, secondary) = tokio::join!(
            guard.call_gated(CollaboratorRole::PrimaryGrounder, &self.primary, |g| {
                g.ground(video, event)
            }),
            guard.call_gated(CollaboratorRole::SecondaryGrounder, &self.secondary, |g| {
                g.ground(video, event)
            }),
        );

        let primary = primary.unwrap_or_else(GroundingObservation::abstain);
        let secondary = secondary.unwrap_or_else(GroundingObservation::abstain);
        let fused = fuse_groundings(&primary, &secondary);

        tracing::debug!(
            event,
            grounded = fused.is_grounded(),
            confidence = fused.confidence,
            "Fused event interval"
        );
        fused
    }
}
