//! Object evidence: two detectors, one track.

use drv_core::{fuse_track, refine_with_mask, Detection, Frame, FusedTrack};

use crate::collaborators::{
    ClassDetector, CollaboratorRole, DetectionThresholds, Gated, GroundedDetector,
    SegmentationRefiner,
};
use crate::resilience::CallGuard;

/// Fuses a class-conditioned detector with a grounded detector refined by
/// segmentation.
pub struct ObjectEvidenceFuser {
    class_detector: Gated<dyn ClassDetector>,
    grounded_detector: Gated<dyn GroundedDetector>,
    segmenter: Gated<dyn SegmentationRefiner>,
    thresholds: DetectionThresholds,
}

impl ObjectEvidenceFuser {
    pub fn new(
        class_detector: Gated<dyn ClassDetector>,
        grounded_detector: Gated<dyn GroundedDetector>,
        segmenter: Gated<dyn SegmentationRefiner>,
        thresholds: DetectionThresholds,
    ) -> Self {
        Self {
            class_detector,
            grounded_detector,
            segmenter,
            thresholds,
        }
    }

    /// Track `object` across `frames`.
    ///
    /// A frame contributes only if both sides detect the object and their
    /// boxes overlap. Failed calls drop the frame, never the track.
    pub async fn fuse(&self, frames: &[Frame], object: &str, guard: &CallGuard) -> FusedTrack {
        let mut class_conditioned = Vec::with_capacity(frames.len());
        let mut grounded = Vec::with_capacity(frames.len());
        let mut timestamps = Vec::with_capacity(frames.len());

        for frame in frames {
            let a = self.detect_class(frame, object, guard).await;
            // The gate needs both sides; skip the grounded pass when it cannot pass.
            let b = match a {
                Some(_) => self.detect_grounded(frame, object, guard).await,
                None => None,
            };
            class_conditioned.push(a);
            grounded.push(b);
            timestamps.push(frame.timestamp);
        }

        let track = fuse_track(&class_conditioned, &grounded, &timestamps);
        tracing::debug!(
            object,
            frames = frames.len(),
            agreed = track.len(),
            "Fused object track"
        );
        track
    }

    async fn detect_class(
        &self,
        frame: &Frame,
        object: &str,
        guard: &CallGuard,
    ) -> Option<Detection> {
        guard
            .call_gated(CollaboratorRole::ClassDetector, &self.class_detector, |d| {
                d.detect(frame, object)
            })
            .await
            .flatten()
    }

    /// Best grounded box, converted to pixels and tightened to its mask.
    async fn detect_grounded(
        &self,
        frame: &Frame,
        phrase: &str,
        guard: &CallGuard,
    ) -> Option<Detection> {
        let thresholds = self.thresholds;
        let boxes = guard
            .call_gated(CollaboratorRole::GroundedDetector, &self.grounded_detector, |d| {
                d.detect(frame, phrase, thresholds)
            })
            .await?;
        let proposal = boxes.into_iter().next()?;
        let prompt = proposal.to_pixels(frame.width(), frame.height());

        let mask = guard
            .call_gated(CollaboratorRole::Segmenter, &self.segmenter, |s| {
                s.segment(frame, prompt)
            })
            .await
            .flatten()?;

        let refined = refine_with_mask(&mask, proposal.logit);
        if refined.is_none() {
            tracing::trace!(phrase, frame = frame.source_index, "Empty mask, dropping frame");
        }
        refined
    }
}
