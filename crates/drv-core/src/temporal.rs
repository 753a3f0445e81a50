//! Temporal agreement between two grounding collaborators.

use crate::types::{FusedInterval, GroundingObservation};

/// Confidence assumed for a collaborator that did not report one.
pub const DEFAULT_GROUNDING_CONFIDENCE: f64 = 0.5;

/// Fuse two grounding observations for the same event phrase.
///
/// Only each side's first interval is considered. The fused list holds their
/// intersection when it has positive length and is empty otherwise. The
/// confidence is the mean of both sides either way.
pub fn fuse_groundings(
    primary: &GroundingObservation,
    secondary: &GroundingObservation,
) -> FusedInterval {
    let time_intervals = match (primary.intervals.first(), secondary.intervals.first()) {
        (Some(a), Some(b)) => a.intersection(b).into_iter().collect(),
        _ => Vec::new(),
    };

    let confidence = (primary.confidence.unwrap_or(DEFAULT_GROUNDING_CONFIDENCE)
        + secondary.confidence.unwrap_or(DEFAULT_GROUNDING_CONFIDENCE))
        / 2.0;

    FusedInterval {
        time_intervals,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeInterval;
    use proptest::prelude::*;

    fn obs(intervals: &[(f64, f64)], confidence: Option<f64>) -> GroundingObservation {
        GroundingObservation::new(
            intervals.iter().map(|&(s, e)| TimeInterval::new(s, e)).collect(),
            confidence,
        )
    }

    #[test]
    fn test_overlap_is_emitted() {
        let fused = fuse_groundings(&obs(&[(1.0, 5.0)], Some(0.8)), &obs(&[(3.0, 7.0)], Some(0.6)));
        assert_eq!(fused.time_intervals, vec![TimeInterval::new(3.0, 5.0)]);
        assert!((fused.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_only_first_intervals_count() {
        // The second candidates overlap, the first ones do not.
        let fused = fuse_groundings(
            &obs(&[(0.0, 1.0), (4.0, 6.0)], Some(0.9)),
            &obs(&[(2.0, 3.0), (4.0, 6.0)], Some(0.9)),
        );
        assert!(fused.time_intervals.is_empty());
    }

    #[test]
    fn test_touching_intervals_are_degenerate() {
        let fused = fuse_groundings(&obs(&[(0.0, 2.0)], None), &obs(&[(2.0, 4.0)], None));
        assert!(!fused.is_grounded());
        assert_eq!(fused.confidence, 0.5);
    }

    #[test]
    fn test_missing_side_keeps_confidence() {
        let fused = fuse_groundings(&obs(&[], Some(0.2)), &obs(&[(1.0, 2.0)], None));
        assert!(fused.time_intervals.is_empty());
        assert!((fused.confidence - 0.35).abs() < 1e-9);
    }

    fn arb_obs() -> impl Strategy<Value = GroundingObservation> {
        (
            prop::collection::vec((0.0f64..60.0, 0.1f64..30.0), 0..3),
            prop::option::of(0.0f64..=1.0),
        )
            .prop_map(|(spans, confidence)| {
                GroundingObservation::new(
                    spans
                        .into_iter()
                        .map(|(s, len)| TimeInterval::new(s, s + len))
                        .collect(),
                    confidence,
                )
            })
    }

    proptest! {
        #[test]
        fn prop_confidence_is_mean(a in arb_obs(), b in arb_obs()) {
            let fused = fuse_groundings(&a, &b);
            let expected = (a.confidence.unwrap_or(0.5) + b.confidence.unwrap_or(0.5)) / 2.0;
            prop_assert!((fused.confidence - expected).abs() < 1e-12);
        }

        #[test]
        fn prop_at_most_one_non_degenerate_interval(a in arb_obs(), b in arb_obs()) {
            let fused = fuse_groundings(&a, &b);
            prop_assert!(fused.time_intervals.len() <= 1);
            if a.intervals.is_empty() || b.intervals.is_empty() {
                prop_assert!(fused.time_intervals.is_empty());
            }
            for interval in &fused.time_intervals {
                prop_assert!(interval.end > interval.start);
            }
        }
    }
}
