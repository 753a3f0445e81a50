//! Frame selection for causal captioning.

use crate::types::TimeInterval;

/// Default cap on frames sent to the captioning collaborator.
pub const MAX_CAUSAL_FRAMES: usize = 8;

/// Caption used when no frame falls inside the interval.
pub const NO_FRAMES_CAPTION: &str = "No frames detected in the target time interval";

/// Instruction sent with the selected frames.
pub const CAUSAL_CAPTION_INSTRUCTION: &str =
    "Describe the causal relationship in the video (format: 'cause → effect')";

/// `count` indices evenly spaced over `0..len`, endpoints included.
///
/// Positions are computed by linear interpolation and truncated toward zero.
pub fn linspace_indices(len: usize, count: usize) -> Vec<usize> {
    match (len, count) {
        (0, _) | (_, 0) => Vec::new(),
        (_, 1) => vec![0],
        _ => {
            let last = (len - 1) as f64;
            let step = last / (count - 1) as f64;
            (0..count)
                .map(|i| {
                    if i == count - 1 {
                        len - 1
                    } else {
                        (i as f64 * step) as usize
                    }
                })
                .collect()
        }
    }
}

/// Indices into `timestamps` of the frames to caption for `interval`.
///
/// Bounds are inclusive. When more than `max_frames` qualify, exactly
/// `max_frames` are kept with even spacing across the qualifying run.
pub fn select_interval_frames(
    timestamps: &[f64],
    interval: TimeInterval,
    max_frames: usize,
) -> Vec<usize> {
    let inside: Vec<usize> = timestamps
        .iter()
        .enumerate()
        .filter(|(_, ts)| interval.contains(**ts))
        .map(|(i, _)| i)
        .collect();

    if inside.len() <= max_frames {
        return inside;
    }

    linspace_indices(inside.len(), max_frames)
        .into_iter()
        .map(|i| inside[i])
        .collect()
}
