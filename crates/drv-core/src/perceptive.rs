//! Spatial agreement between two object detectors.
//!
//! A frame contributes to the fused track only when both detectors found the
//! object AND their boxes overlap with positive area. The fused box is the
//! intersection itself.

use serde::{Deserialize, Serialize};

use crate::types::{BBox, Detection, FusedTrack, TrackEntry};

/// A box from a language-grounded detector, normalized to `[0, 1]` and
/// expressed as center plus extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundedBox {
    pub cx: f64,
    pub cy: f64,
    pub w: f64,
    pub h: f64,
    pub logit: f64,
}

impl GroundedBox {
    /// Pixel-space box for a frame of the given size.
    pub fn to_pixels(&self, width: u32, height: u32) -> BBox {
        let (fw, fh) = (f64::from(width), f64::from(height));
        let w = self.w * fw;
        let h = self.h * fh;
        let cx = self.cx * fw;
        let cy = self.cy * fh;
        BBox::from_corners(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }
}

/// A binary segmentation mask, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl Mask {
    /// Returns `None` if `bits` does not match `width * height`.
    pub fn new(width: u32, height: u32, bits: Vec<bool>) -> Option<Self> {
        (bits.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            bits,
        })
    }

    /// Build from a grayscale buffer; any non-zero pixel is set.
    pub fn from_luma(image: &image::GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            bits: image.pixels().map(|p| p.0[0] > 0).collect(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|&b| b)
    }

    /// Extents of the set pixels as `(x_min, y_min, x_max - x_min, y_max - y_min)`.
    ///
    /// A mask with a single set column or row therefore has zero width or
    /// height, which the agreement gate rejects.
    pub fn bounding_box(&self) -> Option<BBox> {
        let width = self.width as usize;
        if width == 0 {
            return None;
        }

        let mut extent: Option<(usize, usize, usize, usize)> = None;
        for i in (0..self.bits.len()).filter(|&i| self.bits[i]) {
            let (x, y) = (i % width, i / width);
            extent = Some(match extent {
                None => (x, y, x, y),
                Some((x1, y1, x2, y2)) => (x1.min(x), y1.min(y), x2.max(x), y2.max(y)),
            });
        }

        extent.map(|(x1, y1, x2, y2)| {
            BBox::from_corners(x1 as f64, y1 as f64, x2 as f64, y2 as f64)
        })
    }
}

/// Refine a grounded proposal into a detection using its segmentation mask.
///
/// Returns `None` when the mask is empty.
pub fn refine_with_mask(mask: &Mask, logit: f64) -> Option<Detection> {
    mask.bounding_box().map(|bbox| Detection::new(bbox, logit))
}

/// Gate a single frame: the intersection of both boxes, if it has area.
///
/// A side with a non-finite confidence counts as an abstention.
pub fn agree(a: &Detection, b: &Detection) -> Option<(BBox, f64)> {
    if !a.confidence.is_finite() || !b.confidence.is_finite() {
        return None;
    }
    let bbox = a.bbox.intersection(&b.bbox)?;
    let confidence = ((a.confidence + b.confidence) / 2.0).clamp(0.0, 1.0);
    Some((bbox, confidence))
}

/// Fuse per-frame observations from two detectors into one track.
///
/// `class_conditioned`, `grounded` and `timestamps` are aligned by frame.
/// Frames where either side abstained, or where the boxes do not overlap,
/// contribute nothing.
pub fn fuse_track(
    class_conditioned: &[Option<Detection>],
    grounded: &[Option<Detection>],
    timestamps: &[f64],
) -> FusedTrack {
    if class_conditioned.len() != timestamps.len() || grounded.len() != timestamps.len() {
        tracing::warn!(
            class_conditioned = class_conditioned.len(),
            grounded = grounded.len(),
            timestamps = timestamps.len(),
            "Detector outputs are misaligned; fusing the common prefix"
        );
    }

    let entries = class_conditioned
        .iter()
        .zip(grounded)
        .zip(timestamps)
        .filter_map(|((a, b), &timestamp)| {
            let (bbox, confidence) = agree(a.as_ref()?, b.as_ref()?)?;
            Some(TrackEntry {
                bbox,
                timestamp,
                confidence,
            })
        })
        .collect();

    FusedTrack { entries }
}
