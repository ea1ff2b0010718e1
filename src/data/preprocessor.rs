// ============================================================
// Layer 4 — Scan Preprocessor
// ============================================================
// Pixel-level clean-up applied between loading and sampling:
//
//   1. normalize_pixels   rescale each slice to [0, 1]
//   2. keep_tissue_labels map phantom labels that are not a
//                         tissue class under study to 0
//   3. strip_skull        zero every pixel whose label is 0,
//                         leaving only brain tissue

use anyhow::{bail, Result};

use crate::domain::patch::TissueClasses;
use crate::domain::scan::{ImageStack, LabelStack};

/// Min-max rescale every slice independently. Constant slices become 0.
pub fn normalize_pixels(images: &mut ImageStack) {
    for i in 0..images.len() {
        let slice = images.slice_mut(i);
        let (min, max) = slice
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = max - min;
        for v in slice.iter_mut() {
            *v = if range > 0.0 { (*v - min) / range } else { 0.0 };
        }
    }
}

pub fn keep_tissue_labels(labels: &mut LabelStack, classes: &TissueClasses) {
    for l in labels.data_mut() {
        if !classes.contains(*l) {
            *l = 0;
        }
    }
}

/// Zero out every pixel outside the brain mask (label != 0).
pub fn strip_skull(images: &mut ImageStack, labels: &LabelStack) -> Result<()> {
    if !images.same_shape(labels) {
        bail!(
            "cannot skull-strip {} {}x{} scans with {} {}x{} label maps",
            images.len(), images.height(), images.width(),
            labels.len(), labels.height(), labels.width()
        );
    }
    for (v, &l) in images.data_mut().iter_mut().zip(labels.data()) {
        if l == 0 {
            *v = 0.0;
        }
    }
    Ok(())
}
