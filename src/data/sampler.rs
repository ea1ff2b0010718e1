// ============================================================
// Layer 4 — Patch Sampler
// ============================================================
// Turns label maps into patch centres and patch centres into
// patches.
//
// Sampling region:
//   Centres are drawn from rows and columns in [pD, size-pD-1),
//   so a full (2pD+1) x (2pD+1) patch always fits around them.
//
// Index flattening:
//   (row, col) → row * width + col      (row-major, like the
//   stacks in domain::scan)
//
// Centres of one class are drawn uniformly WITH replacement,
// so a region smaller than the requested count is fine; an
// empty region is an error.

use anyhow::{bail, Result};
use rand::Rng;

use crate::domain::patch::{PatchSet, TissueClasses};
use crate::domain::scan::{ImageStack, LabelStack};

/// Labeled target samples: flat centre indices per
/// [subject][class][sample] and the patches cut at them.
#[derive(Debug, Clone)]
pub struct TargetSelection {
    pub indices: Vec<Vec<Vec<usize>>>,
    pub patches: PatchSet,
}

#[derive(Debug, Clone)]
pub struct PatchSampler {
    half_width: usize,
    classes:    TissueClasses,
}

impl PatchSampler {
    pub fn new(half_width: usize, classes: TissueClasses) -> Self {
        Self { half_width, classes }
    }

    pub fn patch_width(&self) -> usize { 2 * self.half_width + 1 }

    pub fn classes(&self) -> &TissueClasses { &self.classes }

    /// Flat indices of all pixels labelled `label` inside the sampling region.
    pub fn interior_indices(&self, labels: &[u8], width: usize, height: usize, label: u8) -> Vec<usize> {
        let pd = self.half_width;
        let row_end = height.saturating_sub(pd + 1);
        let col_end = width.saturating_sub(pd + 1);

        let mut found = Vec::new();
        for row in pd..row_end {
            for col in pd..col_end {
                let idx = row * width + col;
                if labels[idx] == label {
                    found.push(idx);
                }
            }
        }
        found
    }

    pub fn sample_indices<R: Rng + ?Sized>(
        &self,
        labels: &[u8],
        width:  usize,
        height: usize,
        label:  u8,
        count:  usize,
        rng:    &mut R,
    ) -> Result<Vec<usize>> {
        let candidates = self.interior_indices(labels, width, height, label);
        if candidates.is_empty() {
            bail!(
                "no pixel with tissue label {} inside the {}-pixel sampling margin",
                label, self.half_width
            );
        }
        Ok((0..count)
            .map(|_| candidates[rng.gen_range(0..candidates.len())])
            .collect())
    }

    /// Append the patch centred at flat index `center` to `out`.
    fn extract_into(
        &self,
        image:  &[f32],
        width:  usize,
        height: usize,
        center: usize,
        out:    &mut Vec<f32>,
    ) -> Result<()> {
        let pd  = self.half_width;
        let row = center / width;
        let col = center % width;
        if row < pd || col < pd || row + pd >= height || col + pd >= width {
            bail!(
                "patch centre ({}, {}) lies within {} pixels of the {}x{} image border",
                row, col, pd, height, width
            );
        }
        for r in row - pd..=row + pd {
            let start = r * width + col - pd;
            out.extend_from_slice(&image[start..start + self.patch_width()]);
        }
        Ok(())
    }

    /// Cut one patch per index out of a single image, all with class `target`.
    pub fn index_to_patches(
        &self,
        image:   &[f32],
        width:   usize,
        height:  usize,
        indices: &[usize],
        target:  usize,
    ) -> Result<PatchSet> {
        let mut pixels = Vec::with_capacity(indices.len() * self.patch_width().pow(2));
        for &idx in indices {
            self.extract_into(image, width, height, idx, &mut pixels)?;
        }
        PatchSet::new(self.patch_width(), pixels, vec![target; indices.len()])
    }

    /// Draw `per_class` patches of every tissue class from every image.
    pub fn image_to_patches<R: Rng + ?Sized>(
        &self,
        images:    &ImageStack,
        labels:    &LabelStack,
        per_class: usize,
        rng:       &mut R,
    ) -> Result<PatchSet> {
        Ok(self.sample_labeled(images, labels, per_class, rng)?.patches)
    }

    /// Like `image_to_patches`, but keeps the sampled centre indices.
    pub fn sample_labeled<R: Rng + ?Sized>(
        &self,
        images:    &ImageStack,
        labels:    &LabelStack,
        per_class: usize,
        rng:       &mut R,
    ) -> Result<TargetSelection> {
        if !images.same_shape(labels) {
            bail!(
                "{} scans of {}x{} do not match {} label maps of {}x{}",
                images.len(), images.height(), images.width(),
                labels.len(), labels.height(), labels.width()
            );
        }
        let (w, h) = (images.width(), images.height());

        let total = images.len() * self.classes.len() * per_class;
        let mut indices = Vec::with_capacity(images.len());
        let mut pixels  = Vec::with_capacity(total * self.patch_width().pow(2));
        let mut targets = Vec::with_capacity(total);

        for subject in 0..images.len() {
            let mut per_subject = Vec::with_capacity(self.classes.len());
            for (k, &label) in self.classes.labels().iter().enumerate() {
                let idx = self.sample_indices(labels.slice(subject), w, h, label, per_class, rng)?;
                for &centre in &idx {
                    self.extract_into(images.slice(subject), w, h, centre, &mut pixels)?;
                }
                targets.resize(targets.len() + idx.len(), k);
                per_subject.push(idx);
            }
            indices.push(per_subject);
        }

        let patches = PatchSet::new(self.patch_width(), pixels, targets)?;
        Ok(TargetSelection { indices, patches })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::traits::SampleSet;
    use rand::{rngs::StdRng, SeedableRng};

    // 8x8 label map: left half label 1, right half label 2
    fn halves() -> (ImageStack, LabelStack) {
        let labels: Vec<u8>  = (0..64).map(|i| if i % 8 < 4 { 1 } else { 2 }).collect();
        let pixels: Vec<f32> = (0..64).map(|i| i as f32).collect();
        (
            ImageStack::new(8, 8, pixels).unwrap(),
            LabelStack::new(8, 8, labels).unwrap(),
        )
    }

    fn sampler() -> PatchSampler {
        PatchSampler::new(1, TissueClasses::new(vec![1, 2]).unwrap())
    }

    #[test]
    fn test_interior_excludes_margin_and_last_row() {
        let (_, labels) = halves();
        let idx = sampler().interior_indices(labels.slice(0), 8, 8, 1);
        // rows 1..6, cols 1..4 → 5 * 3
        assert_eq!(idx.len(), 15);
        assert!(idx.iter().all(|&i| i / 8 >= 1 && i / 8 < 6 && i % 8 >= 1 && i % 8 < 4));
    }

    #[test]
    fn test_sampled_indices_carry_requested_label() {
        let (_, labels) = halves();
        let mut rng = StdRng::seed_from_u64(11);
        let idx = sampler().sample_indices(labels.slice(0), 8, 8, 2, 40, &mut rng).unwrap();
        assert_eq!(idx.len(), 40);
        assert!(idx.iter().all(|&i| labels.slice(0)[i] == 2));
    }

    #[test]
    fn test_missing_class_is_an_error() {
        let (_, labels) = halves();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(sampler().sample_indices(labels.slice(0), 8, 8, 3, 5, &mut rng).is_err());
    }

    #[test]
    fn test_patch_is_centred_on_index() {
        let (images, _) = halves();
        // centre (2, 3) → flat 19
        let set = sampler().index_to_patches(images.slice(0), 8, 8, &[19], 0).unwrap();
        assert_eq!(set.patch(0), &[10.0, 11.0, 12.0, 18.0, 19.0, 20.0, 26.0, 27.0, 28.0]);
    }

    #[test]
    fn test_border_centre_is_rejected() {
        let (images, _) = halves();
        assert!(sampler().index_to_patches(images.slice(0), 8, 8, &[7], 0).is_err());
    }

    #[test]
    fn test_labeled_sampling_is_class_major_per_subject() {
        let (images, labels) = halves();
        let mut rng = StdRng::seed_from_u64(5);
        let sel = sampler().sample_labeled(&images, &labels, 3, &mut rng).unwrap();

        assert_eq!(sel.indices.len(), 1);
        assert_eq!(sel.indices[0].len(), 2);
        assert_eq!(sel.indices[0][1].len(), 3);
        assert_eq!(sel.patches.len(), 6);
        assert_eq!(sel.patches.targets(), &[0, 0, 0, 1, 1, 1]);
        // centre pixel of each patch equals its flat index in this image
        for (n, &idx) in sel.indices[0].iter().flatten().enumerate() {
            assert_eq!(sel.patches.patch(n)[4], idx as f32);
        }
    }

    #[test]
    fn test_labeled_sampling_walks_every_subject_in_order() {
        let labels: Vec<u8>  = (0..128).map(|i| if i % 8 < 4 { 1 } else { 2 }).collect();
        let pixels: Vec<f32> = (0..128).map(|i| if i < 64 { i as f32 } else { (i - 64) as f32 + 100.0 }).collect();
        let images = ImageStack::new(8, 8, pixels).unwrap();
        let labels = LabelStack::new(8, 8, labels).unwrap();
        let mut rng = StdRng::seed_from_u64(9);

        let sel = sampler().sample_labeled(&images, &labels, 2, &mut rng).unwrap();

        assert_eq!(sel.patches.len(), 8);
        assert_eq!(sel.patches.targets(), &[0, 0, 1, 1, 0, 0, 1, 1]);
        for (subject, offset) in [(0usize, 0.0f32), (1, 100.0)] {
            for (n, &idx) in sel.indices[subject].iter().flatten().enumerate() {
                assert_eq!(sel.patches.patch(subject * 4 + n)[4], idx as f32 + offset);
            }
        }
    }
}
