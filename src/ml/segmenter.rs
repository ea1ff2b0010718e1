// ============================================================
// Layer 5 — Image Segmentation
// ============================================================
// Classifies every pixel that has a full patch around it:
//
//   rows and cols in [pD, size - pD)  →  (h - 2pD) x (w - 2pD) map
//
// The image is processed one output row at a time. Each row's
// patches go through a block classifier, either a patch CNN or
// the network embedding followed by a feature classifier.
// Predicted class indices are turned back into tissue labels.

use anyhow::{bail, Result};

use crate::data::sampler::PatchSampler;
use crate::domain::patch::{FeatureMatrix, PatchSet};
use crate::domain::scan::Acquisition;
use crate::domain::traits::{Classifier, Embedder};

/// A 2-D map of tissue labels, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMap {
    pub width:  usize,
    pub height: usize,
    pub labels: Vec<u8>,
}

impl LabelMap {
    /// Zero every pixel whose ground truth is background. `truth` is the
    /// full-size label image; the map sits `offset` pixels inside it.
    pub fn mask_background(&mut self, truth: &[u8], truth_width: usize, offset: usize) -> Result<()> {
        let needed_rows = self.height + 2 * offset;
        if truth_width != self.width + 2 * offset || truth.len() != truth_width * needed_rows {
            bail!(
                "{}x{} map with offset {} does not fit a ground truth of {} pixels and width {}",
                self.height, self.width, offset, truth.len(), truth_width
            );
        }
        for row in 0..self.height {
            for col in 0..self.width {
                if truth[(row + offset) * truth_width + col + offset] == 0 {
                    self.labels[row * self.width + col] = 0;
                }
            }
        }
        Ok(())
    }
}

/// Slide over the image, classifying one row of patches per call to `classify`.
pub fn segment_with<F>(
    sampler:      &PatchSampler,
    image:        &[f32],
    width:        usize,
    height:       usize,
    mut classify: F,
) -> Result<LabelMap>
where
    F: FnMut(&PatchSet) -> Result<Vec<usize>>,
{
    let pd = sampler.patch_width() / 2;
    if width <= 2 * pd || height <= 2 * pd {
        bail!("{}x{} image is too small for {}x{} patches", height, width, 2 * pd + 1, 2 * pd + 1);
    }
    let (out_w, out_h) = (width - 2 * pd, height - 2 * pd);
    let mut labels = Vec::with_capacity(out_w * out_h);

    for row in pd..height - pd {
        let centres: Vec<usize> = (pd..width - pd).map(|col| row * width + col).collect();
        let patches = sampler.index_to_patches(image, width, height, &centres, 0)?;

        for class in classify(&patches)? {
            match sampler.classes().label_of(class) {
                Some(label) => labels.push(label),
                None => bail!("classifier predicted class {} outside the tissue classes", class),
            }
        }
    }

    if labels.len() != out_w * out_h {
        bail!("classifier returned {} labels for {} pixels", labels.len(), out_w * out_h);
    }
    Ok(LabelMap { width: out_w, height: out_h, labels })
}

/// Segment with a classifier that works directly on patches.
pub fn segment_patches<C: Classifier<PatchSet>>(
    sampler:    &PatchSampler,
    image:      &[f32],
    width:      usize,
    height:     usize,
    classifier: &C,
) -> Result<LabelMap> {
    segment_with(sampler, image, width, height, |p| classifier.predict(p))
}

/// Segment target-scanner images through the network embedding.
pub fn segment_embedded<E: Embedder, C: Classifier<FeatureMatrix>>(
    sampler:    &PatchSampler,
    image:      &[f32],
    width:      usize,
    height:     usize,
    embedder:   &E,
    classifier: &C,
) -> Result<LabelMap> {
    segment_with(sampler, image, width, height, |p| {
        classifier.predict(&embedder.propagate(p, Acquisition::Target)?)
    })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::patch::TissueClasses;
    use crate::domain::traits::SampleSet;

    fn sampler() -> PatchSampler {
        PatchSampler::new(1, TissueClasses::new(vec![1, 2, 3]).unwrap())
    }

    // Predicts class 2 (label 3) for bright centres, class 0 (label 1) otherwise.
    struct Threshold;

    impl Classifier<PatchSet> for Threshold {
        fn fit(&mut self, _: &PatchSet) -> Result<()> { Ok(()) }
        fn predict(&self, p: &PatchSet) -> Result<Vec<usize>> {
            Ok((0..p.len()).map(|i| if p.patch(i)[4] > 0.5 { 2 } else { 0 }).collect())
        }
    }

    #[test]
    fn test_output_shrinks_by_margin() {
        let image: Vec<f32> = (0..30).map(|i| if i % 6 >= 3 { 1.0 } else { 0.0 }).collect();
        let map = segment_patches(&sampler(), &image, 6, 5, &Threshold).unwrap();
        assert_eq!((map.width, map.height), (4, 3));
        // cols 1..5 of the input: 0, 0, 1, 1
        assert_eq!(&map.labels[0..4], &[1, 1, 3, 3]);
    }

    #[test]
    fn test_wrong_label_count_is_rejected() {
        let image = vec![0.0; 25];
        let res = segment_with(&sampler(), &image, 5, 5, |_| Ok(vec![0]));
        assert!(res.is_err());
    }

    #[test]
    fn test_out_of_range_class_is_rejected() {
        let image = vec![0.0; 25];
        let res = segment_with(&sampler(), &image, 5, 5, |p| Ok(vec![7; p.len()]));
        assert!(res.is_err());
    }

    #[test]
    fn test_mask_background_uses_offset() {
        let mut map = LabelMap { width: 2, height: 1, labels: vec![2, 3] };
        // 4x3 truth; map covers row 1, cols 1..3
        let truth = vec![
            1, 1, 1, 1,
            1, 0, 2, 1,
            1, 1, 1, 1,
        ];
        map.mask_background(&truth, 4, 1).unwrap();
        assert_eq!(map.labels, vec![0, 3]);
        assert!(map.mask_background(&truth, 3, 1).is_err());
    }
}
