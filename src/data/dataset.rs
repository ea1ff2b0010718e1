use burn::data::dataset::Dataset;
use rand::{seq::index, Rng};

use crate::domain::patch::PatchSet;
use crate::domain::scan::Acquisition;
use crate::domain::traits::SampleSet;

/// One patch with its class index.
#[derive(Debug, Clone)]
pub struct PatchItem {
    pub pixels: Vec<f32>,
    pub target: usize,
}

pub struct PatchDataset {
    items: Vec<PatchItem>,
}

impl PatchDataset {
    pub fn from_patches(patches: &PatchSet) -> Self {
        let items = (0..patches.len())
            .map(|i| PatchItem {
                pixels: patches.patch(i).to_vec(),
                target: patches.targets()[i],
            })
            .collect();
        Self { items }
    }
}

impl Dataset<PatchItem> for PatchDataset {
    fn get(&self, index: usize) -> Option<PatchItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Two patches and whether they show the same tissue.
#[derive(Debug, Clone)]
pub struct PairItem {
    pub first:       Vec<f32>,
    pub first_scan:  usize,
    pub second:      Vec<f32>,
    pub second_scan: usize,
    pub similar:     bool,
}

pub struct PairDataset {
    pairs: Vec<PairItem>,
}

impl PairDataset {
    /// Build source–source, source–target and target–target pairs.
    ///
    /// Every kind enumerates all distinct pairs and is then
    /// subsampled without replacement to at most `max_per_kind`.
    pub fn build<R: Rng + ?Sized>(
        source:       &PatchSet,
        target:       &PatchSet,
        max_per_kind: usize,
        rng:          &mut R,
    ) -> Self {
        let mut pairs = Vec::new();

        let src = (source, Acquisition::Source);
        let tgt = (target, Acquisition::Target);

        for (a, b) in [(src, src), (src, tgt), (tgt, tgt)] {
            let same_set = a.1 == b.1;
            let mut candidates = Vec::new();
            for i in 0..a.0.len() {
                // within one set, take each unordered pair once
                let start = if same_set { i + 1 } else { 0 };
                for j in start..b.0.len() {
                    candidates.push((i, j));
                }
            }

            let keep = candidates.len().min(max_per_kind);
            for pos in index::sample(rng, candidates.len(), keep) {
                let (i, j) = candidates[pos];
                pairs.push(PairItem {
                    first:       a.0.patch(i).to_vec(),
                    first_scan:  a.1.scan_id(),
                    second:      b.0.patch(j).to_vec(),
                    second_scan: b.1.scan_id(),
                    similar:     a.0.targets()[i] == b.0.targets()[j],
                });
            }
        }

        Self { pairs }
    }

    pub fn similar_count(&self) -> usize {
        self.pairs.iter().filter(|p| p.similar).count()
    }
}

impl Dataset<PairItem> for PairDataset {
    fn get(&self, index: usize) -> Option<PairItem> {
        self.pairs.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn set(targets: Vec<usize>, value: f32) -> PatchSet {
        let n = targets.len();
        PatchSet::new(1, vec![value; n], targets).unwrap()
    }

    #[test]
    fn test_patch_dataset_keeps_targets() {
        let ds = PatchDataset::from_patches(&set(vec![2, 0], 0.5));
        assert_eq!(ds.len(), 2);
        let item = ds.get(0).unwrap();
        assert_eq!(item.target, 2);
        assert_eq!(item.pixels, vec![0.5]);
        assert!(ds.get(2).is_none());
    }

    #[test]
    fn test_pairs_cover_all_kinds() {
        let mut rng = StdRng::seed_from_u64(0);
        let source  = set(vec![0, 1, 0], 0.0);
        let target  = set(vec![0, 1], 1.0);
        let ds = PairDataset::build(&source, &target, 100, &mut rng);

        // 3 source-source + 6 source-target + 1 target-target
        assert_eq!(ds.len(), 10);
        let cross = ds.pairs.iter().filter(|p| p.first_scan != p.second_scan).count();
        assert_eq!(cross, 6);
        // similar: s0-s2, and source/target pairs with equal labels: 2 + 1
        assert_eq!(ds.similar_count(), 4);
    }

    #[test]
    fn test_pairs_are_capped_per_kind() {
        let mut rng = StdRng::seed_from_u64(0);
        let source  = set(vec![0; 20], 0.0);
        let target  = set(vec![1; 20], 1.0);
        let ds = PairDataset::build(&source, &target, 15, &mut rng);
        assert_eq!(ds.len(), 45);
    }
}
