// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The seams between the experiment workflow and the pieces
// that do the work:
//
//   ScanSource  → where scans and phantoms come from
//                 (RawVolumeLoader reads Brainweb .raw files)
//   SampleSet   → anything a classifier can be trained on
//                 (PatchSet, FeatureMatrix)
//   Classifier  → fit / predict over a SampleSet
//                 (CnnClassifier, LogLinClassifier)
//   Embedder    → maps patches of one scanner to features
//                 (the acquisition-invariant network)

use anyhow::Result;

use crate::domain::patch::{FeatureMatrix, PatchSet};
use crate::domain::scan::{Acquisition, ImageStack, LabelStack};

// ─── ScanSource ───────────────────────────────────────────────────────────────
pub trait ScanSource {
    /// Load the intensity slices of `subjects` acquired with `acquisition`.
    fn load_scans(&self, subjects: &[usize], acquisition: Acquisition) -> Result<ImageStack>;

    /// Load the ground-truth tissue label slices of `subjects`.
    fn load_labels(&self, subjects: &[usize]) -> Result<LabelStack>;
}

// ─── SampleSet ────────────────────────────────────────────────────────────────
pub trait SampleSet: Sized {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Class index of every sample, in order
    fn targets(&self) -> &[usize];

    /// New set holding the samples at `indices`, in that order
    fn subset(&self, indices: &[usize]) -> Self;
}

// ─── Classifier ───────────────────────────────────────────────────────────────
pub trait Classifier<S: SampleSet> {
    fn fit(&mut self, train: &S) -> Result<()>;

    /// Predicted class index per sample. Fails if `fit` was never called.
    fn predict(&self, samples: &S) -> Result<Vec<usize>>;
}

// ─── Embedder ─────────────────────────────────────────────────────────────────
pub trait Embedder {
    /// Push patches from one scanner through the network.
    /// Targets of the returned features equal those of `patches`.
    fn propagate(&self, patches: &PatchSet, acquisition: Acquisition) -> Result<FeatureMatrix>;
}
