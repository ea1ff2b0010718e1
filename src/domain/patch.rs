// ============================================================
// Layer 3 — Patch and Feature Domain Types
// ============================================================
// The units every classifier in the experiment works on:
//
//   PatchSet      → n square patches (width × width pixels)
//                   plus one class index per patch
//   FeatureMatrix → n feature rows (flattened patches or
//                   network embeddings) plus one class index
//                   per row
//
// Class indices are 0-based. Tissue labels are translated to
// indices through TissueClasses; scanner labels use the scan
// id of the Acquisition (0 = source, 1 = target).

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::domain::traits::SampleSet;

// ─── TissueClasses ────────────────────────────────────────────────────────────
/// Ordered list of the tissue labels under study (e.g. CSF, GM, WM).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TissueClasses(Vec<u8>);

impl TissueClasses {
    pub fn new(labels: Vec<u8>) -> Result<Self> {
        if labels.is_empty() {
            bail!("at least one tissue class is required");
        }
        if labels.contains(&0) {
            bail!("label 0 is background and cannot be a tissue class");
        }
        let mut sorted = labels.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != labels.len() {
            bail!("tissue classes must be unique, got {:?}", labels);
        }
        Ok(Self(labels))
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn labels(&self) -> &[u8] { &self.0 }

    pub fn contains(&self, label: u8) -> bool { self.0.contains(&label) }

    pub fn label_of(&self, index: usize) -> Option<u8> {
        self.0.get(index).copied()
    }
}

// ─── PatchSet ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct PatchSet {
    /// Side length of every patch in pixels (2 * half_width + 1)
    width:   usize,
    /// Flattened patches, row-major, one after the other
    pixels:  Vec<f32>,
    /// One class index per patch
    targets: Vec<usize>,
}

impl PatchSet {
    pub fn new(width: usize, pixels: Vec<f32>, targets: Vec<usize>) -> Result<Self> {
        if width == 0 {
            bail!("patch width must be positive");
        }
        if pixels.len() != targets.len() * width * width {
            bail!(
                "{} pixels do not match {} patches of {}x{}",
                pixels.len(), targets.len(), width, width
            );
        }
        Ok(Self { width, pixels, targets })
    }

    pub fn empty(width: usize) -> Self {
        Self { width, pixels: Vec::new(), targets: Vec::new() }
    }

    pub fn width(&self) -> usize { self.width }

    pub fn patch_area(&self) -> usize { self.width * self.width }

    pub fn patch(&self, index: usize) -> &[f32] {
        let area = self.patch_area();
        &self.pixels[index * area..(index + 1) * area]
    }

    pub fn pixels(&self) -> &[f32] { &self.pixels }

    /// Same patches, every target replaced by `target`.
    pub fn relabeled(&self, target: usize) -> Self {
        Self {
            width:   self.width,
            pixels:  self.pixels.clone(),
            targets: vec![target; self.targets.len()],
        }
    }

    /// Concatenate patch sets of equal width, in order.
    pub fn concat(sets: &[&PatchSet]) -> Result<PatchSet> {
        let width = match sets.first() {
            Some(s) => s.width,
            None => bail!("cannot concatenate an empty list of patch sets"),
        };
        let mut out = PatchSet::empty(width);
        for set in sets {
            if set.width != width {
                bail!("patch widths differ: {} vs {}", set.width, width);
            }
            out.pixels.extend_from_slice(&set.pixels);
            out.targets.extend_from_slice(&set.targets);
        }
        Ok(out)
    }

    /// Flatten every patch into a feature row.
    pub fn to_features(&self) -> FeatureMatrix {
        FeatureMatrix {
            cols:    self.patch_area(),
            data:    self.pixels.clone(),
            targets: self.targets.clone(),
        }
    }
}

impl SampleSet for PatchSet {
    fn len(&self) -> usize { self.targets.len() }

    fn targets(&self) -> &[usize] { &self.targets }

    fn subset(&self, indices: &[usize]) -> Self {
        let mut out = PatchSet::empty(self.width);
        for &i in indices {
            out.pixels.extend_from_slice(self.patch(i));
            out.targets.push(self.targets[i]);
        }
        out
    }
}

// ─── FeatureMatrix ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    cols:    usize,
    data:    Vec<f32>,
    targets: Vec<usize>,
}

impl FeatureMatrix {
    pub fn new(cols: usize, data: Vec<f32>, targets: Vec<usize>) -> Result<Self> {
        if cols == 0 {
            bail!("feature matrix needs at least one column");
        }
        if data.len() != targets.len() * cols {
            bail!(
                "{} values do not match {} rows of {} features",
                data.len(), targets.len(), cols
            );
        }
        Ok(Self { cols, data, targets })
    }

    pub fn cols(&self) -> usize { self.cols }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.cols..(index + 1) * self.cols]
    }

    pub fn data(&self) -> &[f32] { &self.data }

    /// Same features, every target replaced by `target`.
    pub fn relabeled(&self, target: usize) -> Self {
        Self {
            cols:    self.cols,
            data:    self.data.clone(),
            targets: vec![target; self.targets.len()],
        }
    }

    pub fn concat(sets: &[&FeatureMatrix]) -> Result<FeatureMatrix> {
        let cols = match sets.first() {
            Some(s) => s.cols,
            None => bail!("cannot concatenate an empty list of feature matrices"),
        };
        let mut data    = Vec::new();
        let mut targets = Vec::new();
        for set in sets {
            if set.cols != cols {
                bail!("feature dimensions differ: {} vs {}", set.cols, cols);
            }
            data.extend_from_slice(&set.data);
            targets.extend_from_slice(&set.targets);
        }
        FeatureMatrix::new(cols, data, targets)
    }

    /// Per-column mean and standard deviation (std floored to avoid /0).
    pub fn column_stats(&self) -> (Vec<f32>, Vec<f32>) {
        let n = self.targets.len().max(1) as f32;
        let mut mean = vec![0.0f32; self.cols];
        for r in 0..self.targets.len() {
            for (m, v) in mean.iter_mut().zip(self.row(r)) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut std = vec![0.0f32; self.cols];
        for r in 0..self.targets.len() {
            for ((s, v), m) in std.iter_mut().zip(self.row(r)).zip(&mean) {
                *s += (v - m) * (v - m);
            }
        }
        std.iter_mut().for_each(|s| *s = (*s / n).sqrt().max(1e-6));
        (mean, std)
    }

    /// Apply (x - mean) / std column-wise.
    pub fn standardized(&self, mean: &[f32], std: &[f32]) -> FeatureMatrix {
        let data = self
            .data
            .chunks(self.cols)
            .flat_map(|row| {
                row.iter()
                    .zip(mean)
                    .zip(std)
                    .map(|((v, m), s)| (v - m) / s)
            })
            .collect();
        Self { cols: self.cols, data, targets: self.targets.clone() }
    }
}

impl SampleSet for FeatureMatrix {
    fn len(&self) -> usize { self.targets.len() }

    fn targets(&self) -> &[usize] { &self.targets }

    fn subset(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Self {
            cols: self.cols,
            data,
            targets: indices.iter().map(|&i| self.targets[i]).collect(),
        }
    }
}
