// ============================================================
// Layer 4 — Patch Batchers
// ============================================================
// Implements Burn's Batcher trait to stack patch items into
// tensors the networks consume:
//
//   PatchItem × N → pixels  [N, 1, W, W]   (one grey channel)
//                   targets [N]            class indices
//
//   PairItem × N  → first / second [N, 1, W, W] with scan ids,
//                   similar [N] as 1.0 / 0.0 floats
//
// All patches in a batch share the same width W, so the flat
// pixel vectors can be concatenated and reshaped in one go.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::{PairItem, PatchItem};
use crate::domain::patch::{FeatureMatrix, PatchSet};
use crate::domain::traits::SampleSet;

// ─── Tensor helpers ───────────────────────────────────────────────────────────
/// Stack flat row-major patches of width `width` into [N, 1, W, W].
pub fn patch_tensor<B: Backend>(pixels: Vec<f32>, width: usize, device: &B::Device) -> Tensor<B, 4> {
    let n = pixels.len() / (width * width);
    Tensor::<B, 4>::from_data(TensorData::new(pixels, [n, 1, width, width]), device)
}

/// Patches `range` of a PatchSet as a [N, 1, W, W] tensor.
pub fn patch_range_tensor<B: Backend>(
    patches: &PatchSet,
    range:   std::ops::Range<usize>,
    device:  &B::Device,
) -> Tensor<B, 4> {
    let area   = patches.patch_area();
    let pixels = patches.pixels()[range.start * area..range.end * area].to_vec();
    patch_tensor(pixels, patches.width(), device)
}

/// Feature rows as a [N, D] tensor.
pub fn feature_tensor<B: Backend>(features: &FeatureMatrix, device: &B::Device) -> Tensor<B, 2> {
    let shape = [features.len(), features.cols()];
    Tensor::<B, 2>::from_data(TensorData::new(features.data().to_vec(), shape), device)
}

pub fn index_tensor<B: Backend>(values: Vec<usize>, device: &B::Device) -> Tensor<B, 1, Int> {
    let n    = values.len();
    let ints: Vec<i64> = values.into_iter().map(|v| v as i64).collect();
    Tensor::<B, 1, Int>::from_data(TensorData::new(ints, [n]), device)
}

// ─── PatchBatch ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct PatchBatch<B: Backend> {
    pub pixels:   Tensor<B, 4>,
    pub targets:  Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct PatchBatcher<B: Backend> {
    device: B::Device,
    width:  usize,
}

impl<B: Backend> PatchBatcher<B> {
    pub fn new(device: B::Device, width: usize) -> Self {
        Self { device, width }
    }
}

impl<B: Backend> Batcher<PatchItem, PatchBatch<B>> for PatchBatcher<B> {
    fn batch(&self, items: Vec<PatchItem>) -> PatchBatch<B> {
        let pixels: Vec<f32>   = items.iter().flat_map(|i| i.pixels.iter().copied()).collect();
        let targets: Vec<usize> = items.iter().map(|i| i.target).collect();

        PatchBatch {
            pixels:  patch_tensor(pixels, self.width, &self.device),
            targets: index_tensor(targets, &self.device),
        }
    }
}

// ─── PairBatch ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct PairBatch<B: Backend> {
    pub first:       Tensor<B, 4>,
    pub first_scan:  Tensor<B, 1, Int>,
    pub second:      Tensor<B, 4>,
    pub second_scan: Tensor<B, 1, Int>,
    pub similar:     Tensor<B, 1>,
}

#[derive(Clone, Debug)]
pub struct PairBatcher<B: Backend> {
    device: B::Device,
    width:  usize,
}

impl<B: Backend> PairBatcher<B> {
    pub fn new(device: B::Device, width: usize) -> Self {
        Self { device, width }
    }
}

impl<B: Backend> Batcher<PairItem, PairBatch<B>> for PairBatcher<B> {
    fn batch(&self, items: Vec<PairItem>) -> PairBatch<B> {
        let n = items.len();
        let first: Vec<f32>  = items.iter().flat_map(|p| p.first.iter().copied()).collect();
        let second: Vec<f32> = items.iter().flat_map(|p| p.second.iter().copied()).collect();
        let similar: Vec<f32> = items
            .iter()
            .map(|p| if p.similar { 1.0 } else { 0.0 })
            .collect();

        PairBatch {
            first:       patch_tensor(first, self.width, &self.device),
            first_scan:  index_tensor(items.iter().map(|p| p.first_scan).collect(), &self.device),
            second:      patch_tensor(second, self.width, &self.device),
            second_scan: index_tensor(items.iter().map(|p| p.second_scan).collect(), &self.device),
            similar:     Tensor::<B, 1>::from_data(TensorData::new(similar, [n]), &self.device),
        }
    }
}
