// ============================================================
// Layer 5 — Network Architectures
// ============================================================
// Two networks share one convolutional trunk:
//
//   ConvTrunk   conv 3x3 → ReLU → max-pool 2x2 → conv 3x3 → ReLU
//               → flatten → dense → ReLU
//
//   AcqInvNet   per-scanner intensity calibration → ConvTrunk
//               → dense → low-dimensional embedding
//               Trained on patch pairs with a contrastive loss so
//               that equal tissue from either scanner lands close
//               together and different tissue lands at least
//               `margin` apart.
//
//   PatchCnn    ConvTrunk → dense → class logits
//               The baseline tissue classifier on raw patches.
//
// Convolutions use valid padding, so the trunk needs
// ((W - 2) / 2) - 2 >= 1, i.e. patches of at least 9x9.

use anyhow::{anyhow, bail, Result};
use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::relu,
};

use crate::data::batcher::{index_tensor, patch_range_tensor};
use crate::domain::patch::{FeatureMatrix, PatchSet};
use crate::domain::scan::Acquisition;
use crate::domain::traits::SampleSet;

// ─── ConvTrunk ────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct ConvTrunkConfig {
    pub patch_width: usize,
    #[config(default = 8)]
    pub conv1_channels: usize,
    #[config(default = 16)]
    pub conv2_channels: usize,
    #[config(default = 16)]
    pub hidden: usize,
}

impl ConvTrunkConfig {
    /// Spatial side length after the second convolution, if positive.
    pub fn feature_width(&self) -> Option<usize> {
        let conv1  = self.patch_width.checked_sub(2)?;
        let pooled = conv1 / 2;
        let conv2  = pooled.checked_sub(2)?;
        (conv2 > 0).then_some(conv2)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ConvTrunk<B>> {
        let side = match self.feature_width() {
            Some(s) => s,
            None => bail!(
                "{}x{} patches are too small for the convolutional trunk (minimum 9x9)",
                self.patch_width, self.patch_width
            ),
        };
        Ok(ConvTrunk {
            conv1: Conv2dConfig::new([1, self.conv1_channels], [3, 3]).init(device),
            pool:  MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv2: Conv2dConfig::new([self.conv1_channels, self.conv2_channels], [3, 3]).init(device),
            dense: LinearConfig::new(self.conv2_channels * side * side, self.hidden).init(device),
        })
    }
}

#[derive(Module, Debug)]
pub struct ConvTrunk<B: Backend> {
    pub conv1: Conv2d<B>,
    pub pool:  MaxPool2d,
    pub conv2: Conv2d<B>,
    pub dense: Linear<B>,
}

impl<B: Backend> ConvTrunk<B> {
    /// [batch, 1, W, W] → [batch, hidden]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.conv1.forward(x));
        let x = self.pool.forward(x);
        let x = relu(self.conv2.forward(x));
        let x: Tensor<B, 2> = x.flatten(1, 3);
        relu(self.dense.forward(x))
    }
}

// ─── AcqInvNet ────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct AcqInvNetConfig {
    pub trunk: ConvTrunkConfig,
    #[config(default = 2)]
    pub embedding_dim: usize,
}

impl AcqInvNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<AcqInvNet<B>> {
        Ok(AcqInvNet {
            scale: Param::from_tensor(Tensor::ones([Acquisition::COUNT], device)),
            shift: Param::from_tensor(Tensor::zeros([Acquisition::COUNT], device)),
            trunk: self.trunk.init(device)?,
            head:  LinearConfig::new(self.trunk.hidden, self.embedding_dim).init(device),
        })
    }
}

#[derive(Module, Debug)]
pub struct AcqInvNet<B: Backend> {
    /// Intensity gain per scan id
    pub scale: Param<Tensor<B, 1>>,
    /// Intensity offset per scan id
    pub shift: Param<Tensor<B, 1>>,
    pub trunk: ConvTrunk<B>,
    pub head:  Linear<B>,
}

impl<B: Backend> AcqInvNet<B> {
    /// patches [batch, 1, W, W], scan_ids [batch] → embeddings [batch, dim]
    pub fn forward(&self, patches: Tensor<B, 4>, scan_ids: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        let [batch, _, _, _] = patches.dims();
        let scale = self.scale.val().select(0, scan_ids.clone()).reshape([batch, 1, 1, 1]);
        let shift = self.shift.val().select(0, scan_ids).reshape([batch, 1, 1, 1]);
        let x = patches * scale + shift;
        self.head.forward(self.trunk.forward(x))
    }

    pub fn embedding_dim(&self) -> usize {
        self.head.weight.val().dims()[1]
    }

    /// Embed every patch of one scanner, `batch_size` patches at a time.
    pub fn embed(
        &self,
        patches:     &PatchSet,
        acquisition: Acquisition,
        batch_size:  usize,
        device:      &B::Device,
    ) -> Result<FeatureMatrix> {
        let dim  = self.embedding_dim();
        let mut data  = Vec::with_capacity(patches.len() * dim);
        let mut start = 0;

        while start < patches.len() {
            let end = (start + batch_size.max(1)).min(patches.len());
            let x   = patch_range_tensor::<B>(patches, start..end, device);
            let ids = index_tensor::<B>(vec![acquisition.scan_id(); end - start], device);
            let emb = self
                .forward(x, ids)
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .map_err(|e| anyhow!("Cannot read embeddings: {:?}", e))?;
            data.extend(emb);
            start = end;
        }

        FeatureMatrix::new(dim, data, patches.targets().to_vec())
    }
}

/// Contrastive loss over a batch of embedding pairs.
///
/// similar = 1 → d²,   similar = 0 → max(0, margin − d)²
/// averaged over the batch and halved.
pub fn contrastive_loss<B: Backend>(
    first:   Tensor<B, 2>,
    second:  Tensor<B, 2>,
    similar: Tensor<B, 1>,
    margin:  f64,
) -> Tensor<B, 1> {
    let [batch, _] = first.dims();
    let sq_dist = (first - second).powf_scalar(2.0).sum_dim(1).reshape([batch]);
    let dist    = sq_dist.clone().add_scalar(1e-9).sqrt();

    let pull = similar.clone() * sq_dist;
    let push = similar.neg().add_scalar(1.0)
        * dist.neg().add_scalar(margin).clamp_min(0.0).powf_scalar(2.0);

    (pull + push).mean().div_scalar(2.0)
}

// ─── PatchCnn ─────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct PatchCnnConfig {
    pub trunk:       ConvTrunkConfig,
    pub num_classes: usize,
}

impl PatchCnnConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<PatchCnn<B>> {
        Ok(PatchCnn {
            trunk: self.trunk.init(device)?,
            head:  LinearConfig::new(self.trunk.hidden, self.num_classes).init(device),
        })
    }
}

#[derive(Module, Debug)]
pub struct PatchCnn<B: Backend> {
    pub trunk: ConvTrunk<B>,
    pub head:  Linear<B>,
}

impl<B: Backend> PatchCnn<B> {
    /// [batch, 1, W, W] → logits [batch, num_classes]
    pub fn forward(&self, patches: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.trunk.forward(patches))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_feature_width() {
        assert_eq!(ConvTrunkConfig::new(15).feature_width(), Some(4));
        assert_eq!(ConvTrunkConfig::new(9).feature_width(), Some(1));
        assert_eq!(ConvTrunkConfig::new(7).feature_width(), None);
        assert_eq!(ConvTrunkConfig::new(1).feature_width(), None);
    }

    #[test]
    fn test_small_patches_are_rejected() {
        let device = Default::default();
        let cfg = AcqInvNetConfig::new(ConvTrunkConfig::new(5));
        assert!(cfg.init::<TestBackend>(&device).is_err());
    }

    #[test]
    fn test_embedding_shape() {
        let device = Default::default();
        let net: AcqInvNet<TestBackend> = AcqInvNetConfig::new(ConvTrunkConfig::new(15))
            .init(&device)
            .unwrap();
        let patches = PatchSet::new(15, vec![0.5; 3 * 225], vec![0, 1, 2]).unwrap();
        let emb = net.embed(&patches, Acquisition::Target, 2, &device).unwrap();
        assert_eq!(emb.cols(), 2);
        assert_eq!(emb.len(), 3);
        assert_eq!(emb.targets(), &[0, 1, 2]);
    }

    #[test]
    fn test_identical_patches_embed_identically_per_scanner() {
        let device = Default::default();
        let net: AcqInvNet<TestBackend> = AcqInvNetConfig::new(ConvTrunkConfig::new(9))
            .init(&device)
            .unwrap();
        let patches = PatchSet::new(9, vec![0.25; 2 * 81], vec![0, 0]).unwrap();
        let emb = net.embed(&patches, Acquisition::Source, 8, &device).unwrap();
        assert_eq!(emb.row(0), emb.row(1));
    }

    #[test]
    fn test_contrastive_loss_values() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![0.0f32, 0.0, 0.0, 0.0], [2, 2]), &device);
        let b = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![0.6f32, 0.0, 0.0, 0.3], [2, 2]), &device);
        // pair 0 similar: d² = 0.36; pair 1 dissimilar: (1 - 0.3)² = 0.49
        let y = Tensor::<TestBackend, 1>::from_data(TensorData::new(vec![1.0f32, 0.0], [2]), &device);

        let loss: f32 = contrastive_loss(a, b, y, 1.0).into_scalar().elem();
        let expected = (0.36 + 0.49) / 2.0 / 2.0;
        assert!((loss - expected).abs() < 1e-4, "loss {loss} != {expected}");
    }

    #[test]
    fn test_dissimilar_pairs_beyond_margin_cost_nothing() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![0.0f32, 0.0], [1, 2]), &device);
        let b = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![3.0f32, 4.0], [1, 2]), &device);
        let y = Tensor::<TestBackend, 1>::from_data(TensorData::new(vec![0.0f32], [1]), &device);
        let loss: f32 = contrastive_loss(a, b, y, 1.0).into_scalar().elem();
        assert!(loss.abs() < 1e-6);
    }

    #[test]
    fn test_patch_cnn_logits_shape() {
        let device = Default::default();
        let cnn: PatchCnn<TestBackend> = PatchCnnConfig::new(ConvTrunkConfig::new(15), 3)
            .init(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 4>::zeros([4, 1, 15, 15], &device);
        assert_eq!(cnn.forward(x).dims(), [4, 3]);
    }
}
