// ============================================================
// Layer 5 — Acquisition-Invariant Network
// ============================================================
// Bundles the embedding network with everything it needs to be
// trained repeatedly and queried:
//
//   model     AcqInvNet on the autodiff backend
//   optim     Adam with L2 weight decay, kept across repetitions
//   sampler   draws fresh source patches for every repetition
//
// One call to `train` is one repetition:
//   source images → `subsample` patches per class per image
//   + the fixed labeled target patches
//   → PairDataset → `epochs` epochs of contrastive training

use anyhow::Result;
use burn::{
    module::AutodiffModule,
    optim::{decay::WeightDecayConfig, AdamConfig, Optimizer},
    tensor::backend::AutodiffBackend,
};
use rand::Rng;

use crate::data::{dataset::PairDataset, sampler::PatchSampler};
use crate::domain::patch::{FeatureMatrix, PatchSet};
use crate::domain::scan::{Acquisition, ImageStack, LabelStack};
use crate::domain::traits::Embedder;
use crate::infra::{checkpoint::CheckpointManager, metrics::MetricsLogger};
use crate::ml::model::{AcqInvNet, AcqInvNetConfig, ConvTrunkConfig};
use crate::ml::trainer::{train_pairs, PairTrainingConfig};

#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub epochs:             usize,
    pub batch_size:         usize,
    pub learning_rate:      f64,
    /// Adam weight decay
    pub l2:                 f64,
    /// Contrastive margin between dissimilar embeddings
    pub margin:             f64,
    /// Source patches per class per source image, per repetition
    pub subsample:          usize,
    pub max_pairs_per_kind: usize,
    pub embedding_dim:      usize,
}

pub struct AcquisitionNetwork<B: AutodiffBackend, O> {
    model:    AcqInvNet<B>,
    optim:    O,
    device:   B::Device,
    sampler:  PatchSampler,
    settings: NetworkSettings,
}

/// Initialise an untrained network and its optimiser.
pub fn build_network<B: AutodiffBackend>(
    settings: NetworkSettings,
    sampler:  PatchSampler,
    device:   B::Device,
) -> Result<AcquisitionNetwork<B, impl Optimizer<AcqInvNet<B>, B>>> {
    let model: AcqInvNet<B> = AcqInvNetConfig::new(ConvTrunkConfig::new(sampler.patch_width()))
        .with_embedding_dim(settings.embedding_dim)
        .init(&device)?;

    let optim = AdamConfig::new()
        .with_weight_decay(Some(WeightDecayConfig::new(settings.l2 as f32)))
        .init::<B, AcqInvNet<B>>();

    tracing::info!(
        "Network ready: {}x{} patches → {}-d embedding, margin {}",
        sampler.patch_width(), sampler.patch_width(), settings.embedding_dim, settings.margin
    );

    Ok(AcquisitionNetwork { model, optim, device, sampler, settings })
}

impl<B: AutodiffBackend, O: Optimizer<AcqInvNet<B>, B>> AcquisitionNetwork<B, O> {
    /// One repetition of pair training.
    pub fn train<R: Rng + ?Sized>(
        &mut self,
        images:         &ImageStack,
        labels:         &LabelStack,
        target_patches: &PatchSet,
        repetition:     usize,
        rng:            &mut R,
        metrics:        Option<&MetricsLogger>,
    ) -> Result<()> {
        let s      = &self.settings;
        let source = self.sampler.image_to_patches(images, labels, s.subsample, rng)?;
        let pairs  = PairDataset::build(&source, target_patches, s.max_pairs_per_kind, rng);

        let cfg = PairTrainingConfig {
            epochs:        s.epochs,
            batch_size:    s.batch_size,
            learning_rate: s.learning_rate,
            margin:        s.margin,
        };

        self.model = train_pairs(
            self.model.clone(),
            &mut self.optim,
            pairs,
            &cfg,
            self.sampler.patch_width(),
            &self.device,
            rng.gen(),
            repetition,
            metrics,
        )?;
        Ok(())
    }

    pub fn save(&self, checkpoints: &CheckpointManager, name: &str) -> Result<()> {
        checkpoints.save_network(&self.model, name)
    }
}

impl<B: AutodiffBackend, O> Embedder for AcquisitionNetwork<B, O> {
    fn propagate(&self, patches: &PatchSet, acquisition: Acquisition) -> Result<FeatureMatrix> {
        self.model
            .valid()
            .embed(patches, acquisition, self.settings.batch_size, &self.device)
    }
}
