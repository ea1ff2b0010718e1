// ============================================================
// Layer 5 — Pair Training Loop
// ============================================================
// One repetition of acquisition-invariant training:
//
//   PairDataset → DataLoader (shuffled) → AcqInvNet on both
//   sides of each pair → contrastive loss → Adam step
//
// The optimiser is owned by the caller so its moment estimates
// carry over from one repetition to the next.

use anyhow::{bail, Result};
use burn::{
    data::dataloader::DataLoaderBuilder,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::{batcher::PairBatcher, dataset::PairDataset};
use crate::infra::metrics::{EpochMetrics, MetricsLogger};
use crate::ml::model::{contrastive_loss, AcqInvNet};

#[derive(Debug, Clone)]
pub struct PairTrainingConfig {
    pub epochs:        usize,
    pub batch_size:    usize,
    pub learning_rate: f64,
    pub margin:        f64,
}

#[allow(clippy::too_many_arguments)]
pub fn train_pairs<B, O>(
    mut model:   AcqInvNet<B>,
    optim:       &mut O,
    pairs:       PairDataset,
    cfg:         &PairTrainingConfig,
    patch_width: usize,
    device:      &B::Device,
    seed:        u64,
    repetition:  usize,
    metrics:     Option<&MetricsLogger>,
) -> Result<AcqInvNet<B>>
where
    B: AutodiffBackend,
    O: Optimizer<AcqInvNet<B>, B>,
{
    use burn::data::dataset::Dataset;

    let pair_count = pairs.len();
    if pair_count == 0 {
        bail!("no patch pairs to train on");
    }
    tracing::debug!(
        "Repetition {}: {} pairs ({} similar)",
        repetition, pair_count, pairs.similar_count()
    );

    let loader = DataLoaderBuilder::new(PairBatcher::<B>::new(device.clone(), patch_width))
        .batch_size(cfg.batch_size)
        .shuffle(seed)
        .num_workers(1)
        .build(pairs);

    for epoch in 1..=cfg.epochs {
        let mut loss_sum = 0.0f64;
        let mut batches  = 0usize;

        for batch in loader.iter() {
            let first  = model.forward(batch.first, batch.first_scan);
            let second = model.forward(batch.second, batch.second_scan);
            let loss   = contrastive_loss(first, second, batch.similar, cfg.margin);

            loss_sum += loss.clone().into_scalar().elem::<f64>();
            batches  += 1;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(cfg.learning_rate, model, grads);
        }

        let avg_loss = if batches > 0 { loss_sum / batches as f64 } else { f64::NAN };
        tracing::debug!(
            "Repetition {} epoch {:>3}/{} | loss={:.4}",
            repetition, epoch, cfg.epochs, avg_loss
        );

        if let Some(logger) = metrics {
            logger.log(&EpochMetrics::new(repetition, epoch, avg_loss, pair_count))?;
        }
    }

    Ok(model)
}
