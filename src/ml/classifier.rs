// ============================================================
// Layer 5 — Downstream Classifiers
// ============================================================
// The classifiers that measure how much tissue and scanner
// information a representation carries:
//
//   CnnClassifier     PatchCnn on raw patches, cross-entropy,
//                     Adam, mini-batches
//
//   LogLinClassifier  multinomial logistic regression on
//                     feature rows (flattened patches or
//                     embeddings). Objective per sample:
//
//                       CE + ||W||² / (2 · C · n)
//
//                     C is picked from a grid by inner k-fold
//                     cross-validation, then refit on all data.
//                     Features are standardised with training
//                     statistics.
//
//   classify()        fit + error rate, either on a held-out
//                     validation set or by shuffled k-fold
//                     cross-validation.

use anyhow::{anyhow, bail, Context, Result};
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    nn::{loss::CrossEntropyLossConfig, Linear, LinearConfig},
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use crate::data::batcher::{feature_tensor, index_tensor, patch_range_tensor, PatchBatcher};
use crate::data::dataset::PatchDataset;
use crate::domain::patch::{FeatureMatrix, PatchSet};
use crate::domain::traits::{Classifier, SampleSet};
use crate::ml::model::{ConvTrunkConfig, PatchCnn, PatchCnnConfig};

// ─── Evaluation ───────────────────────────────────────────────────────────────
pub enum Evaluation<'a, S> {
    /// Fit on the training set, score on this one.
    Validation(&'a S),
    /// Shuffled k-fold over the training set, mean held-out error.
    CrossValidation(usize),
}

/// Fraction of predictions that differ from the truth.
pub fn error_rate(predicted: &[usize], truth: &[usize]) -> Result<f64> {
    if predicted.len() != truth.len() {
        bail!("{} predictions for {} samples", predicted.len(), truth.len());
    }
    if truth.is_empty() {
        bail!("cannot compute an error rate on zero samples");
    }
    let wrong = predicted.iter().zip(truth).filter(|(p, t)| p != t).count();
    Ok(wrong as f64 / truth.len() as f64)
}

/// Shuffle 0..n and deal it into `folds` contiguous parts. The first
/// n % folds parts hold one extra sample.
pub fn kfold_indices<R: Rng + ?Sized>(n: usize, folds: usize, rng: &mut R) -> Result<Vec<Vec<usize>>> {
    if folds < 2 {
        bail!("cross-validation needs at least 2 folds, got {}", folds);
    }
    if n < folds {
        bail!("cannot split {} samples into {} folds", n, folds);
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);

    let base  = n / folds;
    let extra = n % folds;
    let mut parts = Vec::with_capacity(folds);
    let mut start = 0;
    for f in 0..folds {
        let size = base + usize::from(f < extra);
        parts.push(order[start..start + size].to_vec());
        start += size;
    }
    Ok(parts)
}

/// Indices of every fold except `held_out`, concatenated.
fn complement(parts: &[Vec<usize>], held_out: usize) -> Vec<usize> {
    parts
        .iter()
        .enumerate()
        .filter(|(f, _)| *f != held_out)
        .flat_map(|(_, p)| p.iter().copied())
        .collect()
}

/// Train a fresh classifier from `make` and report its error.
///
/// `make` receives a seed drawn from `rng` for the classifier's own
/// shuffling, so one run-level generator drives every fit.
pub fn classify<S, C, F, R>(
    train:      &S,
    evaluation: Evaluation<'_, S>,
    mut make:   F,
    rng:        &mut R,
) -> Result<f64>
where
    S: SampleSet,
    C: Classifier<S>,
    F: FnMut(u64) -> C,
    R: Rng + ?Sized,
{
    match evaluation {
        Evaluation::Validation(val) => {
            let mut clf = make(rng.gen());
            clf.fit(train)?;
            error_rate(&clf.predict(val)?, val.targets())
        }
        Evaluation::CrossValidation(folds) => {
            let parts = kfold_indices(train.len(), folds, rng)?;
            let mut total = 0.0;
            for (f, held_out) in parts.iter().enumerate() {
                let fit_set = train.subset(&complement(&parts, f));
                let val_set = train.subset(held_out);
                let mut clf = make(rng.gen());
                clf.fit(&fit_set)
                    .with_context(|| format!("fold {} of {}", f + 1, folds))?;
                total += error_rate(&clf.predict(&val_set)?, val_set.targets())?;
            }
            Ok(total / folds as f64)
        }
    }
}

/// Row-wise argmax of a [N, K] logit tensor.
fn argmax_classes<B: Backend>(logits: Tensor<B, 2>) -> Result<Vec<usize>> {
    let [n, _] = logits.dims();
    let idx = logits
        .argmax(1)
        .reshape([n])
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| anyhow!("Cannot read predictions: {:?}", e))?;
    Ok(idx.into_iter().map(|i| i as usize).collect())
}

// ─── CnnClassifier ────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct CnnSettings {
    pub epochs:        usize,
    pub batch_size:    usize,
    pub learning_rate: f64,
    pub num_classes:   usize,
}

pub struct CnnClassifier<B: AutodiffBackend> {
    settings: CnnSettings,
    device:   B::Device,
    seed:     u64,
    model:    Option<PatchCnn<B::InnerBackend>>,
}

impl<B: AutodiffBackend> CnnClassifier<B> {
    pub fn new(settings: CnnSettings, device: B::Device, seed: u64) -> Self {
        Self { settings, device, seed, model: None }
    }

    /// Class logits for patches `start..end`, without gradients.
    fn logits(&self, patches: &PatchSet, range: std::ops::Range<usize>) -> Result<Tensor<B::InnerBackend, 2>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("CNN classifier used before fit"))?;
        let x = patch_range_tensor::<B::InnerBackend>(patches, range, &self.device);
        Ok(model.forward(x))
    }
}

impl<B: AutodiffBackend> Classifier<PatchSet> for CnnClassifier<B> {
    fn fit(&mut self, train: &PatchSet) -> Result<()> {
        if train.is_empty() {
            bail!("cannot fit a CNN on zero patches");
        }
        let s = &self.settings;
        let mut model: PatchCnn<B> = PatchCnnConfig::new(ConvTrunkConfig::new(train.width()), s.num_classes)
            .init(&self.device)?;
        let mut optim = AdamConfig::new().init();
        let ce = CrossEntropyLossConfig::new().init(&self.device);

        let loader = DataLoaderBuilder::new(PatchBatcher::<B>::new(self.device.clone(), train.width()))
            .batch_size(s.batch_size)
            .shuffle(self.seed)
            .num_workers(1)
            .build(PatchDataset::from_patches(train));

        for epoch in 1..=s.epochs {
            let mut loss_sum = 0.0f64;
            let mut batches  = 0usize;
            for batch in loader.iter() {
                let logits = model.forward(batch.pixels);
                let loss   = ce.forward(logits, batch.targets);
                loss_sum += loss.clone().into_scalar().elem::<f64>();
                batches  += 1;

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optim.step(s.learning_rate, model, grads);
            }
            tracing::trace!("cnn epoch {}/{} loss={:.4}", epoch, s.epochs, loss_sum / batches.max(1) as f64);
        }

        self.model = Some(model.valid());
        Ok(())
    }

    fn predict(&self, samples: &PatchSet) -> Result<Vec<usize>> {
        let mut out   = Vec::with_capacity(samples.len());
        let mut start = 0;
        let step      = self.settings.batch_size.max(1);
        while start < samples.len() {
            let end = (start + step).min(samples.len());
            out.extend(argmax_classes(self.logits(samples, start..end)?)?);
            start = end;
        }
        Ok(out)
    }
}

// ─── LogLinClassifier ─────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct LogLinSettings {
    /// Candidate inverse regularisation strengths
    pub c_grid:        Vec<f64>,
    pub inner_folds:   usize,
    /// Full-batch Adam iterations per fit
    pub iterations:    usize,
    pub learning_rate: f64,
    pub num_classes:   usize,
}

struct FittedLogLin<B: Backend> {
    linear: Linear<B>,
    mean:   Vec<f32>,
    std:    Vec<f32>,
}

pub struct LogLinClassifier<B: AutodiffBackend> {
    settings: LogLinSettings,
    device:   B::Device,
    seed:     u64,
    fitted:   Option<FittedLogLin<B::InnerBackend>>,
}

impl<B: AutodiffBackend> LogLinClassifier<B> {
    pub fn new(settings: LogLinSettings, device: B::Device, seed: u64) -> Self {
        Self { settings, device, seed, fitted: None }
    }

    /// Minimise the penalised cross-entropy on already standardised rows.
    fn train_linear(&self, x: &FeatureMatrix, c: f64) -> Result<Linear<B::InnerBackend>> {
        let s = &self.settings;
        let n = x.len();
        if n == 0 {
            bail!("cannot fit a logistic regression on zero rows");
        }

        let inputs  = feature_tensor::<B>(x, &self.device);
        let targets = index_tensor::<B>(x.targets().to_vec(), &self.device);
        let ce      = CrossEntropyLossConfig::new().init(&self.device);
        let penalty = 1.0 / (2.0 * c * n as f64);

        let mut linear: Linear<B> = LinearConfig::new(x.cols(), s.num_classes).init(&self.device);
        let mut optim = AdamConfig::new().init();

        for _ in 0..s.iterations {
            let logits = linear.forward(inputs.clone());
            let l2     = linear.weight.val().powf_scalar(2.0).sum().mul_scalar(penalty);
            let loss   = ce.forward(logits, targets.clone()) + l2;

            let grads = GradientsParams::from_grads(loss.backward(), &linear);
            linear = optim.step(s.learning_rate, linear, grads);
        }

        Ok(linear.valid())
    }

    /// Inner cross-validation over the C grid; the first best C wins.
    fn select_c(&self, x: &FeatureMatrix) -> Result<f64> {
        let grid = &self.settings.c_grid;
        let first = match grid.first() {
            Some(&c) => c,
            None => bail!("the regularisation grid is empty"),
        };
        let folds = self.settings.inner_folds;
        if grid.len() == 1 || x.len() < folds.max(2) {
            return Ok(first);
        }

        let mut rng   = StdRng::seed_from_u64(self.seed);
        let parts     = kfold_indices(x.len(), folds, &mut rng)?;
        let mut best  = (f64::INFINITY, first);

        for &c in grid {
            let mut err = 0.0;
            for (f, held_out) in parts.iter().enumerate() {
                let fit_set = x.subset(&complement(&parts, f));
                let val_set = x.subset(held_out);
                let linear  = self.train_linear(&fit_set, c)?;
                let logits  = linear.forward(feature_tensor(&val_set, &self.device));
                err += error_rate(&argmax_classes(logits)?, val_set.targets())?;
            }
            let err = err / parts.len() as f64;
            tracing::trace!("C={:e} inner error={:.4}", c, err);
            if err < best.0 {
                best = (err, c);
            }
        }
        Ok(best.1)
    }
}

impl<B: AutodiffBackend> Classifier<FeatureMatrix> for LogLinClassifier<B> {
    fn fit(&mut self, train: &FeatureMatrix) -> Result<()> {
        let (mean, std) = train.column_stats();
        let x = train.standardized(&mean, &std);

        let c      = self.select_c(&x)?;
        let linear = self.train_linear(&x, c)?;
        tracing::debug!("Logistic regression fit on {} rows, C={:e}", x.len(), c);

        self.fitted = Some(FittedLogLin { linear, mean, std });
        Ok(())
    }

    fn predict(&self, samples: &FeatureMatrix) -> Result<Vec<usize>> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| anyhow!("logistic regression used before fit"))?;
        if samples.cols() != fitted.mean.len() {
            bail!("{} features given, model was fit on {}", samples.cols(), fitted.mean.len());
        }
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        let x = samples.standardized(&fitted.mean, &fitted.std);
        argmax_classes(fitted.linear.forward(feature_tensor(&x, &self.device)))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    fn loglin_settings(c_grid: Vec<f64>) -> LogLinSettings {
        LogLinSettings { c_grid, inner_folds: 2, iterations: 200, learning_rate: 0.05, num_classes: 2 }
    }

    // two well separated 2-D clusters
    fn clusters(n: usize) -> FeatureMatrix {
        let mut data    = Vec::new();
        let mut targets = Vec::new();
        for i in 0..n {
            let jitter = (i % 5) as f32 * 0.1;
            data.extend([-2.0 + jitter, 1.0 - jitter]);
            targets.push(0);
            data.extend([2.0 - jitter, -1.0 + jitter]);
            targets.push(1);
        }
        FeatureMatrix::new(2, data, targets).unwrap()
    }

    #[test]
    fn test_error_rate() {
        assert_eq!(error_rate(&[0, 1, 1, 0], &[0, 1, 0, 0]).unwrap(), 0.25);
        assert!(error_rate(&[0], &[0, 1]).is_err());
        assert!(error_rate(&[], &[]).is_err());
    }

    #[test]
    fn test_kfold_partitions_all_indices() {
        let mut rng = StdRng::seed_from_u64(3);
        let parts = kfold_indices(7, 3, &mut rng).unwrap();
        assert_eq!(parts.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 2, 2]);

        let mut all: Vec<usize> = parts.concat();
        all.sort_unstable();
        assert_eq!(all, (0..7).collect::<Vec<_>>());

        assert_eq!(complement(&parts, 0).len(), 4);
        assert!(kfold_indices(1, 2, &mut rng).is_err());
        assert!(kfold_indices(10, 1, &mut rng).is_err());
    }

    #[test]
    fn test_loglin_separates_clusters() {
        let train = clusters(20);
        let mut clf = LogLinClassifier::<TestBackend>::new(loglin_settings(vec![1.0]), Default::default(), 0);
        clf.fit(&train).unwrap();
        let err = error_rate(&clf.predict(&train).unwrap(), train.targets()).unwrap();
        assert!(err < 0.05, "training error {err}");
    }

    #[test]
    fn test_loglin_grid_choice_comes_from_grid() {
        let train = clusters(10);
        let grid  = vec![0.01, 1.0, 100.0];
        let clf   = LogLinClassifier::<TestBackend>::new(loglin_settings(grid.clone()), Default::default(), 7);
        let (mean, std) = train.column_stats();
        let c = clf.select_c(&train.standardized(&mean, &std)).unwrap();
        assert!(grid.contains(&c));
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let clf = LogLinClassifier::<TestBackend>::new(loglin_settings(vec![1.0]), Default::default(), 0);
        assert!(clf.predict(&clusters(2)).is_err());
    }

    #[test]
    fn test_classify_with_validation_and_folds() {
        let train = clusters(20);
        let val   = clusters(5);
        let mut rng = StdRng::seed_from_u64(1);
        let make = |seed| LogLinClassifier::<TestBackend>::new(loglin_settings(vec![1.0]), Default::default(), seed);

        let held_out = classify(&train, Evaluation::Validation(&val), make, &mut rng).unwrap();
        assert!(held_out < 0.1);

        let cv = classify(&train, Evaluation::CrossValidation(2), make, &mut rng).unwrap();
        assert!(cv < 0.1);
    }

    #[test]
    fn test_cnn_learns_bright_versus_dark_patches() {
        let n = 16;
        let mut pixels  = Vec::new();
        let mut targets = Vec::new();
        for i in 0..n {
            let class = i % 2;
            pixels.extend(vec![if class == 0 { 0.05 } else { 0.95 }; 81]);
            targets.push(class);
        }
        let train = PatchSet::new(9, pixels, targets).unwrap();
        let settings = CnnSettings { epochs: 30, batch_size: 8, learning_rate: 0.01, num_classes: 2 };

        let mut clf = CnnClassifier::<TestBackend>::new(settings, Default::default(), 0);
        clf.fit(&train).unwrap();
        let pred = clf.predict(&train).unwrap();
        assert_eq!(pred.len(), n);
        assert!(error_rate(&pred, train.targets()).unwrap() < 0.5);
    }
}
