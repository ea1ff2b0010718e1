// ============================================================
// Layer 2 — ExperimentUseCase
// ============================================================
// One run for a given (nT, iteration):
//
//   Step 1:  Build network, draw subjects, load + skull-strip
//            source, target, validation (and prediction) slices
//   Step 2:  Sample nT labeled target patches per class
//   Step 3:  Sample evaluation patches, embed them with the
//            untrained network, plot the embedding
//   Step 4:  Tissue CNNs on raw patches      tiss-S-{source,srctgt,target}
//   Step 5:  Scanner classifier on raw patches       scan-S-source
//   Step 6:  Classifiers on untrained embeddings     scan-S-net-un, tiss-S-net-un
//   Step 7:  Train the network for nR repetitions
//   Step 8:  Re-embed, plot the trained embedding
//   Step 9:  Classifiers on trained embeddings
//            scan-S-net-tn, tiss-S-net-tn, tiss-S-net-tt
//   Step 10: Save results, config and network weights
//   Step 11: Segment the prediction subject with five
//            classifiers, write data and ground-truth images
//
// S runs over the configured evaluation sets (J, H, A).

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::application::config::ExperimentConfig;
use crate::data::{
    loader::RawVolumeLoader,
    preprocessor::strip_skull,
    sampler::PatchSampler,
    subjects::{select_subjects, subject_pool},
};
use crate::domain::patch::{FeatureMatrix, PatchSet};
use crate::domain::results::{result_key, EvaluationSet, ExperimentResults, Task};
use crate::domain::scan::{Acquisition, ImageStack, LabelStack};
use crate::domain::traits::{Classifier, Embedder, SampleSet, ScanSource};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::MetricsLogger,
    results_store::ResultStore,
    viz::{save_gray_image, save_label_image, viz_embedding, VizPaths},
};
use crate::ml::{
    classifier::{classify, CnnClassifier, Evaluation, LogLinClassifier},
    network::build_network,
    segmenter::{segment_embedded, segment_patches, LabelMap},
    default_device, TrainBackend,
};

// ─── Helpers ──────────────────────────────────────────────────────────────────
/// Target-scanner evaluation data: within-subject (J),
/// between-subject (H) and both (A).
struct TargetSets<T> {
    within:  T,
    between: T,
    all:     T,
}

impl<T> TargetSets<T> {
    fn get(&self, set: EvaluationSet) -> &T {
        match set {
            EvaluationSet::J => &self.within,
            EvaluationSet::H => &self.between,
            EvaluationSet::A => &self.all,
        }
    }
}

/// Every patch set of the run after step 3.
struct Patches {
    source:  PatchSet,
    labeled: PatchSet,
    target:  TargetSets<PatchSet>,
}

/// Those patch sets pushed through the network.
struct Embeddings {
    source:  FeatureMatrix,
    labeled: FeatureMatrix,
    target:  TargetSets<FeatureMatrix>,
}

impl Embeddings {
    fn compute<E: Embedder>(net: &E, p: &Patches) -> Result<Self> {
        let within  = net.propagate(&p.target.within, Acquisition::Target)?;
        let between = net.propagate(&p.target.between, Acquisition::Target)?;
        let all     = FeatureMatrix::concat(&[&within, &between])?;
        Ok(Self {
            source:  net.propagate(&p.source, Acquisition::Source)?,
            labeled: net.propagate(&p.labeled, Acquisition::Target)?,
            target:  TargetSets { within, between, all },
        })
    }
}

/// Source rows as scanner 0, target rows as scanner 1.
fn scanner_set(source: &FeatureMatrix, target: &FeatureMatrix) -> Result<FeatureMatrix> {
    FeatureMatrix::concat(&[
        &source.relabeled(Acquisition::Source.scan_id()),
        &target.relabeled(Acquisition::Target.scan_id()),
    ])
}

// ─── ExperimentUseCase ────────────────────────────────────────────────────────
pub struct ExperimentUseCase {
    config: ExperimentConfig,
}

impl ExperimentUseCase {
    pub fn new(config: ExperimentConfig) -> Self {
        Self { config }
    }

    /// Run on the default GPU backend.
    pub fn execute(&self) -> Result<ExperimentResults> {
        let device = default_device();
        tracing::info!("Using WGPU device: {:?}", device);
        self.run::<TrainBackend>(device)
    }

    pub fn run<B: AutodiffBackend>(&self, device: B::Device) -> Result<ExperimentResults> {
        let cfg = &self.config;
        cfg.validate()?;
        tracing::info!(
            "Experiment nT={} iteration={} ({} repetitions of {} epochs)",
            cfg.target_samples, cfg.iteration, cfg.repetitions, cfg.epochs
        );

        let mut rng = match cfg.seed {
            Some(seed) => {
                B::seed(seed);
                StdRng::seed_from_u64(seed)
            }
            None => StdRng::from_entropy(),
        };
        let classes = cfg.classes()?;
        let sampler = PatchSampler::new(cfg.patch_half_width, classes.clone());
        let mut results = ExperimentResults::new();

        // ── Step 1: network, subjects, volumes ────────────────────────────────
        let mut net = build_network::<B>(cfg.network_settings(), sampler.clone(), device.clone())?;

        let pool  = subject_pool(cfg.num_subjects, cfg.reserved_subject());
        let split = select_subjects(
            &pool, cfg.source_subjects, cfg.target_subjects, cfg.validation_subjects, &mut rng,
        )?;

        let loader = RawVolumeLoader::new(
            &cfg.data_dir,
            cfg.image_width,
            cfg.image_height,
            cfg.slice_index,
            cfg.scan_voxel,
            &cfg.source_protocol,
            &cfg.target_protocol,
            classes.clone(),
        );
        let (src_images, src_labels) = load_stripped(&loader, &split.source, Acquisition::Source)
            .context("loading source subjects")?;
        let (tgt_images, tgt_labels) = load_stripped(&loader, &split.target, Acquisition::Target)
            .context("loading target subjects")?;
        let (val_images, val_labels) = load_stripped(&loader, &split.validation, Acquisition::Target)
            .context("loading target validation subjects")?;
        let prediction = match cfg.reserved_subject() {
            Some(subject) => Some(
                load_stripped(&loader, &[subject], Acquisition::Target)
                    .context("loading the prediction subject")?,
            ),
            None => None,
        };

        // ── Step 2: labeled target samples ────────────────────────────────────
        let selection = sampler.sample_labeled(&tgt_images, &tgt_labels, cfg.target_samples, &mut rng)?;
        tracing::info!(
            "Sampled {} labeled target patches ({} per class)",
            selection.patches.len(), cfg.target_samples
        );
        tracing::debug!("Labeled target centres per subject and class: {:?}", selection.indices);

        // ── Step 3: evaluation patches, untrained embedding ───────────────────
        let per_class = cfg.eval_patches_per_class;
        let within  = sampler.image_to_patches(&tgt_images, &tgt_labels, per_class, &mut rng)?;
        let between = sampler.image_to_patches(&val_images, &val_labels, per_class, &mut rng)?;
        let all     = PatchSet::concat(&[&within, &between])?;
        let patches = Patches {
            source:  sampler.image_to_patches(&src_images, &src_labels, per_class, &mut rng)?,
            labeled: selection.patches,
            target:  TargetSets { within, between, all },
        };
        let src_tgt = PatchSet::concat(&[&patches.source, &patches.labeled])?;

        let viz_paths = if cfg.viz {
            Some(VizPaths::new(&cfg.viz_dir, cfg.target_samples, cfg.iteration)?)
        } else {
            None
        };

        let untrained = Embeddings::compute(&net, &patches)?;
        if let Some(paths) = &viz_paths {
            viz_embedding(
                &paths.embedding("untrained"),
                &untrained.source,
                &untrained.target.within,
                classes.len(),
            )?;
        }

        let cnn     = |seed| CnnClassifier::<B>::new(cfg.cnn_settings(cfg.epochs), device.clone(), seed);
        let tissue  = |seed| LogLinClassifier::<B>::new(cfg.loglin_settings(classes.len()), device.clone(), seed);
        let scanner = |seed| LogLinClassifier::<B>::new(cfg.loglin_settings(Acquisition::COUNT), device.clone(), seed);

        for &set in &cfg.evaluation_sets {
            let val = patches.target.get(set);

            // ── Step 4: tissue classifiers on raw patches ─────────────────────
            tracing::info!("Tissue classifiers on raw patches, evaluation set {}", set);
            let err = classify(&patches.source, Evaluation::Validation(val), cnn, &mut rng)?;
            results.insert(result_key(Task::Tissue, set, "source"), err);
            let err = classify(&src_tgt, Evaluation::Validation(val), cnn, &mut rng)?;
            results.insert(result_key(Task::Tissue, set, "srctgt"), err);
            let err = classify(&patches.labeled, Evaluation::Validation(val), cnn, &mut rng)?;
            results.insert(result_key(Task::Tissue, set, "target"), err);

            // ── Step 5: scanner classifier on raw patches ─────────────────────
            let raw = scanner_set(&patches.source.to_features(), &val.to_features())?;
            let err = classify(&raw, Evaluation::CrossValidation(cfg.num_folds), scanner, &mut rng)?;
            results.insert(result_key(Task::Scanner, set, "source"), err);

            // ── Step 6: untrained network ─────────────────────────────────────
            let emb = untrained.target.get(set);
            let err = classify(&scanner_set(&untrained.source, emb)?, Evaluation::CrossValidation(cfg.num_folds), scanner, &mut rng)?;
            results.insert(result_key(Task::Scanner, set, "net-un"), err);
            let err = classify(&untrained.source, Evaluation::Validation(emb), tissue, &mut rng)?;
            results.insert(result_key(Task::Tissue, set, "net-un"), err);
        }

        // ── Step 7: training ──────────────────────────────────────────────────
        let store = if cfg.save {
            Some(ResultStore::new(&cfg.results_dir, cfg.target_samples, cfg.iteration)?)
        } else {
            None
        };
        let metrics = match &store {
            Some(s) => Some(MetricsLogger::create(s.training_log_path())?),
            None    => None,
        };

        for r in 1..=cfg.repetitions {
            tracing::info!("At repetition {:02} of {}", r, cfg.repetitions);
            net.train(&src_images, &src_labels, &patches.labeled, r, &mut rng, metrics.as_ref())
                .with_context(|| format!("training repetition {}", r))?;
        }

        // ── Step 8: trained embedding ─────────────────────────────────────────
        let trained = Embeddings::compute(&net, &patches)?;
        if let Some(paths) = &viz_paths {
            viz_embedding(
                &paths.embedding("trained"),
                &trained.source,
                &trained.target.within,
                classes.len(),
            )?;
        }
        let trained_src_tgt = FeatureMatrix::concat(&[&trained.source, &trained.labeled])?;

        // ── Step 9: trained network ───────────────────────────────────────────
        for &set in &cfg.evaluation_sets {
            let emb = trained.target.get(set);
            let err = classify(&scanner_set(&trained.source, emb)?, Evaluation::CrossValidation(cfg.num_folds), scanner, &mut rng)?;
            results.insert(result_key(Task::Scanner, set, "net-tn"), err);
            let err = classify(&trained.source, Evaluation::Validation(emb), tissue, &mut rng)?;
            results.insert(result_key(Task::Tissue, set, "net-tn"), err);
            let err = classify(&trained_src_tgt, Evaluation::Validation(emb), tissue, &mut rng)?;
            results.insert(result_key(Task::Tissue, set, "net-tt"), err);
        }

        // ── Step 10: save ─────────────────────────────────────────────────────
        if let Some(store) = &store {
            store.save_results(&results)?;
            store.save_config(cfg)?;
            net.save(&CheckpointManager::new(store.dir())?, &store.network_name())?;
        }

        // ── Step 11: prediction images ────────────────────────────────────────
        if let (Some(paths), Some((images, labels))) = (&viz_paths, &prediction) {
            let subject_number = cfg.prediction_subject + 1;
            let num_labels     = classes.labels().iter().copied().max().unwrap_or(0) as usize;
            let (w, h)         = (images.width(), images.height());
            let image          = images.slice(0);
            let truth          = labels.slice(0);
            let pd             = cfg.patch_half_width;

            let write = |kind: &str, mut map: LabelMap| -> Result<()> {
                map.mask_background(truth, w, pd)?;
                save_label_image(&paths.subject_image(kind, subject_number), &map.labels, map.width, map.height, num_labels)
            };
            let long_cnn = |seed| CnnClassifier::<B>::new(cfg.cnn_settings(2 * cfg.epochs), device.clone(), seed);

            for (kind, train) in [("pred_src", &patches.source), ("pred_spt", &src_tgt)] {
                let mut clf = long_cnn(rng.gen());
                clf.fit(train)?;
                write(kind, segment_patches(&sampler, image, w, h, &clf)?)?;
            }

            for (kind, train) in [("pred_net", &trained.source), ("pred_ntt", &trained_src_tgt)] {
                let mut clf = tissue(rng.gen());
                clf.fit(train)?;
                write(kind, segment_embedded(&sampler, image, w, h, &net, &clf)?)?;
            }

            let mut clf = long_cnn(rng.gen());
            clf.fit(&patches.labeled)?;
            write("pred_tgt", segment_patches(&sampler, image, w, h, &clf)?)?;

            save_gray_image(&paths.subject_image("data_tgt", subject_number), image, w, h)?;
            save_label_image(&paths.subject_image("true_tgt", subject_number), truth, w, h, num_labels)?;
        }

        tracing::info!("Experiment finished with {} results", results.len());
        Ok(results)
    }
}

/// Load slices of one scanner and zero everything outside the brain.
fn load_stripped<S: ScanSource>(
    source:      &S,
    subjects:    &[usize],
    acquisition: Acquisition,
) -> Result<(ImageStack, LabelStack)> {
    let mut images = source.load_scans(subjects, acquisition)?;
    let labels     = source.load_labels(subjects)?;
    strip_skull(&mut images, &labels)?;
    Ok((images, labels))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use std::{fs, path::Path};

    type TestBackend = Autodiff<NdArray>;

    const SIDE: usize = 24;

    // Background frame, then three vertical tissue bands.
    fn phantom_label(row: usize, col: usize) -> u8 {
        if row < 2 || row >= SIDE - 2 || col < 2 || col >= SIDE - 2 {
            0
        } else if col < 9 {
            1
        } else if col < 15 {
            2
        } else {
            3
        }
    }

    fn write_subjects(data_dir: &Path, count: usize) {
        fs::create_dir_all(data_dir.join("sims")).unwrap();
        fs::create_dir_all(data_dir.join("phantoms")).unwrap();
        for s in 0..count {
            let mut phantom = Vec::new();
            let mut source  = Vec::new();
            let mut target  = Vec::new();
            for row in 0..SIDE {
                for col in 0..SIDE {
                    let label = phantom_label(row, col);
                    let noise = ((row * 7 + col * 3 + s) % 5) as f32;
                    phantom.push(label);
                    source.extend((label as f32 * 10.0 + noise).to_le_bytes());
                    target.extend(((4 - label) as f32 * 8.0 + noise).to_le_bytes());
                }
            }
            let nn = format!("{:02}", s + 1);
            fs::write(data_dir.join(format!("phantoms/subject{nn}_256.raw")), phantom).unwrap();
            fs::write(data_dir.join(format!("sims/subject{nn}_256_GE2D_1.5T_RSS.raw")), source).unwrap();
            fs::write(data_dir.join(format!("sims/subject{nn}_256_GE2D_3.0T_MRB.raw")), target).unwrap();
        }
    }

    fn tiny_config(root: &Path) -> ExperimentConfig {
        ExperimentConfig {
            target_samples: 2,
            iteration:      1,
            seed:           Some(3),
            data_dir:       root.join("data").display().to_string(),
            results_dir:    root.join("results").display().to_string(),
            viz_dir:        root.join("viz").display().to_string(),
            image_width:    SIDE,
            image_height:   SIDE,
            num_subjects:        6,
            source_subjects:     2,
            target_subjects:     1,
            validation_subjects: 2,
            prediction_subject:  5,
            patch_half_width:    4,
            epochs:              1,
            batch_size:          16,
            repetitions:         2,
            subsample:           2,
            max_pairs_per_kind:  30,
            eval_patches_per_class: 4,
            evaluation_sets:     vec![EvaluationSet::H, EvaluationSet::J, EvaluationSet::A],
            c_grid:              vec![0.1, 10.0],
            loglin_iterations:   10,
            ..Default::default()
        }
    }

    #[test]
    fn test_full_run_writes_every_artifact() {
        let root = tempfile::tempdir().unwrap();
        write_subjects(&root.path().join("data"), 6);
        let cfg = tiny_config(root.path());

        let results = ExperimentUseCase::new(cfg).run::<TestBackend>(Default::default()).unwrap();

        // nine keys per evaluation set
        assert_eq!(results.len(), 27);
        for key in [
            "tiss-H-source", "tiss-J-srctgt", "scan-H-source", "scan-J-net-un", "tiss-H-net-tt",
            "scan-A-source", "tiss-A-net-tt", "tiss-A-target", "scan-A-net-tn",
        ] {
            let err = results.get(key).unwrap();
            assert!((0.0..=1.0).contains(&err), "{key} = {err}");
        }

        let results_dir = root.path().join("results");
        assert!(results_dir.join("err_exp_acqinv_cnn_b1b3_nT2_r1.json").exists());
        assert!(results_dir.join("config_nT2_r1.json").exists());
        assert!(results_dir.join("net_nT2_r1.mpk").exists());
        let log = fs::read_to_string(results_dir.join("train_nT2_r1.csv")).unwrap();
        assert_eq!(log.lines().count(), 1 + 2);

        let viz = root.path().join("viz");
        assert!(viz.join("b1b3_cnn__nT2_r1embedding_untrained.png").exists());
        assert!(viz.join("b1b3_cnn__nT2_r1embedding_trained.png").exists());
        for kind in ["pred_src", "pred_spt", "pred_net", "pred_ntt", "pred_tgt", "data_tgt", "true_tgt"] {
            assert!(viz.join(format!("b1b3_{kind}_sub6_nT2_r1.png")).exists(), "{kind}");
        }
    }

    #[test]
    fn test_missing_data_aborts_the_run() {
        let root = tempfile::tempdir().unwrap();
        let cfg  = ExperimentConfig { viz: false, save: false, ..tiny_config(root.path()) };
        assert!(ExperimentUseCase::new(cfg).run::<TestBackend>(Default::default()).is_err());
    }
}
