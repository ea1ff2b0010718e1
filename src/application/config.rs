// ============================================================
// Layer 2 — Experiment Configuration
// ============================================================
// Every constant of one experiment run. Defaults reproduce the
// published setup:
//
//   256x256 slices, 15x15 patches (pD = 7), tissues CSF/GM/WM
//   (labels 1, 2, 3), margin 1, 32 epochs, batch 128, 10
//   repetitions, 10 source patches per class per repetition,
//   L2 0.001, C grid logspace(-3, 6, 10), 2 folds,
//   4 source / 1 target / 9 validation subjects out of 20,
//   subject 20 reserved for the prediction images.
//
// A JSON file may override any subset of fields; command-line
// flags override the file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::data::loader::VoxelType;
use crate::domain::patch::TissueClasses;
use crate::domain::results::EvaluationSet;
use crate::infra::results_store::read_json;
use crate::ml::classifier::{CnnSettings, LogLinSettings};
use crate::ml::model::ConvTrunkConfig;
use crate::ml::network::NetworkSettings;

/// `n` values evenly spaced in log10 between 10^start and 10^end.
pub fn logspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![10f64.powf(start)],
        _ => (0..n)
            .map(|i| 10f64.powf(start + (end - start) * i as f64 / (n - 1) as f64))
            .collect(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Labeled target samples per tissue class (nT)
    pub target_samples: usize,
    /// Iteration index of this run
    pub iteration:      usize,
    /// Fixed seed; entropy when absent
    pub seed:           Option<u64>,

    pub data_dir:    String,
    pub results_dir: String,
    pub viz_dir:     String,

    pub image_width:     usize,
    pub image_height:    usize,
    /// Slice to use from multi-slice files; middle slice when absent
    pub slice_index:     Option<usize>,
    pub scan_voxel:      VoxelType,
    pub source_protocol: String,
    pub target_protocol: String,

    pub num_subjects:       usize,
    pub source_subjects:    usize,
    pub target_subjects:    usize,
    pub validation_subjects: usize,
    /// 0-based subject segmented for the prediction images
    pub prediction_subject: usize,

    pub patch_half_width: usize,
    pub tissue_classes:   Vec<u8>,

    pub margin:             f64,
    pub epochs:             usize,
    pub batch_size:         usize,
    pub repetitions:        usize,
    pub learning_rate:      f64,
    pub l2:                 f64,
    pub subsample:          usize,
    pub max_pairs_per_kind: usize,
    pub embedding_dim:      usize,

    /// Patches per class per subject in the evaluation sets
    pub eval_patches_per_class: usize,
    pub evaluation_sets:        Vec<EvaluationSet>,
    pub num_folds:              usize,
    pub c_grid:                 Vec<f64>,
    pub loglin_iterations:      usize,
    pub loglin_learning_rate:   f64,
    pub cnn_learning_rate:      f64,

    pub save: bool,
    pub viz:  bool,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            target_samples: 1,
            iteration:      0,
            seed:           None,

            data_dir:    "data/brainweb".to_string(),
            results_dir: "results".to_string(),
            viz_dir:     "viz".to_string(),

            image_width:     256,
            image_height:    256,
            slice_index:     None,
            scan_voxel:      VoxelType::F32,
            source_protocol: "GE2D_1.5T_RSS".to_string(),
            target_protocol: "GE2D_3.0T_MRB".to_string(),

            num_subjects:        20,
            source_subjects:     4,
            target_subjects:     1,
            validation_subjects: 9,
            prediction_subject:  19,

            patch_half_width: 7,
            tissue_classes:   vec![1, 2, 3],

            margin:             1.0,
            epochs:             32,
            batch_size:         128,
            repetitions:        10,
            learning_rate:      1e-3,
            l2:                 0.001,
            subsample:          10,
            max_pairs_per_kind: 5000,
            embedding_dim:      2,

            eval_patches_per_class: 100,
            evaluation_sets:        vec![EvaluationSet::H],
            num_folds:              2,
            c_grid:                 logspace(-3.0, 6.0, 10),
            loglin_iterations:      300,
            loglin_learning_rate:   0.05,
            cnn_learning_rate:      1e-3,

            save: true,
            viz:  true,
        }
    }
}

/// Values given on the command line; `None` keeps the configured value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub target_samples: usize,
    pub iteration:      usize,
    pub seed:           Option<u64>,
    pub data_dir:       Option<String>,
    pub results_dir:    Option<String>,
    pub viz_dir:        Option<String>,
    pub epochs:         Option<usize>,
    pub repetitions:    Option<usize>,
    pub batch_size:     Option<usize>,
    pub no_viz:         bool,
    pub no_save:        bool,
}

impl ExperimentConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        read_json(path).with_context(|| format!("Cannot load config '{}'", path.display()))
    }

    pub fn apply_overrides(&mut self, o: ConfigOverrides) {
        self.target_samples = o.target_samples;
        self.iteration      = o.iteration;
        if o.seed.is_some() {
            self.seed = o.seed;
        }
        if let Some(d) = o.data_dir    { self.data_dir = d; }
        if let Some(d) = o.results_dir { self.results_dir = d; }
        if let Some(d) = o.viz_dir     { self.viz_dir = d; }
        if let Some(e) = o.epochs      { self.epochs = e; }
        if let Some(r) = o.repetitions { self.repetitions = r; }
        if let Some(b) = o.batch_size  { self.batch_size = b; }
        if o.no_viz  { self.viz = false; }
        if o.no_save { self.save = false; }
    }

    pub fn patch_width(&self) -> usize {
        2 * self.patch_half_width + 1
    }

    pub fn classes(&self) -> Result<TissueClasses> {
        TissueClasses::new(self.tissue_classes.clone())
    }

    /// Subject reserved for the prediction images, if any.
    pub fn reserved_subject(&self) -> Option<usize> {
        self.viz.then_some(self.prediction_subject)
    }

    /// Reject configurations that cannot run, before touching any data.
    pub fn validate(&self) -> Result<()> {
        self.classes()?;

        if ConvTrunkConfig::new(self.patch_width()).feature_width().is_none() {
            bail!(
                "patch half-width {} gives {}x{} patches; the network needs at least 9x9",
                self.patch_half_width, self.patch_width(), self.patch_width()
            );
        }
        if self.image_width < self.patch_width() + 2 || self.image_height < self.patch_width() + 2 {
            bail!(
                "{}x{} images are too small for {}x{} patches",
                self.image_height, self.image_width, self.patch_width(), self.patch_width()
            );
        }

        if self.target_samples == 0 {
            bail!("at least one labeled target sample per class is required");
        }
        if self.source_subjects == 0 || self.target_subjects == 0 || self.validation_subjects == 0 {
            bail!("source, target and validation groups each need at least one subject");
        }
        if self.viz && self.prediction_subject >= self.num_subjects {
            bail!(
                "prediction subject {} is outside the {} available subjects",
                self.prediction_subject, self.num_subjects
            );
        }
        let pool   = self.num_subjects - usize::from(self.reserved_subject().is_some());
        let needed = self.source_subjects + self.target_subjects + self.validation_subjects;
        if needed > pool {
            bail!("{} subjects needed but only {} available", needed, pool);
        }

        if self.num_folds < 2 {
            bail!("cross-validation needs at least 2 folds, got {}", self.num_folds);
        }
        if self.c_grid.is_empty() || self.c_grid.iter().any(|&c| c <= 0.0) {
            bail!("the regularisation grid must hold positive values, got {:?}", self.c_grid);
        }
        if self.evaluation_sets.is_empty() {
            bail!("no evaluation set selected");
        }
        if self.batch_size == 0 || self.epochs == 0 {
            bail!("batch size and epochs must be positive");
        }
        if self.subsample == 0 || self.eval_patches_per_class == 0 {
            bail!("patch sample sizes must be positive");
        }
        if self.embedding_dim == 0 || (self.viz && self.embedding_dim < 2) {
            bail!("embedding dimension {} cannot be plotted", self.embedding_dim);
        }
        Ok(())
    }

    pub fn network_settings(&self) -> NetworkSettings {
        NetworkSettings {
            epochs:             self.epochs,
            batch_size:         self.batch_size,
            learning_rate:      self.learning_rate,
            l2:                 self.l2,
            margin:             self.margin,
            subsample:          self.subsample,
            max_pairs_per_kind: self.max_pairs_per_kind,
            embedding_dim:      self.embedding_dim,
        }
    }

    pub fn cnn_settings(&self, epochs: usize) -> CnnSettings {
        CnnSettings {
            epochs,
            batch_size:    self.batch_size,
            learning_rate: self.cnn_learning_rate,
            num_classes:   self.tissue_classes.len(),
        }
    }

    pub fn loglin_settings(&self, num_classes: usize) -> LogLinSettings {
        LogLinSettings {
            c_grid:        self.c_grid.clone(),
            inner_folds:   self.num_folds,
            iterations:    self.loglin_iterations,
            learning_rate: self.loglin_learning_rate,
            num_classes,
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logspace_matches_grid_endpoints() {
        let grid = logspace(-3.0, 6.0, 10);
        assert_eq!(grid.len(), 10);
        assert!((grid[0] - 1e-3).abs() < 1e-12);
        assert!((grid[9] - 1e6).abs() < 1e-3);
        assert!((grid[3] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = ExperimentConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.patch_width(), 15);
        assert_eq!(cfg.classes().unwrap().label_of(2), Some(3));
        assert_eq!(cfg.reserved_subject(), Some(19));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{ "epochs": 3, "evaluation_sets": ["J", "A"], "scan_voxel": "u16" }"#).unwrap();

        let cfg = ExperimentConfig::from_file(&path).unwrap();
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.evaluation_sets, vec![EvaluationSet::J, EvaluationSet::A]);
        assert_eq!(cfg.scan_voxel, VoxelType::U16);
        assert_eq!(cfg.batch_size, 128);
    }

    #[test]
    fn test_unreadable_config_names_the_file() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ExperimentConfig::from_file(&path).unwrap_err();
        assert!(format!("{err}").contains("broken.json"));
        assert!(ExperimentConfig::from_file(dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn test_loglin_settings_carry_the_grid() {
        let cfg = ExperimentConfig { c_grid: vec![0.5, 2.0], num_folds: 3, ..Default::default() };
        let s   = cfg.loglin_settings(2);
        assert_eq!(s.c_grid, vec![0.5, 2.0]);
        assert_eq!((s.inner_folds, s.num_classes), (3, 2));
    }

    #[test]
    fn test_overrides_win() {
        let mut cfg = ExperimentConfig::default();
        cfg.apply_overrides(ConfigOverrides {
            target_samples: 5,
            iteration: 2,
            epochs: Some(4),
            no_viz: true,
            ..Default::default()
        });
        assert_eq!((cfg.target_samples, cfg.iteration, cfg.epochs), (5, 2, 4));
        assert!(!cfg.viz);
        assert!(cfg.save);
        assert_eq!(cfg.reserved_subject(), None);
    }

    #[test]
    fn test_impossible_configs_are_rejected() {
        let small_patch = ExperimentConfig { patch_half_width: 3, ..Default::default() };
        assert!(small_patch.validate().is_err());

        let too_many = ExperimentConfig { validation_subjects: 15, ..Default::default() };
        assert!(too_many.validate().is_err());

        // 20 subjects fit exactly once the prediction subject is not reserved
        let exact = ExperimentConfig { validation_subjects: 15, viz: false, ..Default::default() };
        exact.validate().unwrap();

        let no_classes = ExperimentConfig { tissue_classes: vec![], ..Default::default() };
        assert!(no_classes.validate().is_err());

        let one_fold = ExperimentConfig { num_folds: 1, ..Default::default() };
        assert!(one_fold.validate().is_err());
    }
}
