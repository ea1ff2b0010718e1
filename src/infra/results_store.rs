// ============================================================
// Layer 6 — Result Files
// ============================================================
// Everything a run leaves in the results directory is named
// after (nT, iteration):
//
//   err_exp_acqinv_cnn_b1b3_nT{nT}_r{it}.json   error rates
//   config_nT{nT}_r{it}.json                    effective config
//   train_nT{nT}_r{it}.csv                      training log
//   net_nT{nT}_r{it}.mpk                        network weights

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::results::ExperimentResults;

pub struct ResultStore {
    dir:            PathBuf,
    target_samples: usize,
    iteration:      usize,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>, target_samples: usize, iteration: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create results directory '{}'", dir.display()))?;
        Ok(Self { dir, target_samples, iteration })
    }

    pub fn dir(&self) -> &Path { &self.dir }

    fn run_suffix(&self) -> String {
        format!("nT{}_r{}", self.target_samples, self.iteration)
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir.join(format!("err_exp_acqinv_cnn_b1b3_{}.json", self.run_suffix()))
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(format!("config_{}.json", self.run_suffix()))
    }

    pub fn training_log_path(&self) -> PathBuf {
        self.dir.join(format!("train_{}.csv", self.run_suffix()))
    }

    /// Checkpoint name without extension.
    pub fn network_name(&self) -> String {
        format!("net_{}", self.run_suffix())
    }

    pub fn save_results(&self, results: &ExperimentResults) -> Result<PathBuf> {
        let path = self.results_path();
        tracing::info!("Writing to: {}", path.display());
        write_json(&path, results)?;
        Ok(path)
    }

    pub fn save_config<T: Serialize>(&self, config: &T) -> Result<PathBuf> {
        let path = self.config_path();
        write_json(&path, config)?;
        tracing::debug!("Saved config to '{}'", path.display());
        Ok(path)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)
        .with_context(|| format!("Cannot write '{}'", path.display()))
}

/// Deserialize a JSON file, naming the file in any error.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Cannot read '{}'", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("Invalid JSON in '{}'", path.display()))
}
