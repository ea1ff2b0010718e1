// ============================================================
// Layer 6 — Training Metrics Logger
// ============================================================
// Records the contrastive training loss to a CSV file after
// each epoch of each repetition.
//
// Output file: {results_dir}/train_nT{nT}_r{it}.csv
//
//   repetition,epoch,loss,pairs
//   1,1,0.183201,6120
//   1,2,0.151877,6120
//   ...
//
// Every repetition resamples the source patches and therefore
// trains on a different pair set; `pairs` is its size.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

/// One row of the training log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Repetition of the training procedure (starts at 1)
    pub repetition: usize,

    /// Epoch within the repetition (starts at 1)
    pub epoch: usize,

    /// Mean contrastive loss over all batches of the epoch
    pub loss: f64,

    /// Number of patch pairs trained on
    pub pairs: usize,
}

impl EpochMetrics {
    pub fn new(repetition: usize, epoch: usize, loss: f64, pairs: usize) -> Self {
        Self { repetition, epoch, loss, pairs }
    }
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create the CSV file (truncating any previous log of the same run)
    /// and write its header.
    pub fn create(csv_path: impl AsRef<Path>) -> Result<Self> {
        let csv_path = csv_path.as_ref().to_path_buf();
        if let Some(dir) = csv_path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create '{}'", dir.display()))?;
        }

        let mut f = fs::File::create(&csv_path)
            .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
        writeln!(f, "repetition,epoch,loss,pairs")?;
        tracing::debug!("Created training log '{}'", csv_path.display());

        Ok(Self { csv_path })
    }

    /// Append one epoch as a new row.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot append to '{}'", self.csv_path.display()))?;

        writeln!(f, "{},{},{:.6},{}", m.repetition, m.epoch, m.loss, m.pairs)?;
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
