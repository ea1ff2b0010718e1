// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves the trained acquisition-invariant network with
// Burn's CompactRecorder (MessagePack, half precision).
//
//   results/
//     net_nT{nT}_r{it}.mpk   ← trained AcqInvNet weights
//
// The architecture is not stored here; config_nT{nT}_r{it}.json
// next to it holds what is needed to rebuild the network.

use anyhow::{Context, Result};
use std::{fs, path::PathBuf};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};

use crate::ml::model::AcqInvNet;

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Write `{dir}/{name}.mpk`; the recorder adds the extension.
    pub fn save_network<B: Backend>(&self, model: &AcqInvNet<B>, name: &str) -> Result<()> {
        let path = self.dir.join(name);

        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save network to '{}'", path.display()))?;

        tracing::info!("Saved network weights to '{}.mpk'", path.display());
        Ok(())
    }
}
