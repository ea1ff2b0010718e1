// ============================================================
// Layer 4 — Raw Volume Loader
// ============================================================
// Reads simulated Brainweb scans and phantoms from headerless
// .raw files.
//
// File naming convention (NN = 1-based subject, two digits):
//
//   {data_dir}/sims/subject{NN}_256_{protocol}.raw   → scan
//   {data_dir}/phantoms/subject{NN}_256.raw          → phantom
//
// The source protocol is GE2D_1.5T_RSS, the target protocol
// GE2D_3.0T_MRB. Scans store little-endian voxels of the
// configured type, phantoms store one u8 label per voxel.
// A file may hold a single slice or a stack of slices; the
// configured slice is extracted (middle slice by default).
//
// After reading:
//   - scans are rescaled to [0, 1] per subject
//   - phantom labels outside the tissue classes become 0

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};

use crate::data::preprocessor::{keep_tissue_labels, normalize_pixels};
use crate::domain::patch::TissueClasses;
use crate::domain::scan::{Acquisition, ImageStack, LabelStack};
use crate::domain::traits::ScanSource;

/// Element type of the voxels in a scan file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoxelType {
    U8,
    U16,
    F32,
}

impl VoxelType {
    pub fn byte_size(self) -> usize {
        match self {
            VoxelType::U8  => 1,
            VoxelType::U16 => 2,
            VoxelType::F32 => 4,
        }
    }

    fn decode(self, bytes: &[u8]) -> Vec<f32> {
        match self {
            VoxelType::U8 => bytes.iter().map(|&b| b as f32).collect(),
            VoxelType::U16 => bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]) as f32)
                .collect(),
            VoxelType::F32 => bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        }
    }
}

/// Loads Brainweb slices for a set of subjects.
pub struct RawVolumeLoader {
    data_dir:        PathBuf,
    width:           usize,
    height:          usize,
    slice_index:     Option<usize>,
    voxel:           VoxelType,
    source_protocol: String,
    target_protocol: String,
    classes:         TissueClasses,
}

impl RawVolumeLoader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        data_dir:        impl Into<PathBuf>,
        width:           usize,
        height:          usize,
        slice_index:     Option<usize>,
        voxel:           VoxelType,
        source_protocol: impl Into<String>,
        target_protocol: impl Into<String>,
        classes:         TissueClasses,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            width,
            height,
            slice_index,
            voxel,
            source_protocol: source_protocol.into(),
            target_protocol: target_protocol.into(),
            classes,
        }
    }

    pub fn protocol(&self, acquisition: Acquisition) -> &str {
        match acquisition {
            Acquisition::Source => &self.source_protocol,
            Acquisition::Target => &self.target_protocol,
        }
    }

    /// Path of the simulated scan of 0-based `subject`
    pub fn scan_path(&self, subject: usize, acquisition: Acquisition) -> PathBuf {
        self.data_dir.join("sims").join(format!(
            "subject{:02}_256_{}.raw",
            subject + 1,
            self.protocol(acquisition)
        ))
    }

    /// Path of the ground-truth phantom of 0-based `subject`
    pub fn phantom_path(&self, subject: usize) -> PathBuf {
        self.data_dir
            .join("phantoms")
            .join(format!("subject{:02}_256.raw", subject + 1))
    }

    /// Pick the configured slice out of a decoded file.
    fn select_slice<T: Copy>(&self, voxels: Vec<T>, path: &Path) -> Result<Vec<T>> {
        let area = self.width * self.height;
        if voxels.is_empty() || voxels.len() % area != 0 {
            bail!(
                "'{}' holds {} voxels, not a whole number of {}x{} slices",
                path.display(), voxels.len(), self.width, self.height
            );
        }
        let slices = voxels.len() / area;
        let index  = self.slice_index.unwrap_or(slices / 2);
        if index >= slices {
            bail!("slice {} requested but '{}' holds {} slices", index, path.display(), slices);
        }
        Ok(voxels[index * area..(index + 1) * area].to_vec())
    }

    fn read_scan(&self, path: &Path) -> Result<Vec<f32>> {
        let bytes = fs::read(path)
            .with_context(|| format!("Cannot read scan '{}'", path.display()))?;
        if bytes.len() % self.voxel.byte_size() != 0 {
            bail!(
                "'{}' has {} bytes, not a multiple of the {:?} voxel size",
                path.display(), bytes.len(), self.voxel
            );
        }
        self.select_slice(self.voxel.decode(&bytes), path)
    }

    fn read_phantom(&self, path: &Path) -> Result<Vec<u8>> {
        let bytes = fs::read(path)
            .with_context(|| format!("Cannot read phantom '{}'", path.display()))?;
        self.select_slice(bytes, path)
    }
}

impl ScanSource for RawVolumeLoader {
    fn load_scans(&self, subjects: &[usize], acquisition: Acquisition) -> Result<ImageStack> {
        let slices = subjects
            .iter()
            .map(|&s| {
                let path = self.scan_path(s, acquisition);
                tracing::debug!("Reading scan {}", path.display());
                self.read_scan(&path)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut images = ImageStack::from_slices(self.width, self.height, slices)?;
        normalize_pixels(&mut images);
        tracing::info!(
            "Loaded {} {:?} scans ({})",
            images.len(), acquisition, self.protocol(acquisition)
        );
        Ok(images)
    }

    fn load_labels(&self, subjects: &[usize]) -> Result<LabelStack> {
        let slices = subjects
            .iter()
            .map(|&s| self.read_phantom(&self.phantom_path(s)))
            .collect::<Result<Vec<_>>>()?;

        let mut labels = LabelStack::from_slices(self.width, self.height, slices)?;
        keep_tissue_labels(&mut labels, &self.classes);
        Ok(labels)
    }
}
