// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from .raw files on disk to tensor batches:
//
//   .raw scans + phantoms
//       │
//       ▼
//   RawVolumeLoader   → reads one slice per subject
//       │
//       ▼
//   Preprocessor      → normalises, keeps tissue labels,
//       │               strips the skull
//       ▼
//   PatchSampler      → draws patch centres per tissue class
//       │               and cuts patches around them
//       ▼
//   PatchDataset /    → Burn Dataset over patches or over
//   PairDataset         similar/dissimilar patch pairs
//       │
//       ▼
//   PatchBatcher /    → stacks items into tensors
//   PairBatcher

/// Reads Brainweb .raw scans and phantoms
pub mod loader;

/// Normalisation, label mapping and skull stripping
pub mod preprocessor;

/// Draws disjoint source / target / validation subjects
pub mod subjects;

/// Patch centre sampling and patch extraction
pub mod sampler;

/// Burn Dataset implementations for patches and pairs
pub mod dataset;

/// Burn Batcher implementations for patches and pairs
pub mod batcher;
