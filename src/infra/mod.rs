// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything the run writes to disk:
//
//   results_store.rs — result and config JSON files, and the
//                      names of every per-run artifact
//
//   checkpoint.rs    — network weights via Burn's
//                      CompactRecorder
//
//   metrics.rs       — per-epoch training loss CSV
//
//   viz.rs           — embedding scatter plots and
//                      segmentation / intensity PNGs

/// Result mapping and config persistence
pub mod results_store;

/// Network checkpoint saving and loading
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;

/// Diagnostic PNG images
pub mod viz;
