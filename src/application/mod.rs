// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers to run one experiment.
//
//   config.rs              — every constant of a run, JSON
//                            overrides, validation
//   experiment_use_case.rs — the fixed eleven-step sequence
//
// No ML math and no file formats here, only workflow
// coordination.

/// Experiment configuration
pub mod config;

/// The experiment workflow
pub mod experiment_use_case;
