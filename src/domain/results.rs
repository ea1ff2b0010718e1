// ============================================================
// Layer 3 — Experiment Results
// ============================================================
// Error rates collected during a run, keyed by a descriptive
// string of the form  {task}-{set}-{method}:
//
//   tiss-H-source   tissue classifier trained on source patches,
//                   evaluated on target validation subjects
//   scan-H-net-tn   scanner classifier on the trained network
//
// Keys iterate in sorted order so the serialised file is stable.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ─── EvaluationSet ────────────────────────────────────────────────────────────
/// Which target patches a classifier is evaluated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvaluationSet {
    /// Unlabeled patches of the target training subject
    J,
    /// Patches of the held-out target validation subjects
    H,
    /// J and H together
    A,
}

impl fmt::Display for EvaluationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            EvaluationSet::J => "J",
            EvaluationSet::H => "H",
            EvaluationSet::A => "A",
        };
        f.write_str(letter)
    }
}

// ─── Task ─────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Tissue,
    Scanner,
}

impl Task {
    fn prefix(self) -> &'static str {
        match self {
            Task::Tissue  => "tiss",
            Task::Scanner => "scan",
        }
    }
}

pub fn result_key(task: Task, set: EvaluationSet, method: &str) -> String {
    format!("{}-{}-{}", task.prefix(), set, method)
}

// ─── ExperimentResults ────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentResults {
    errors: BTreeMap<String, f64>,
}

impl ExperimentResults {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, key: impl Into<String>, error: f64) {
        let key = key.into();
        tracing::info!("{} = {:.4}", key, error);
        self.errors.insert(key, error);
    }

    pub fn get(&self, key: &str) -> Option<f64> { self.errors.get(key).copied() }

    pub fn len(&self) -> usize { self.errors.len() }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }
}
