// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses the command line with clap, builds the experiment
// config and hands it to Layer 2. Nothing is computed here.

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::RunArgs;

use crate::application::{config::ExperimentConfig, experiment_use_case::ExperimentUseCase};

#[derive(Parser, Debug)]
#[command(
    name = "acqinv-experiment",
    version = "0.1.0",
    about = "Train an acquisition-invariant CNN on Brainweb patches and compare tissue and scanner classifiers."
)]
pub struct Cli {
    #[command(flatten)]
    pub args: RunArgs,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let config = ExperimentConfig::try_from(self.args)?;
        let results = ExperimentUseCase::new(config).execute()?;

        for key in results.keys() {
            if let Some(err) = results.get(key) {
                println!("{key:<16} {err:.4}");
            }
        }
        Ok(())
    }
}
