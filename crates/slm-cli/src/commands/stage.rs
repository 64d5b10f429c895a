//! Single-stage commands: slice, clean, encode and params.
//!
//! Each reads the previous stage's output from the model directory.

use std::path::Path;

use anyhow::Result;
use slm_prep::{PipelinePlan, Stage};

use crate::Cli;
use crate::commands::run::execute;

pub fn run(stage: Stage, model_dir: &Path, cli: &Cli) -> Result<()> {
    execute(&PipelinePlan::new(model_dir).only(stage), cli)
}
