//! Subcommand implementations.

pub mod config;
pub mod info;
pub mod run;
pub mod stage;

use anyhow::{Context, Result};
use slm_prep::ProcessConfig;
use tracing::debug;

use crate::Cli;

/// The configuration named by `--config`, or the defaults.
pub fn load_config(cli: &Cli) -> Result<ProcessConfig> {
    match &cli.config {
        Some(path) => {
            let config = ProcessConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration from {:?}", path))?;
            debug!(path = %path.display(), "Loaded configuration");
            Ok(config)
        }
        None => Ok(ProcessConfig::default()),
    }
}
