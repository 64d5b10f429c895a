//! slm config command - print the effective configuration.

use anyhow::{Context, Result};

use crate::commands::load_config;
use crate::{Cli, OutputFormat};

pub fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    if cli.quiet {
        return Ok(());
    }
    match cli.format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&config).context("Failed to serialize configuration")?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            let toml = config.to_toml().context("Failed to serialize configuration")?;
            print!("{}", toml);
        }
    }
    Ok(())
}

