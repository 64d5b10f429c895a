//! slm: command-line front end for powder-bed build preparation.
//!
//! Each subcommand runs one or more pipeline stages against a model
//! directory, so a failed or tuned stage can be rerun without redoing the
//! ones before it.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=slm_prep=info` - Stage summaries
//! - `RUST_LOG=slm_prep=debug` - Per-layer detail
//! - `RUST_LOG=slm_prep::timing=debug` - Performance timing
//!
//! # Example
//!
//! ```bash
//! # Whole pipeline
//! slm run bracket.stl -o out/bracket --config process.toml
//!
//! # Redo cleanup onwards after changing the simplify section
//! slm run -o out/bracket --from clean --config process.toml
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use slm_prep::Stage;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{config, info, run, stage};

/// slm - prepare parts for laser powder-bed fusion.
///
/// Supports, slices, cleans and encodes a triangulated part into per-layer
/// machine files and a parameter report.
#[derive(Parser)]
#[command(name = "slm")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Process configuration file (TOML or JSON)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a range of pipeline stages
    Run {
        /// Input mesh; required when starting at the supports stage
        input: Option<PathBuf>,

        /// Model directory receiving every stage output
        #[arg(short, long)]
        output: PathBuf,

        /// First stage to run
        #[arg(long, default_value = "supports")]
        from: Stage,

        /// Last stage to run
        #[arg(long, default_value = "parameters")]
        to: Stage,
    },

    /// Place the part and add block supports
    Supports {
        /// Input mesh file
        input: PathBuf,

        /// Model directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Slice the supported mesh into raw layer files
    Slice {
        /// Model directory
        model_dir: PathBuf,
    },

    /// Clean raw layers into straight, merged segments
    Clean {
        /// Model directory
        model_dir: PathBuf,
    },

    /// Encode clean layers as machine records
    Encode {
        /// Model directory
        model_dir: PathBuf,
    },

    /// Write the manufacturing parameter report
    Params {
        /// Model directory
        model_dir: PathBuf,
    },

    /// Describe a mesh, a layer set or a machine directory
    Info {
        /// Mesh file or directory
        path: PathBuf,
    },

    /// Print the effective process configuration as TOML
    Config,
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over -v flags
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "slm_prep=info",
            2 => "slm_prep=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Run {
            input,
            output,
            from,
            to,
        } => run::run(input.as_deref(), output, *from, *to, &cli),
        Commands::Supports { input, output } => {
            run::run(Some(input), output, Stage::Supports, Stage::Supports, &cli)
        }
        Commands::Slice { model_dir } => stage::run(Stage::Slice, model_dir, &cli),
        Commands::Clean { model_dir } => stage::run(Stage::Clean, model_dir, &cli),
        Commands::Encode { model_dir } => stage::run(Stage::Encode, model_dir, &cli),
        Commands::Params { model_dir } => stage::run(Stage::Parameters, model_dir, &cli),
        Commands::Info { path } => info::run(path, &cli),
        Commands::Config => config::run(&cli),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            if let Some(prep_err) = e.downcast_ref::<slm_prep::PrepError>() {
                eprintln!("{}: {}", "Error".red().bold(), prep_err);
                eprintln!("  {}: {}", "Code".cyan(), prep_err.code());
                eprintln!(
                    "  {}: {}",
                    "Suggestion".green(),
                    prep_err.recovery_suggestion()
                );
                if let Some(location) = prep_err.location() {
                    eprintln!("  {}: {}", "Location".yellow(), location);
                }
            } else {
                eprintln!("{}: {}", "Error".red().bold(), e);
                for cause in e.chain().skip(1) {
                    eprintln!("  {}: {}", "Caused by".yellow(), cause);
                }
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
