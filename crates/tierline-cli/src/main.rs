//! tierline binary
//!
//! ```bash
//! tierline check recording.json
//! tierline show recording.ron --tier words
//! tierline edit recording.ron fixes.ron --mode shift --out fixed.ron
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tierline_core::PropagationMode;
use tierline_telemetry::TracingOptions;

/// Check, inspect and edit time-aligned annotation documents.
#[derive(Parser, Debug)]
#[command(name = "tierline")]
#[command(about = "Check, inspect and edit time-aligned annotation documents")]
struct Cli {
    /// More log output (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Document configuration (RON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overlap correction for top-level edits: bulldozer or shift
    #[arg(long, global = true, value_parser = parse_mode)]
    mode: Option<PropagationMode>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a document and report consistency problems
    Check { document: PathBuf },
    /// List annotations with their effective times
    Show {
        document: PathBuf,
        /// Only this tier
        #[arg(long)]
        tier: Option<String>,
        /// Print JSON snapshots instead of text
        #[arg(long)]
        json: bool,
    },
    /// Apply a RON edit script
    Edit {
        document: PathBuf,
        script: PathBuf,
        /// Write the edited document here (.ron or .json)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn parse_mode(s: &str) -> Result<PropagationMode, String> {
    PropagationMode::from_str(s).ok_or_else(|| format!("unknown mode {s:?} (expected bulldozer or shift)"))
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    tierline_telemetry::init(&TracingOptions::for_verbosity(cli.verbose))?;

    let config = tierline_cli::document_config(cli.config.as_deref(), cli.mode)?;
    match cli.command {
        Command::Check { document } => {
            let report = tierline_cli::check(&document, config)?;
            print!("{}", report.text);
            if !report.clean {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Show { document, tier, json } => {
            print!("{}", tierline_cli::show(&document, config, tier.as_deref(), json)?);
        }
        Command::Edit { document, script, out } => {
            print!("{}", tierline_cli::edit(&document, &script, config, out.as_deref())?);
        }
    }
    Ok(ExitCode::SUCCESS)
}
