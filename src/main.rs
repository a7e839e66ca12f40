//! cctprof CLI
//!
//! Assembles a profiling session from a session description and exports
//! the experiment database the analysis viewer reads.

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;

use cctprof::commands::{execute_emit, execute_validate, validate_args, EmitArgs};

/// cctprof - Calling-context-tree profile export
#[derive(Parser, Debug)]
#[command(name = "cctprof")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a session description into an experiment database
    Emit {
        /// Path to the session-description JSON
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory for the database bundle; omit for a dry run
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Copy referenced source files into the bundle
        #[arg(long)]
        include_sources: bool,
    },

    /// Check that a session description loads and serializes cleanly
    Validate {
        /// Path to the session-description JSON
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    match cli.command {
        Commands::Emit { input, output, include_sources } => {
            let args = EmitArgs { input, output, include_sources };
            validate_args(&args)?;
            execute_emit(args)
        }
        Commands::Validate { input } => execute_validate(input),
    }
}
