//! Emit command implementation.
//!
//! The emit command:
//! 1. Loads and parses the session description
//! 2. Assembles the in-memory session (registries + context tree)
//! 3. Renders the experiment database and writes the output bundle

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info};

use crate::emit::{EmitOptions, ExperimentXml};
use crate::session::ProfileSession;
use crate::utils::error::InputError;

use super::models::{build_session, SessionSpec};

/// Arguments for the emit command
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone)]
pub struct EmitArgs {
    /// Path to the session-description JSON
    pub input: PathBuf,

    /// Output directory for the experiment database; `None` is a dry run
    pub output: Option<PathBuf>,

    /// Mirror referenced source files into the output bundle
    pub include_sources: bool,
}

/// Check argument consistency before doing any work
///
/// **Public** - called from main.rs right after parsing
pub fn validate_args(args: &EmitArgs) -> Result<()> {
    if !args.input.is_file() {
        anyhow::bail!("session description not found: {}", args.input.display());
    }
    if let Some(out) = &args.output {
        if out.is_file() {
            anyhow::bail!("output path is an existing file, expected a directory: {}", out.display());
        }
    }
    if args.include_sources && args.output.is_none() {
        info!("dry run: --include-sources will be honored in naming only, no files copied");
    }
    Ok(())
}

/// Load a session description from disk
fn load_session(input: &PathBuf) -> Result<ProfileSession, InputError> {
    let text = fs::read_to_string(input)?;
    let spec: SessionSpec = serde_json::from_str(&text)?;
    build_session(spec)
}

/// Execute the emit command
///
/// **Public** - main entry point called from main.rs
pub fn execute_emit(args: EmitArgs) -> Result<()> {
    let start = Instant::now();

    info!("Step 1/3: Loading session description {}", args.input.display());
    let session = load_session(&args.input)
        .context("Failed to load session description")?;

    debug!(
        "Session '{}': {} contexts, {} metrics, {} modules, {} files",
        session.attributes().name,
        session.contexts().len(),
        session.metrics().len(),
        session.modules().len(),
        session.files().len()
    );

    info!("Step 2/3: Populating identity cache and rendering...");
    let exml = ExperimentXml::new(
        &session,
        EmitOptions { out_dir: args.output.clone(), include_sources: args.include_sources },
    );

    info!("Step 3/3: Writing experiment database...");
    exml.write().context("Failed to serialize experiment database")?;
    debug!("{} synthetic entity ids drawn", exml.synthetic_ids_drawn());

    info!("Done in {:.2?} at {}", start.elapsed(), Utc::now().to_rfc3339());
    Ok(())
}

/// Execute a validation pass: full cache population and rendering with no
/// output, reporting what would be written.
///
/// **Public** - the `validate` subcommand
pub fn execute_validate(input: PathBuf) -> Result<()> {
    let session = load_session(&input)
        .context("Failed to load session description")?;

    let exml = ExperimentXml::new(&session, EmitOptions::default());
    let doc = exml.render().context("Session does not serialize cleanly")?;

    println!("✓ Valid session description");
    println!("  Session: {}", session.attributes().name);
    println!("  Contexts: {}", session.contexts().len());
    println!("  Metrics: {}", session.metrics().len());
    println!("  Document size: {} bytes", doc.len());
    Ok(())
}
