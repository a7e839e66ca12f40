//! Error types for the entire application.
//!
//! We use `thiserror` for library-style errors with custom types,
//! and `anyhow` for application-level error propagation in main.rs and
//! commands. Fatal conditions are plain `Err` values; the binary turns
//! them into a nonzero exit with no output file written.

use thiserror::Error;

/// Configuration errors raised while assembling a session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("metric '{0}' supports neither the execution nor the function view")]
    NoApplicableScope(String),

    #[error("metric '{name}' declares {count} partials; the identifier packing allows at most 64")]
    TooManyPartials { name: String, count: usize },

    #[error("metric '{name}' declares {count} statistics; the identifier packing allows at most 64")]
    TooManyStatistics { name: String, count: usize },

    #[error("formula for '{name}' references partial {partial}, which does not exist")]
    InvalidFormula { name: String, partial: usize },

    #[error("no metric registered at index {0}")]
    UnknownMetric(usize),
}

/// Errors that abort serialization.
///
/// A structural impossibility or a failed output write invalidates the
/// entire document: a half-written experiment database would mislead the
/// downstream viewer, so nothing is recovered.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("inlined function '{0}' under a context that cannot bear a call site; no spare identifier exists to synthesize one")]
    InlinedOutsideFrame(String),

    #[error("global context must have identifier 0, found {0}")]
    RootIdentifier(usize),

    #[error("failed to write experiment database: {0}")]
    WriteFailed(#[from] std::io::Error),
}

/// Errors that can occur while loading a session description
#[derive(Error, Debug)]
pub enum InputError {
    #[error("failed to read session description: {0}")]
    ReadFailed(#[from] std::io::Error),

    #[error("JSON deserialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("session description references {kind} index {index}, which does not exist")]
    BadReference { kind: &'static str, index: usize },

    #[error("unknown combination rule '{0}' (expected sum, min, or max)")]
    BadCombination(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}
