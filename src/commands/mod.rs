//! CLI command implementations.
//!
//! Each command is implemented in its own module.
//! Commands orchestrate the library components to perform user tasks.

pub mod emit;
pub mod models;

// Re-export main command functions
pub use emit::{execute_emit, execute_validate, validate_args, EmitArgs};
