//! cctprof
//!
//! Calling-context-tree profile assembly and experiment database export
//! for native programs.
//!
//! The crate models one profiling measurement session - scopes, metrics,
//! and the calling-context tree built across measurement workers - and
//! serializes it into the nested experiment database document an
//! independent analysis viewer consumes.
//!
//! ## Getting Started
//!
//! Most users should install and use the CLI:
//!
//! ```bash
//! cargo install cctprof
//! cctprof --help
//! ```

pub mod commands;
pub mod emit;
pub mod session;
pub mod utils;
