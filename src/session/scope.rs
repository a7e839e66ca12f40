//! Scope classification for calling-context tree nodes.
//!
//! Every context node is tagged with exactly one Scope describing where the
//! observed activity came from: a binary offset, a source line, a loop, a
//! (possibly inlined) function, or one of the synthetic catch-all kinds.
//! Scopes are immutable once created; the location facts they carry are
//! produced by the upstream unwinder and symbol analysis.

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A load module: one binary artifact contributing code to the program
///
/// **Public** - referenced by point and function scopes
#[derive(Debug)]
pub struct Module {
    /// Path the module was loaded from
    pub path: PathBuf,

    /// Registration id, assigned by the session (dense, starting at 0)
    pub id: u32,
}

impl Module {
    /// Basename used when labeling synthetic procedures
    ///
    /// **Public** - falls back to the full path for odd paths like "/"
    pub fn basename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }
}

/// A source file reference, possibly with a resolved on-disk copy
///
/// **Public** - referenced by line, loop, and function scopes
#[derive(Debug)]
pub struct SourceFile {
    /// Path as recorded in the debug information
    pub path: PathBuf,

    /// Resolved path on the local filesystem, if the file was found.
    /// Used for source inclusion in the output bundle.
    pub resolved: Option<PathBuf>,

    /// Registration id, assigned by the session (dense, starting at 0)
    pub id: u32,
}

/// Descriptor for a named routine
///
/// **Public** - shared between function and inlined_function scopes
#[derive(Debug)]
pub struct FunctionInfo {
    /// Demangled name; empty for anonymous functions, which render as
    /// `<unknown procedure> 0x... [module]`
    pub name: String,

    /// Module containing the function's code
    pub module: Arc<Module>,

    /// Entry offset within the module
    pub offset: u64,

    /// Defining source file, when known
    pub file: Option<Arc<SourceFile>>,

    /// Defining line, 0 when unknown
    pub line: u64,
}

/// A marker context with no physical location (program start, thread
/// spawn, and the like). Renders via its pretty name when one exists.
#[derive(Debug)]
pub struct Placeholder {
    /// Raw marker value from the measurement subsystem
    pub code: u64,

    /// Human-readable name, when the marker is recognized
    pub pretty: Option<String>,

    /// Short mnemonic used in the `<unrecognized placeholder: ...>` label
    pub fallback: String,
}

/// Classification of one context node's origin
///
/// **Public** - the tagged variant at the heart of the data model
#[derive(Debug, Clone)]
pub enum Scope {
    /// The single root of the tree
    Global,

    /// No usable unwind information at all
    Unknown,

    /// Synthetic marker context
    Placeholder(Arc<Placeholder>),

    /// Resolved binary offset with no symbol
    Point { module: Arc<Module>, offset: u64 },

    /// A single source line
    Line { file: Arc<SourceFile>, line: u64 },

    /// A loop construct
    Loop { file: Arc<SourceFile>, line: u64 },

    /// A named (outlined) function
    Function(Arc<FunctionInfo>),

    /// A function inlined at a particular call site
    InlinedFunction {
        func: Arc<FunctionInfo>,
        call_file: Arc<SourceFile>,
        call_line: u64,
    },
}

impl Scope {
    /// The source file this scope lexically belongs to, if any.
    ///
    /// Used by the serializer's file-consistency check: line children are
    /// compared against the nearest non-line ancestor's lexical file.
    pub fn lexical_file(&self) -> Option<&Arc<SourceFile>> {
        match self {
            Scope::Global | Scope::Unknown | Scope::Placeholder(_) | Scope::Point { .. } => None,
            Scope::Function(f) => f.file.as_ref(),
            Scope::Line { file, .. } | Scope::Loop { file, .. } => Some(file),
            Scope::InlinedFunction { call_file, .. } => Some(call_file),
        }
    }

    /// Short kind name for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Unknown => "unknown",
            Scope::Placeholder(_) => "placeholder",
            Scope::Point { .. } => "point",
            Scope::Line { .. } => "line",
            Scope::Loop { .. } => "loop",
            Scope::Function(_) => "function",
            Scope::InlinedFunction { .. } => "inlined_function",
        }
    }
}

/// Render a path the way the debug information recorded it
pub(crate) fn path_string(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_basename() {
        let m = Module { path: PathBuf::from("/usr/lib/libfoo.so"), id: 0 };
        assert_eq!(m.basename(), "libfoo.so");
    }

    #[test]
    fn test_lexical_file() {
        let f = Arc::new(SourceFile { path: PathBuf::from("a.c"), resolved: None, id: 0 });
        let line = Scope::Line { file: Arc::clone(&f), line: 3 };
        assert!(Arc::ptr_eq(line.lexical_file().unwrap(), &f));
        assert!(Scope::Global.lexical_file().is_none());
        assert!(Scope::Unknown.lexical_file().is_none());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Scope::Global.kind_name(), "global");
        let f = Arc::new(SourceFile { path: PathBuf::from("a.c"), resolved: None, id: 0 });
        assert_eq!(Scope::Loop { file: f, line: 1 }.kind_name(), "loop");
    }
}
