//! Identity and userdata cache for output-relevant entities.
//!
//! Every long-lived entity (context, file, module, synthetic procedure,
//! metric) gets a permanent identifier and a pre-rendered tag, computed at
//! most once even when many workers race to reference it first. The
//! claim protocol is a tri-state cell: exactly one caller wins the claim
//! and runs the initializer; losers return immediately without blocking
//! and read the finished result after the ingest/emit barrier.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use log::warn;

use crate::session::scope::{path_string, Module, Placeholder, SourceFile};
use crate::utils::config::{FIRST_PROC_ID, SOURCE_SUBDIR};

use super::xml::{escape, hex, quoted};
use super::EmitOptions;

const UNCLAIMED: u8 = 0;
const CLAIMING: u8 = 1;
const DONE: u8 = 2;

/// One-shot claim cell: unclaimed -> claiming -> done.
///
/// **Public within emit** - the only concurrency primitive of this module
#[derive(Debug)]
pub struct ClaimCell {
    state: AtomicU8,
}

impl ClaimCell {
    pub fn new() -> Self {
        ClaimCell { state: AtomicU8::new(UNCLAIMED) }
    }

    /// Returns true for exactly one caller; wait-free for everyone else
    pub fn claim(&self) -> bool {
        self.state
            .compare_exchange(UNCLAIMED, CLAIMING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Publish the winner's work
    pub fn complete(&self) {
        self.state.store(DONE, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }
}

impl Default for ClaimCell {
    fn default() -> Self {
        Self::new()
    }
}

/// A lazily rendered tag: claim plus storage for the winner's result
#[derive(Debug, Default)]
pub struct OnceTag {
    cell: ClaimCell,
    text: OnceLock<String>,
}

impl OnceTag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `render` at most once over the lifetime of the tag. Concurrent
    /// losers perform no work and do not wait.
    pub fn render_with(&self, render: impl FnOnce() -> String) {
        if self.cell.claim() {
            let _ = self.text.set(render());
            self.cell.complete();
        }
    }

    /// The rendered text, if a winner has finished
    pub fn get(&self) -> Option<&str> {
        if self.cell.is_done() {
            self.text.get().map(String::as_str)
        } else {
            None
        }
    }
}

/// Key identifying the Procedure entry a Scope materializes.
///
/// Two distinct contexts with the same key share one Procedure, which is
/// how repeated unresolved offsets collapse into a single
/// `<unknown procedure>` row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ProcKey {
    Placeholder { code: u64 },
    Point { module: u32, offset: u64 },
    Line { file: u32, line: u64 },
    Loop { file: u32, line: u64 },
    Function { module: u32, offset: u64, name: String },
    Inlined { module: u32, offset: u64, call_file: u32, call_line: u64 },
}

/// A cached Procedure: id assigned at creation, tag rendered on first
/// definition. Entries referenced but never defined contribute no table
/// row while keeping their id reserved.
#[derive(Debug)]
pub struct ProcEntry {
    pub id: u32,
    tag: OnceTag,
}

impl ProcEntry {
    pub fn new(id: u32) -> Self {
        ProcEntry { id, tag: OnceTag::new() }
    }

    /// Define the procedure; first definition wins, the rest are no-ops
    pub fn define(&self, name: &str, offset: u64, fake: bool) {
        self.tag.render_with(|| {
            let mut t = format!("<Procedure i=\"{}\" n={} v=\"{}\"", self.id, quoted(name), hex(offset));
            if fake {
                t.push_str(" f=\"1\"");
            }
            t.push_str("/>\n");
            t
        });
    }

    /// Define a placeholder procedure from its marker facts
    pub fn define_placeholder(&self, p: &Placeholder) {
        match &p.pretty {
            Some(pretty) => self.define(pretty, 0, true),
            None => self.define(&format!("<unrecognized placeholder: {}>", p.fallback), 0, true),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.get()
    }
}

/// What a file entry stands for
#[derive(Debug)]
pub(crate) enum FileKind {
    /// A registered source file
    Real(Arc<SourceFile>),
    /// The synthetic unknown file of one module
    ModuleUnknown(Arc<Module>),
    /// The session-wide unknown file
    Unknown,
}

/// Cached file tag; rendering it the first time may copy the source file
/// into the output bundle.
#[derive(Debug)]
pub struct FileEntry {
    pub id: u32,
    kind: FileKind,
    tag: OnceTag,
}

impl FileEntry {
    pub(crate) fn new(id: u32, kind: FileKind) -> Self {
        FileEntry { id, kind, tag: OnceTag::new() }
    }

    /// Note a reference to this file, rendering the tag exactly once.
    ///
    /// With source inclusion enabled and an output directory present, the
    /// first rendering of a real file also copies it under `out/src/...`;
    /// a failed copy is logged and tolerated.
    pub fn mark_used(&self, opts: &EmitOptions) {
        self.tag.render_with(|| match &self.kind {
            FileKind::Unknown => {
                format!("<File i=\"{}\" n=\"&lt;unknown file&gt;\"/>\n", self.id)
            }
            FileKind::ModuleUnknown(m) => format!(
                "<File i=\"{}\" n=\"&lt;unknown file&gt; [{}]\"/>\n",
                self.id,
                escape(&m.basename())
            ),
            FileKind::Real(f) => {
                let name = match (&f.resolved, opts.include_sources) {
                    (Some(resolved), true) => {
                        let rel = Path::new(SOURCE_SUBDIR).join(normalized_relative(resolved));
                        if let Some(dir) = &opts.out_dir {
                            copy_source(resolved, &dir.join(&rel));
                        }
                        format!("./{}", rel.display())
                    }
                    _ => path_string(&f.path),
                };
                format!("<File i=\"{}\" n={}/>\n", self.id, quoted(&name))
            }
        });
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.get()
    }
}

/// Strip the root and resolve `.`/`..` lexically, so an absolute source
/// path can be mirrored under the bundle's src/ subtree.
fn normalized_relative(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in p.components() {
        match comp {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(c) => out.push(c),
        }
    }
    out
}

/// Copy one source file into the bundle; failure is non-fatal
fn copy_source(from: &Path, to: &Path) {
    let attempt = || -> std::io::Result<()> {
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(from, to)?;
        Ok(())
    };
    if let Err(e) = attempt() {
        warn!("could not copy source {} into bundle: {}", from.display(), e);
    }
}

/// Cached load-module tag
#[derive(Debug)]
pub struct ModuleEntry {
    pub id: u32,
    module: Option<Arc<Module>>,
    tag: OnceTag,

    /// Per-module synthetic unknown file, substituted when a scope in this
    /// module lacks a source reference
    pub unknown_file: FileEntry,
}

impl ModuleEntry {
    pub(crate) fn new(module: Arc<Module>, unknown_file_id: u32) -> Self {
        ModuleEntry {
            id: module.id + 1, // id 0 is the synthetic unknown module
            unknown_file: FileEntry::new(unknown_file_id, FileKind::ModuleUnknown(Arc::clone(&module))),
            module: Some(module),
            tag: OnceTag::new(),
        }
    }

    /// The session-wide `<unknown module>` entry, always present
    pub(crate) fn unknown(unknown_file_id: u32) -> Self {
        let e = ModuleEntry {
            id: 0,
            module: None,
            tag: OnceTag::new(),
            unknown_file: FileEntry::new(unknown_file_id, FileKind::Unknown),
        };
        e.tag.render_with(|| "<LoadModule i=\"0\" n=\"unknown module\"/>\n".to_string());
        e
    }

    /// Note a reference to this module, rendering the tag exactly once
    pub fn mark_used(&self) {
        self.tag.render_with(|| match &self.module {
            Some(m) => format!("<LoadModule i=\"{}\" n={}/>\n", self.id, quoted(&path_string(&m.path))),
            None => format!("<LoadModule i=\"{}\" n=\"unknown module\"/>\n", self.id),
        });
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.get()
    }
}

/// The procedure cache: scope-derived key to shared entry, ids handed out
/// in discovery order starting after the two fixed procedures.
#[derive(Debug)]
pub(crate) struct ProcTable {
    inner: Mutex<ProcTableInner>,
}

#[derive(Debug)]
struct ProcTableInner {
    by_key: HashMap<ProcKey, usize>,
    entries: Vec<Arc<ProcEntry>>,
    next_id: u32,
}

impl ProcTable {
    pub(crate) fn new() -> Self {
        ProcTable {
            inner: Mutex::new(ProcTableInner {
                by_key: HashMap::new(),
                entries: Vec::new(),
                next_id: FIRST_PROC_ID,
            }),
        }
    }

    /// Look up or create the entry for `key`. The id is permanent from
    /// this point on, whether or not the entry is ever defined.
    pub(crate) fn get(&self, key: ProcKey) -> Arc<ProcEntry> {
        let mut inner = self.inner.lock().expect("procedure table poisoned");
        if let Some(&idx) = inner.by_key.get(&key) {
            return Arc::clone(&inner.entries[idx]);
        }
        let entry = Arc::new(ProcEntry::new(inner.next_id));
        inner.next_id += 1;
        inner.entries.push(Arc::clone(&entry));
        let idx = inner.entries.len() - 1;
        inner.by_key.insert(key, idx);
        entry
    }

    /// Entries in discovery order, for table emission
    pub(crate) fn entries(&self) -> Vec<Arc<ProcEntry>> {
        self.inner.lock().expect("procedure table poisoned").entries.clone()
    }
}
