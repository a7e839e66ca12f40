//! The experiment database serializer.
//!
//! `ExperimentXml` takes a sealed session, populates the identity cache,
//! and linearizes the metric tables and the context tree into one nested
//! document. The whole document is rendered in memory first: a fatal
//! structural error must never leave a half-written file behind, because
//! the downstream viewer would read it as a valid (and wrong) profile.
//!
//! Rendering is single-threaded and runs only after the ingest barrier;
//! the cache it fills is nevertheless safe under concurrent first use,
//! since entity references can race during ingestion-side preparation.

pub(crate) mod context_tags;
pub mod ident;
pub mod metric_tags;
pub mod xml;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, info};

use crate::session::context::ContextId;
use crate::session::scope::{path_string, FunctionInfo, Module, Scope, SourceFile};
use crate::session::ProfileSession;
use crate::utils::config::{
    EXPERIMENT_FILENAME, FORMAT_VERSION, PROC_PARTIAL_ID, PROC_UNKNOWN_ID, SYNTH_ID_WELL,
};
use crate::utils::error::EmitError;

use context_tags::{build_tags, ContextTags};
use ident::{FileEntry, FileKind, ModuleEntry, ProcEntry, ProcKey, ProcTable};
use metric_tags::{build_metric_tags, extra_statistic_tags};
use xml::quoted;

/// Where (and whether) the rendered document and source bundle land
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Output directory; `None` is a dry run - every cache is populated
    /// and the full document rendered, but nothing touches the disk
    pub out_dir: Option<PathBuf>,

    /// Mirror referenced source files into `out_dir/src/`
    pub include_sources: bool,
}

/// The serializer plus its identity/userdata cache
pub struct ExperimentXml<'s> {
    session: &'s ProfileSession,
    pub(crate) opts: EmitOptions,

    procs: ProcTable,
    proc_unknown_entry: ProcEntry,
    proc_partial_entry: ProcEntry,

    /// Synthetic `<unknown module>`, id 0; real modules start at 1
    pub(crate) unknown_module: ModuleEntry,

    /// Session-wide unknown file, for scopes with no module either
    pub(crate) file_unknown: FileEntry,

    modules: Vec<ModuleEntry>,
    files: Vec<FileEntry>,

    /// Decreasing id well for dynamically discovered entities; never
    /// collides with the low context ids growing up from 0
    next_synth_id: AtomicU32,
}

impl<'s> ExperimentXml<'s> {
    /// Build the serializer and its (empty) identity cache over a sealed
    /// session
    pub fn new(session: &'s ProfileSession, opts: EmitOptions) -> Self {
        let next_synth_id = AtomicU32::new(SYNTH_ID_WELL);
        let draw = || next_synth_id.fetch_sub(1, Ordering::Relaxed);

        let file_unknown = FileEntry::new(draw(), FileKind::Unknown);
        let unknown_module = ModuleEntry::unknown(draw());
        let modules = session
            .modules()
            .iter()
            .map(|m| ModuleEntry::new(Arc::clone(m), draw()))
            .collect();
        let files = session
            .files()
            .iter()
            .map(|f| FileEntry::new(f.id, FileKind::Real(Arc::clone(f))))
            .collect();

        ExperimentXml {
            session,
            opts,
            procs: ProcTable::new(),
            proc_unknown_entry: ProcEntry::new(PROC_UNKNOWN_ID),
            proc_partial_entry: ProcEntry::new(PROC_PARTIAL_ID),
            unknown_module,
            file_unknown,
            modules,
            files,
            next_synth_id,
        }
    }

    /// The shared procedure entry for a scope-derived key
    pub(crate) fn proc(&self, key: ProcKey) -> Arc<ProcEntry> {
        self.procs.get(key)
    }

    /// The fixed `<unknown>` procedure, defined on first use
    pub(crate) fn proc_unknown(&self) -> &ProcEntry {
        self.proc_unknown_entry.define("<unknown>", 0, true);
        &self.proc_unknown_entry
    }

    /// The fixed `<partial call paths>` procedure, defined on first use
    pub(crate) fn proc_partial(&self) -> &ProcEntry {
        self.proc_partial_entry.define("<partial call paths>", 0, true);
        &self.proc_partial_entry
    }

    pub(crate) fn module_entry(&self, m: &Module) -> &ModuleEntry {
        &self.modules[m.id as usize]
    }

    pub(crate) fn file_entry(&self, f: &SourceFile) -> &FileEntry {
        &self.files[f.id as usize]
    }

    /// Materialize the procedure and module entries for a function
    /// descriptor; anonymous functions get an `<unknown procedure>` label
    pub(crate) fn function_entries(&self, f: &FunctionInfo) -> (Arc<ProcEntry>, &ModuleEntry) {
        let fproc = self.proc(ProcKey::Function {
            module: f.module.id,
            offset: f.offset,
            name: f.name.clone(),
        });
        if f.name.is_empty() {
            fproc.define(
                &format!("<unknown procedure> 0x{:x} [{}]", f.offset, path_string(&f.module.path)),
                f.offset,
                true,
            );
        } else {
            fproc.define(&f.name, f.offset, false);
        }
        let me = self.module_entry(&f.module);
        me.mark_used();
        (fproc, me)
    }

    /// Render the complete document in memory.
    ///
    /// Populates the identity cache (tag preparation, table restriction,
    /// source copies) as a side effect. Rendering an unmutated session
    /// twice yields byte-identical output: every cache entry is finalized
    /// exactly once and replayed afterwards.
    pub fn render(&self) -> Result<String, EmitError> {
        let tree = self.session.contexts();

        // The global context must have id 0 before anything is emitted.
        if tree.root() != 0 || !matches!(tree.node(tree.root()).scope, Scope::Global) {
            return Err(EmitError::RootIdentifier(tree.root()));
        }

        // Tag preparation, parents before children. Structural failures
        // abort here, before a single byte of the document exists.
        let mut ctx_tags: Vec<ContextTags> = Vec::with_capacity(tree.len());
        for id in 0..tree.len() {
            let parent = tree.node(id).parent.map(|p| &ctx_tags[p]);
            let tags = build_tags(self, tree, id, parent)?;
            ctx_tags.push(tags);
        }
        debug!("prepared tags for {} contexts", tree.len());

        let name = &self.session.attributes().name;
        let mut out = String::new();
        out.push_str(&format!(
            "<?xml version=\"1.0\"?>\n\
             <HPCToolkitExperiment version=\"{FORMAT_VERSION}\">\n\
             <Header n={n}>\n<Info/>\n</Header>\n\
             <SecCallPathProfile i=\"0\" n={n}>\n<SecHeader>\n",
            n = quoted(name)
        ));

        out.push_str("<IdentifierNameTable>\n");
        for (kind, kname) in &self.session.attributes().id_tuple_names {
            out.push_str(&format!("<Identifier i=\"{}\" n={}/>\n", kind, quoted(kname)));
        }
        out.push_str("</IdentifierNameTable>\n");

        // MetricTable: from the Metrics, then the ExtraStatistics above
        // every packed id.
        let metric_tags: Vec<_> =
            self.session.metrics().iter().map(build_metric_tags).collect();
        out.push_str("<MetricTable>\n");
        let mut top_id = 0;
        for mt in &metric_tags {
            out.push_str(&mt.tags);
            top_id = top_id.max(mt.max_id);
        }
        for es in self.session.extra_statistics() {
            out.push_str(&extra_statistic_tags(es, self.session.metrics(), &mut top_id));
        }
        out.push_str("</MetricTable>\n");

        out.push_str("<MetricDBTable>\n");
        for mt in &metric_tags {
            out.push_str(&mt.db_tags);
        }
        out.push_str("</MetricDBTable>\n");

        if let Some(tag) = self.session.trace_db_tag() {
            out.push_str("<TraceDBTable>\n");
            out.push_str(tag);
            out.push_str("</TraceDBTable>\n");
        }

        // Flat entity tables, restricted to what the tree actually
        // referenced during preparation.
        out.push_str("<LoadModuleTable>\n");
        if let Some(t) = self.unknown_module.tag() {
            out.push_str(t);
        }
        for me in &self.modules {
            if let Some(t) = me.tag() {
                out.push_str(t);
            }
        }
        out.push_str("</LoadModuleTable>\n<FileTable>\n");
        if let Some(t) = self.file_unknown.tag() {
            out.push_str(t);
        }
        for fe in &self.files {
            if let Some(t) = fe.tag() {
                out.push_str(t);
            }
        }
        for me in &self.modules {
            if let Some(t) = me.unknown_file.tag() {
                out.push_str(t);
            }
        }
        out.push_str("</FileTable>\n<ProcedureTable>\n");
        for pe in self.procs.entries() {
            if let Some(t) = pe.tag() {
                out.push_str(t);
            }
        }
        if let Some(t) = self.proc_unknown_entry.tag() {
            out.push_str(t);
        }
        if let Some(t) = self.proc_partial_entry.tag() {
            out.push_str(t);
        }
        out.push_str("</ProcedureTable>\n<Info/>\n</SecHeader>\n");

        self.walk(&ctx_tags, &mut out);

        out.push_str("</SecCallPathProfile>\n</HPCToolkitExperiment>\n");
        Ok(out)
    }

    /// One ordered depth-first pass over the sealed tree
    fn walk(&self, ctx_tags: &[ContextTags], out: &mut String) {
        enum Visit {
            Pre(ContextId),
            Post(ContextId),
        }
        let tree = self.session.contexts();
        let mut stack = vec![Visit::Pre(tree.root())];
        while let Some(v) = stack.pop() {
            match v {
                Visit::Pre(id) => {
                    stack.push(Visit::Post(id));
                    let node = tree.node(id);
                    for &c in node.children.iter().rev() {
                        stack.push(Visit::Pre(c));
                    }

                    let t = &ctx_tags[id];
                    let leaf = node.children.is_empty();
                    if t.only_with_children && leaf {
                        continue;
                    }
                    out.push_str(&t.open);
                    if t.attr.is_empty() {
                        if t.open.is_empty() || t.open_is_closed {
                            continue;
                        }
                    } else {
                        out.push_str(if leaf { "<S" } else { "<C" });
                        out.push_str(&t.attr);
                    }
                    // Childless nodes use the shortened tag syntax.
                    out.push_str(if leaf { "/>\n" } else { ">\n" });
                }
                Visit::Post(id) => {
                    let t = &ctx_tags[id];
                    if !tree.node(id).children.is_empty() {
                        if !t.attr.is_empty() {
                            out.push_str("</C>\n");
                        }
                        out.push_str(&t.close);
                        if t.only_with_children {
                            out.push_str(&t.post);
                        }
                    }
                    if !t.only_with_children {
                        out.push_str(&t.post);
                    }
                }
            }
        }
    }

    /// Render and, unless this is a dry run, write the document (and the
    /// source bundle) under the output directory.
    ///
    /// # Errors
    /// Structural and output-write failures are fatal; no partial document
    /// is left on disk. Individual source-copy failures are logged and
    /// tolerated.
    pub fn write(&self) -> Result<(), EmitError> {
        let doc = self.render()?;
        match &self.opts.out_dir {
            None => {
                info!("dry run: rendered {} bytes, nothing written", doc.len());
                Ok(())
            }
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let path = dir.join(EXPERIMENT_FILENAME);
                std::fs::write(&path, &doc)?;
                info!("experiment database written to {}", path.display());
                Ok(())
            }
        }
    }

    /// How far the decreasing id well has been drawn down; diagnostic only
    pub fn synthetic_ids_drawn(&self) -> u32 {
        SYNTH_ID_WELL - self.next_synth_id.load(Ordering::Relaxed)
    }
}
