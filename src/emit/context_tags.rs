//! Per-scope tag construction for the context-tree walk.
//!
//! Each context node pre-renders four fragments - open, attribute, close,
//! post-amble - plus the structural flags the walk and its children need.
//! The eight scope kinds each have their own emission policy; where the
//! document structure demands a tag the tree does not have (a frame for a
//! bare line, a call site for an unresolved point), a synthetic wrapper is
//! built around a cached synthetic procedure. The one case with no safe
//! synthesis - an inlined function whose parent cannot bear a call site -
//! aborts the serialization, because inventing a context identifier there
//! would corrupt the metric binding.

use crate::session::context::{ContextId, ContextTree};
use crate::session::scope::{path_string, Scope, SourceFile};
use crate::utils::error::EmitError;

use super::ident::ProcKey;
use super::ExperimentXml;

/// Pre-rendered fragments and flags for one context node
#[derive(Debug, Default)]
pub(crate) struct ContextTags {
    pub open: String,
    pub attr: String,
    pub close: String,
    pub post: String,

    /// Suppress the node entirely when it has no children
    pub only_with_children: bool,

    /// `open` is already a self-closed tag; nothing more to emit for a
    /// childless node
    pub open_is_closed: bool,

    /// The node presents to its children as a call site (its innermost
    /// emitted tag is a call, or behaves like one)
    pub tag_is_call: bool,

    /// The node's emitted frame can bear an inlined call site directly
    pub call_bearing: bool,

    /// A statement sibling precedes following children; its line is the
    /// hint point children pick up
    pub has_sibling_stmt: bool,
    pub sibling_line: u64,
}

/// Does `file` agree with the nearest non-line lexical ancestor's file?
/// Call-site tags carry no file attribute, so a disagreement is worth an
/// inline diagnostic even though the walk continues.
fn is_parent_file(tree: &ContextTree, id: ContextId, file: &SourceFile) -> bool {
    match tree.lexical_parent(id) {
        None => true,
        Some(p) => match tree.node(p).scope.lexical_file() {
            None => true,
            Some(pf) => pf.id == file.id,
        },
    }
}

fn inconsistent_file_comment(file: &SourceFile) -> String {
    format!(
        "<!-- EXMLv4 ERROR: Inconsistent file, following tag is really part of file {} -->\n",
        path_string(&file.path)
    )
}

/// Build the tags for context `id`. The parent's tags must already be
/// built; the arena guarantees parents precede children.
pub(crate) fn build_tags(
    exml: &ExperimentXml<'_>,
    tree: &ContextTree,
    id: ContextId,
    parent: Option<&ContextTags>,
) -> Result<ContextTags, EmitError> {
    let node = tree.node(id);
    let parent_is_call = parent.map_or(false, |p| p.tag_is_call);
    let parent_call_bearing = parent.map_or(false, |p| p.call_bearing);
    let has_uncle_stmt = parent.map_or(false, |p| p.has_sibling_stmt);
    let uncle_line = parent.map_or(0, |p| p.sibling_line);

    match &node.scope {
        Scope::Global => Ok(ContextTags {
            open: "<SecCallPathProfileData".to_string(),
            close: "</SecCallPathProfileData>\n".to_string(),
            // Not actually a call site, but the next tag down is a frame,
            // so it behaves like one.
            tag_is_call: true,
            ..Default::default()
        }),

        Scope::Unknown => {
            // Directly under the root these are broken unwinds; anywhere
            // else they are contexts nothing could classify.
            let under_root =
                node.parent.map_or(false, |p| matches!(tree.node(p).scope, Scope::Global));
            let uproc = if under_root { exml.proc_partial() } else { exml.proc_unknown() };
            let mut open = String::new();
            let mut post = String::new();
            if !parent_is_call {
                open.push_str(&format!(
                    "<C i=\"-{id}\" s=\"{s}\" v=\"0\" l=\"0\" it=\"{id}\">",
                    s = uproc.id
                ));
                post.push_str("</C>\n");
            }
            exml.file_unknown.mark_used(&exml.opts);
            // Left unterminated; the walk closes it.
            open.push_str(&format!(
                "<PF i=\"{id}\" n=\"{s}\" s=\"{s}\" f=\"{f}\" l=\"0\"",
                s = uproc.id,
                f = exml.file_unknown.id
            ));
            Ok(ContextTags {
                open,
                close: "</PF>\n".to_string(),
                post,
                only_with_children: true,
                call_bearing: true,
                ..Default::default()
            })
        }

        Scope::Placeholder(p) => {
            let proc = exml.proc(ProcKey::Placeholder { code: p.code });
            proc.define_placeholder(p);
            let mut open = String::new();
            let mut post = String::new();
            if !parent_is_call {
                open.push_str(&format!(
                    "<C i=\"-{id}\" s=\"{s}\" v=\"0\" l=\"0\" it=\"{id}\">",
                    s = proc.id
                ));
                post.push_str("</C>\n");
            }
            exml.file_unknown.mark_used(&exml.opts);
            open.push_str(&format!(
                "<PF i=\"{id}\" n=\"{s}\" s=\"{s}\" f=\"{f}\" l=\"0\">\n",
                s = proc.id,
                f = exml.file_unknown.id
            ));
            let attr = format!(" i=\"-{id}\" s=\"{s}\" v=\"0\" l=\"0\" it=\"{id}\"", s = proc.id);
            Ok(ContextTags {
                open,
                attr,
                post: format!("</PF>\n{}", post),
                tag_is_call: true,
                ..Default::default()
            })
        }

        Scope::Point { module, offset } => {
            let proc = exml.proc(ProcKey::Point { module: module.id, offset: *offset });
            let mut open = String::new();
            let mut post = String::new();
            if parent_is_call {
                // No lexical context at all; note as <unknown procedure>.
                proc.define(
                    &format!("<unknown procedure> 0x{:x} [{}]", offset, module.basename()),
                    *offset,
                    true,
                );
                let me = exml.module_entry(module);
                me.unknown_file.mark_used(&exml.opts);
                me.mark_used();
                open.push_str(&format!(
                    "<PF i=\"{id}\" n=\"{s}\" s=\"{s}\" l=\"0\" f=\"{f}\" lm=\"{lm}\">\n",
                    s = proc.id,
                    f = me.unknown_file.id,
                    lm = me.id
                ));
                post.push_str("</PF>\n");
            }
            let attr = format!(
                " i=\"{neg}{id}\" s=\"{s}\" l=\"{l}\" v=\"0x{v:x}\" it=\"{id}\"",
                neg = if parent_is_call { "-" } else { "" },
                s = proc.id,
                l = uncle_line,
                v = offset
            );
            Ok(ContextTags {
                open,
                attr,
                post,
                // When a preceding statement already carries our data, the
                // call tag is only needed for children.
                only_with_children: has_uncle_stmt,
                tag_is_call: true,
                ..Default::default()
            })
        }

        Scope::Line { file, line } => {
            let proc = exml.proc(ProcKey::Line { file: file.id, line: *line });
            let mut sibling_line = *line;
            let mut open = String::new();
            let mut post = String::new();
            if parent_is_call {
                // Lines with no lexical context get an <unknown proc> frame.
                let fproc = exml.proc_unknown();
                let fe = exml.file_entry(file);
                fe.mark_used(&exml.opts);
                open.push_str(&format!(
                    "<PF i=\"{id}\" n=\"{s}\" s=\"{s}\" f=\"{f}\" l=\"{l}\" lm=\"{lm}\">\n",
                    s = fproc.id,
                    f = fe.id,
                    l = line,
                    lm = exml.unknown_module.id
                ));
                post.push_str("</PF>\n");
            }
            if !is_parent_file(tree, id, file) {
                open.push_str(&inconsistent_file_comment(file));
                sibling_line = 0; // the line doesn't help in this case
            }
            open.push_str(&format!(
                "<S i=\"{neg}{id}\" it=\"{id}\" l=\"{l}\" s=\"{s}\" v=\"0\"/>\n",
                neg = if parent_is_call { "-" } else { "" },
                l = sibling_line,
                s = proc.id
            ));
            Ok(ContextTags {
                open,
                post,
                open_is_closed: true,
                has_sibling_stmt: true,
                sibling_line,
                ..Default::default()
            })
        }

        Scope::Loop { file, line } => {
            let fe = exml.file_entry(file);
            fe.mark_used(&exml.opts);
            let proc = exml.proc(ProcKey::Loop { file: file.id, line: *line });
            Ok(ContextTags {
                open: format!(
                    "<L i=\"{id}\" s=\"{s}\" v=\"0\" f=\"{f}\" l=\"{l}\"",
                    s = proc.id,
                    f = fe.id,
                    l = line
                ),
                close: "</L>\n".to_string(),
                call_bearing: true,
                ..Default::default()
            })
        }

        Scope::Function(f) => {
            let (fproc, me) = exml.function_entries(f);
            let mut open = String::new();
            let mut post = String::new();
            if !parent_is_call {
                // A frame called from nowhere: fabricate the call site.
                open.push_str(&format!(
                    "<C i=\"-{id}\" it=\"{id}\" s=\"{s}\" v=\"0\" l=\"0\">\n",
                    s = fproc.id
                ));
                post.push_str("</C>\n");
            }
            open.push_str("<PF");
            let udf = match &f.file {
                Some(file) => exml.file_entry(file),
                None => &me.unknown_file,
            };
            udf.mark_used(&exml.opts);
            open.push_str(&format!(
                " i=\"{id}\" s=\"{s}\" n=\"{s}\" v=\"0x{v:x}\" f=\"{f}\" l=\"{l}\" lm=\"{lm}\"",
                s = fproc.id,
                v = f.offset,
                f = udf.id,
                l = f.line,
                lm = me.id
            ));
            Ok(ContextTags {
                open,
                close: "</PF>\n".to_string(),
                post,
                call_bearing: true,
                ..Default::default()
            })
        }

        Scope::InlinedFunction { func: f, call_file, call_line } => {
            if !parent_call_bearing {
                // There is no spare context identifier to hang a synthetic
                // call node on, and inventing one would break the metric
                // binding. Abort the whole serialization.
                let label = if f.name.is_empty() { "<anonymous>" } else { f.name.as_str() };
                return Err(EmitError::InlinedOutsideFrame(label.to_string()));
            }
            let (fproc, me) = exml.function_entries(f);
            let sproc = exml.proc(ProcKey::Inlined {
                module: f.module.id,
                offset: f.offset,
                call_file: call_file.id,
                call_line: *call_line,
            });
            let mut open = String::new();
            if !is_parent_file(tree, id, call_file) {
                open.push_str(&inconsistent_file_comment(call_file));
            }
            let cfe = exml.file_entry(call_file);
            cfe.mark_used(&exml.opts);
            open.push_str(&format!(
                "<C i=\"-{id}\" it=\"{id}\" s=\"{s}\" v=\"0\" l=\"{l}\">\n<PF",
                s = sproc.id,
                l = call_line
            ));
            let udf = match &f.file {
                Some(file) => exml.file_entry(file),
                None => &me.unknown_file,
            };
            udf.mark_used(&exml.opts);
            open.push_str(&format!(
                " i=\"{id}\" s=\"{s}\" n=\"{s}\" v=\"0x{v:x}\" f=\"{f}\" l=\"{l}\" lm=\"{lm}\"",
                s = fproc.id,
                v = f.offset,
                f = udf.id,
                l = f.line,
                lm = me.id
            ));
            Ok(ContextTags {
                open,
                close: "</PF>\n".to_string(),
                post: "</C>\n".to_string(),
                call_bearing: true,
                ..Default::default()
            })
        }
    }
}
