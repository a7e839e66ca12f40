//! The calling-context tree.
//!
//! Contexts live in an arena; the parent link is a plain index rather than
//! an owning pointer, since nodes also carry per-node caches that refer
//! back to their owner. Node identifiers double as arena indices: they are
//! assigned exactly once at insertion from a monotonically increasing
//! counter, so the root is always id 0 and every child's id is greater
//! than its parent's. Edges never change after creation; the tree is
//! sealed (immutably borrowed) before serialization.

use super::scope::Scope;

/// Index/identifier of a context node
pub type ContextId = usize;

/// One node of the calling-context tree
#[derive(Debug)]
pub struct ContextNode {
    /// Where this context came from
    pub scope: Scope,

    /// Non-owning back-reference; `None` only for the root
    pub parent: Option<ContextId>,

    /// Children in insertion order
    pub children: Vec<ContextId>,

    /// Per-metric Partial accumulators, indexed `[metric][partial]`.
    /// `None` means no sample has touched the slot yet, which matters for
    /// min/max combination rules.
    pub values: Vec<Vec<Option<f64>>>,
}

/// The tree itself
#[derive(Debug)]
pub struct ContextTree {
    nodes: Vec<ContextNode>,
}

impl ContextTree {
    /// Create a tree holding only the global root (id 0)
    pub fn new() -> Self {
        ContextTree {
            nodes: vec![ContextNode {
                scope: Scope::Global,
                parent: None,
                children: Vec::new(),
                values: Vec::new(),
            }],
        }
    }

    /// The root's id; always 0 by construction
    pub fn root(&self) -> ContextId {
        0
    }

    /// Append a child under `parent`, assigning the next id.
    ///
    /// **Public** - the ingestion side's single entry point. Which worker
    /// owns a given tree slot is resolved upstream; by the time a call
    /// lands here the slot race is already won.
    pub fn add_child(&mut self, parent: ContextId, scope: Scope) -> ContextId {
        let id = self.nodes.len();
        self.nodes.push(ContextNode {
            scope,
            parent: Some(parent),
            children: Vec::new(),
            values: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn node(&self, id: ContextId) -> &ContextNode {
        &self.nodes[id]
    }

    pub(crate) fn node_mut(&mut self, id: ContextId) -> &mut ContextNode {
        &mut self.nodes[id]
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        false // there is always a root
    }

    /// The nearest non-line ancestor of `id`, used by the serializer's
    /// file-consistency check. Line scopes inherit their lexical context
    /// from above, so they are skipped.
    pub fn lexical_parent(&self, id: ContextId) -> Option<ContextId> {
        let mut cur = self.nodes[id].parent?;
        while matches!(self.nodes[cur].scope, Scope::Line { .. }) {
            cur = self.nodes[cur].parent?;
        }
        Some(cur)
    }
}

impl Default for ContextTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::scope::SourceFile;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn file(id: u32) -> Arc<SourceFile> {
        Arc::new(SourceFile { path: PathBuf::from("a.c"), resolved: None, id })
    }

    #[test]
    fn test_root_is_zero() {
        let tree = ContextTree::new();
        assert_eq!(tree.root(), 0);
        assert!(matches!(tree.node(0).scope, Scope::Global));
        assert!(tree.node(0).parent.is_none());
    }

    #[test]
    fn test_ids_increase_from_parent() {
        let mut tree = ContextTree::new();
        let a = tree.add_child(0, Scope::Unknown);
        let b = tree.add_child(a, Scope::Line { file: file(0), line: 10 });
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(tree.node(b).parent, Some(a));
        assert_eq!(tree.node(0).children, vec![a]);
    }

    #[test]
    fn test_lexical_parent_skips_lines() {
        let mut tree = ContextTree::new();
        let u = tree.add_child(0, Scope::Unknown);
        let l1 = tree.add_child(u, Scope::Line { file: file(0), line: 1 });
        let l2 = tree.add_child(l1, Scope::Line { file: file(0), line: 2 });
        assert_eq!(tree.lexical_parent(l2), Some(u));
        assert_eq!(tree.lexical_parent(u), Some(0));
        assert_eq!(tree.lexical_parent(0), None);
    }
}
