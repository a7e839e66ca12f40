//! The profiling session: registries, attributes, and the context tree.
//!
//! One `ProfileSession` owns everything a measurement run produced: the
//! session attributes, the metric and entity registries with their id
//! counters, and the calling-context tree. Counters are scoped to the
//! session and never reused across sessions.

pub mod context;
pub mod metric;
pub mod scope;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::utils::error::SessionError;
use context::{ContextId, ContextTree};
use metric::{ExtraStatistic, ExtraToken, Metric, MetricDef, ScopeIds};
use scope::{Module, SourceFile};

/// Index of a registered metric within the session
pub type MetricId = usize;

/// Session-level attributes carried into the output header
#[derive(Debug)]
pub struct SessionAttributes {
    /// Session name (typically the profiled command line)
    pub name: String,

    /// Identifier-tuple kind names, ordered by kind
    pub id_tuple_names: BTreeMap<u16, String>,
}

/// A complete measurement session
#[derive(Debug)]
pub struct ProfileSession {
    attributes: SessionAttributes,
    metrics: Vec<Metric>,
    extra_statistics: Vec<ExtraStatistic>,
    modules: Vec<Arc<Module>>,
    files: Vec<Arc<SourceFile>>,
    contexts: ContextTree,
    trace_db_tag: Option<String>,
    next_scope_id: u32,
}

impl ProfileSession {
    /// Create an empty session holding only the global root context
    pub fn new(name: impl Into<String>) -> Self {
        ProfileSession {
            attributes: SessionAttributes {
                name: name.into(),
                id_tuple_names: BTreeMap::new(),
            },
            metrics: Vec::new(),
            extra_statistics: Vec::new(),
            modules: Vec::new(),
            files: Vec::new(),
            contexts: ContextTree::new(),
            trace_db_tag: None,
            next_scope_id: 0,
        }
    }

    pub fn attributes(&self) -> &SessionAttributes {
        &self.attributes
    }

    /// Name one identifier-tuple kind (thread rank, node id, ...)
    pub fn add_identifier_name(&mut self, kind: u16, name: impl Into<String>) {
        self.attributes.id_tuple_names.insert(kind, name.into());
    }

    /// Register a load module, assigning its dense id
    pub fn register_module(&mut self, path: PathBuf) -> Arc<Module> {
        let m = Arc::new(Module { path, id: self.modules.len() as u32 });
        self.modules.push(Arc::clone(&m));
        m
    }

    /// Register a source file, assigning its dense id
    pub fn register_file(&mut self, path: PathBuf, resolved: Option<PathBuf>) -> Arc<SourceFile> {
        let f = Arc::new(SourceFile { path, resolved, id: self.files.len() as u32 });
        self.files.push(Arc::clone(&f));
        f
    }

    /// Register a metric.
    ///
    /// Validates the structural invariants (at least one applicable view,
    /// at most 64 partials and 64 statistics) and assigns the metric its
    /// two consecutive scope-base ids. Both ids are assigned even when a
    /// view is unsupported, so the packed numbering stays contiguous.
    ///
    /// # Errors
    /// A violated invariant is a fatal configuration error; the session is
    /// left unchanged.
    pub fn register_metric(&mut self, def: MetricDef) -> Result<MetricId, SessionError> {
        def.validate()?;
        let scope_ids = ScopeIds {
            execution: self.next_scope_id,
            function: self.next_scope_id + 1,
        };
        self.next_scope_id += 2;
        self.metrics.push(Metric {
            name: def.name,
            description: def.description,
            scopes: def.scopes,
            partials: def.partials,
            statistics: def.statistics,
            scope_ids,
        });
        Ok(self.metrics.len() - 1)
    }

    /// Register an extra statistic; its formula is resolved against the
    /// live metric table at serialization time.
    pub fn add_extra_statistic(&mut self, es: ExtraStatistic) -> Result<(), SessionError> {
        if !es.scopes.any() {
            return Err(SessionError::NoApplicableScope(es.name));
        }
        for tok in &es.formula {
            if let ExtraToken::MetricPartial { metric, partial } = tok {
                let m = self
                    .metrics
                    .get(*metric)
                    .ok_or_else(|| SessionError::InvalidFormula {
                        name: es.name.clone(),
                        partial: *partial,
                    })?;
                if *partial >= m.partials.len() {
                    return Err(SessionError::InvalidFormula {
                        name: es.name.clone(),
                        partial: *partial,
                    });
                }
            }
        }
        self.extra_statistics.push(es);
        Ok(())
    }

    /// Consume the pre-rendered summary tag from the trace-database writer
    pub fn set_trace_db_tag(&mut self, tag: String) {
        self.trace_db_tag = Some(tag);
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn extra_statistics(&self) -> &[ExtraStatistic] {
        &self.extra_statistics
    }

    pub fn modules(&self) -> &[Arc<Module>] {
        &self.modules
    }

    pub fn files(&self) -> &[Arc<SourceFile>] {
        &self.files
    }

    pub fn contexts(&self) -> &ContextTree {
        &self.contexts
    }

    pub fn contexts_mut(&mut self) -> &mut ContextTree {
        &mut self.contexts
    }

    pub fn trace_db_tag(&self) -> Option<&str> {
        self.trace_db_tag.as_deref()
    }

    /// Fold one finalized partial value into a context's accumulator,
    /// applying the partial's declared combination rule.
    pub fn accumulate(
        &mut self,
        ctx: ContextId,
        metric: MetricId,
        partial: usize,
        value: f64,
    ) -> Result<(), SessionError> {
        let m = self.metrics.get(metric).ok_or(SessionError::UnknownMetric(metric))?;
        let p = m.partials.get(partial).ok_or_else(|| SessionError::InvalidFormula {
            name: m.name.clone(),
            partial,
        })?;
        let combinator = p.combinator;
        let n_metrics = self.metrics.len();
        let n_partials = m.partials.len();

        let node = self.contexts.node_mut(ctx);
        if node.values.len() < n_metrics {
            node.values.resize(n_metrics, Vec::new());
        }
        let slots = &mut node.values[metric];
        if slots.len() < n_partials {
            slots.resize(n_partials, None);
        }
        slots[partial] = Some(match slots[partial] {
            Some(acc) => combinator.combine(acc, value),
            None => value,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metric::{Combination, MetricScopes, Partial};

    fn time_metric() -> MetricDef {
        MetricDef {
            name: "TIME".to_string(),
            description: "wallclock".to_string(),
            scopes: MetricScopes::BOTH,
            partials: vec![Partial { combinator: Combination::Sum }],
            statistics: vec![],
        }
    }

    #[test]
    fn test_scope_ids_are_consecutive_pairs() {
        let mut s = ProfileSession::new("test");
        let a = s.register_metric(time_metric()).unwrap();
        let b = s.register_metric(time_metric()).unwrap();
        assert_eq!(s.metrics()[a].scope_ids.execution, 0);
        assert_eq!(s.metrics()[a].scope_ids.function, 1);
        assert_eq!(s.metrics()[b].scope_ids.execution, 2);
        assert_eq!(s.metrics()[b].scope_ids.function, 3);
    }

    #[test]
    fn test_invalid_metric_rejected() {
        let mut s = ProfileSession::new("test");
        let mut def = time_metric();
        def.scopes = MetricScopes { execution: false, function: false };
        assert!(s.register_metric(def).is_err());
        assert!(s.metrics().is_empty());
    }

    #[test]
    fn test_accumulate_applies_combination() {
        let mut s = ProfileSession::new("test");
        let m = s.register_metric(time_metric()).unwrap();
        let ctx = s.contexts_mut().add_child(0, scope::Scope::Unknown);
        s.accumulate(ctx, m, 0, 2.5).unwrap();
        s.accumulate(ctx, m, 0, 1.5).unwrap();
        assert_eq!(s.contexts().node(ctx).values[m][0], Some(4.0));
    }

    #[test]
    fn test_accumulate_min_starts_from_first_value() {
        let mut s = ProfileSession::new("test");
        let mut def = time_metric();
        def.partials = vec![Partial { combinator: Combination::Min }];
        let m = s.register_metric(def).unwrap();
        let ctx = s.contexts_mut().add_child(0, scope::Scope::Unknown);
        s.accumulate(ctx, m, 0, 7.0).unwrap();
        s.accumulate(ctx, m, 0, 9.0).unwrap();
        assert_eq!(s.contexts().node(ctx).values[m][0], Some(7.0));
    }
}
