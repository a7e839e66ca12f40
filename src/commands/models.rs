//! Session-description input schema.
//!
//! The profiling front end hands over its facts (modules, files,
//! functions, metric declarations, the context tree) as one JSON
//! document; this module defines that schema and converts it into a
//! `ProfileSession`. Cross-references are plain indices into the sibling
//! arrays, validated during conversion.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::session::context::ContextId;
use crate::session::metric::{
    Combination, ExtraStatistic, ExtraToken, FormulaToken, MetricDef, MetricScopes, Partial,
    Statistic,
};
use crate::session::scope::{FunctionInfo, Module, Placeholder, Scope, SourceFile};
use crate::session::ProfileSession;
use crate::utils::error::InputError;

/// Top-level session description
#[derive(Debug, Deserialize)]
pub struct SessionSpec {
    /// Session name, typically the profiled command line
    pub name: String,

    #[serde(default)]
    pub identifier_names: Vec<IdentifierNameSpec>,

    #[serde(default)]
    pub modules: Vec<ModuleSpec>,

    #[serde(default)]
    pub files: Vec<FileSpec>,

    #[serde(default)]
    pub functions: Vec<FunctionSpec>,

    #[serde(default)]
    pub metrics: Vec<MetricSpec>,

    #[serde(default)]
    pub extra_statistics: Vec<ExtraStatisticSpec>,

    /// Pre-rendered summary tag from the trace-database writer, if any
    #[serde(default)]
    pub trace_db: Option<String>,

    /// Children of the implicit global root
    #[serde(default)]
    pub contexts: Vec<ContextSpec>,
}

/// One identifier-tuple kind name
#[derive(Debug, Deserialize)]
pub struct IdentifierNameSpec {
    pub kind: u16,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ModuleSpec {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct FileSpec {
    pub path: PathBuf,

    /// Where the file was actually found on this machine, for source
    /// inclusion
    #[serde(default)]
    pub resolved: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct FunctionSpec {
    /// Demangled name; empty means anonymous
    #[serde(default)]
    pub name: String,

    /// Index into `modules`
    pub module: usize,

    pub offset: u64,

    /// Index into `files`, when the defining file is known
    #[serde(default)]
    pub file: Option<usize>,

    #[serde(default)]
    pub line: u64,
}

/// Which views a metric (or extra statistic) supports
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScopesSpec {
    #[serde(default = "default_true")]
    pub execution: bool,

    #[serde(default = "default_true")]
    pub function: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ScopesSpec {
    fn default() -> Self {
        ScopesSpec { execution: true, function: true }
    }
}

impl From<ScopesSpec> for MetricScopes {
    fn from(s: ScopesSpec) -> MetricScopes {
        MetricScopes { execution: s.execution, function: s.function }
    }
}

#[derive(Debug, Deserialize)]
pub struct MetricSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub scopes: ScopesSpec,

    pub partials: Vec<PartialSpec>,

    #[serde(default)]
    pub statistics: Vec<StatisticSpec>,
}

#[derive(Debug, Deserialize)]
pub struct PartialSpec {
    /// Combination rule: "sum", "min", or "max"
    pub combine: String,
}

#[derive(Debug, Deserialize)]
pub struct StatisticSpec {
    pub suffix: String,

    #[serde(default = "default_true")]
    pub visible: bool,

    #[serde(default)]
    pub percent: bool,

    pub formula: Vec<TokenSpec>,
}

/// Formula token: `{"partial": 0}` or `{"lit": " / "}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TokenSpec {
    Partial { partial: usize },
    Literal { lit: String },
}

#[derive(Debug, Deserialize)]
pub struct ExtraStatisticSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub scopes: ScopesSpec,

    #[serde(default = "default_true")]
    pub visible: bool,

    #[serde(default)]
    pub percent: bool,

    #[serde(default)]
    pub format: Option<String>,

    pub formula: Vec<ExtraTokenSpec>,
}

/// Cross-metric formula token: `{"metric": 0, "partial": 1}` or `{"lit": ...}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ExtraTokenSpec {
    Reference { metric: usize, partial: usize },
    Literal { lit: String },
}

/// One context node; the scope kind is the `kind` field
#[derive(Debug, Deserialize)]
pub struct ContextSpec {
    #[serde(flatten)]
    pub scope: ScopeSpec,

    #[serde(default)]
    pub children: Vec<ContextSpec>,

    /// Finalized partial values attached to this context
    #[serde(default)]
    pub values: Vec<ValueSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScopeSpec {
    Unknown,
    Placeholder {
        code: u64,
        #[serde(default)]
        pretty: Option<String>,
        #[serde(default)]
        fallback: String,
    },
    Point { module: usize, offset: u64 },
    Line { file: usize, line: u64 },
    Loop { file: usize, line: u64 },
    Function { function: usize },
    InlinedFunction { function: usize, call_file: usize, call_line: u64 },
}

#[derive(Debug, Deserialize)]
pub struct ValueSpec {
    pub metric: usize,
    pub partial: usize,
    pub value: f64,
}

fn lookup<T: Clone>(items: &[T], index: usize, kind: &'static str) -> Result<T, InputError> {
    items.get(index).cloned().ok_or(InputError::BadReference { kind, index })
}

fn parse_combination(s: &str) -> Result<Combination, InputError> {
    match s {
        "sum" => Ok(Combination::Sum),
        "min" => Ok(Combination::Min),
        "max" => Ok(Combination::Max),
        other => Err(InputError::BadCombination(other.to_string())),
    }
}

/// Convert a parsed description into a live session.
///
/// **Public** - the bridge between the JSON front door and the model
pub fn build_session(spec: SessionSpec) -> Result<ProfileSession, InputError> {
    let mut session = ProfileSession::new(spec.name);

    for ident in spec.identifier_names {
        session.add_identifier_name(ident.kind, ident.name);
    }

    let modules: Vec<Arc<Module>> =
        spec.modules.into_iter().map(|m| session.register_module(m.path)).collect();
    let files: Vec<Arc<SourceFile>> = spec
        .files
        .into_iter()
        .map(|f| session.register_file(f.path, f.resolved))
        .collect();

    let mut functions = Vec::with_capacity(spec.functions.len());
    for f in spec.functions {
        let module = lookup(&modules, f.module, "module")?;
        let file = match f.file {
            Some(idx) => Some(lookup(&files, idx, "file")?),
            None => None,
        };
        functions.push(Arc::new(FunctionInfo {
            name: f.name,
            module,
            offset: f.offset,
            file,
            line: f.line,
        }));
    }

    for m in spec.metrics {
        let partials = m
            .partials
            .iter()
            .map(|p| Ok(Partial { combinator: parse_combination(&p.combine)? }))
            .collect::<Result<Vec<_>, InputError>>()?;
        let statistics = m
            .statistics
            .into_iter()
            .map(|s| Statistic {
                suffix: s.suffix,
                visible_by_default: s.visible,
                show_percent: s.percent,
                formula: s
                    .formula
                    .into_iter()
                    .map(|t| match t {
                        TokenSpec::Partial { partial } => FormulaToken::Partial(partial),
                        TokenSpec::Literal { lit } => FormulaToken::Literal(lit),
                    })
                    .collect(),
            })
            .collect();
        session.register_metric(MetricDef {
            name: m.name,
            description: m.description,
            scopes: m.scopes.into(),
            partials,
            statistics,
        })?;
    }

    for es in spec.extra_statistics {
        session.add_extra_statistic(ExtraStatistic {
            name: es.name,
            description: es.description,
            scopes: es.scopes.into(),
            visible_by_default: es.visible,
            show_percent: es.percent,
            format: es.format,
            formula: es
                .formula
                .into_iter()
                .map(|t| match t {
                    ExtraTokenSpec::Reference { metric, partial } => {
                        ExtraToken::MetricPartial { metric, partial }
                    }
                    ExtraTokenSpec::Literal { lit } => ExtraToken::Literal(lit),
                })
                .collect(),
        })?;
    }

    if let Some(tag) = spec.trace_db {
        session.set_trace_db_tag(tag);
    }

    let root = session.contexts().root();
    for child in spec.contexts {
        add_context(&mut session, &modules, &files, &functions, root, child)?;
    }

    Ok(session)
}

fn add_context(
    session: &mut ProfileSession,
    modules: &[Arc<Module>],
    files: &[Arc<SourceFile>],
    functions: &[Arc<FunctionInfo>],
    parent: ContextId,
    spec: ContextSpec,
) -> Result<(), InputError> {
    let scope = match spec.scope {
        ScopeSpec::Unknown => Scope::Unknown,
        ScopeSpec::Placeholder { code, pretty, fallback } => {
            Scope::Placeholder(Arc::new(Placeholder { code, pretty, fallback }))
        }
        ScopeSpec::Point { module, offset } => {
            Scope::Point { module: lookup(modules, module, "module")?, offset }
        }
        ScopeSpec::Line { file, line } => {
            Scope::Line { file: lookup(files, file, "file")?, line }
        }
        ScopeSpec::Loop { file, line } => {
            Scope::Loop { file: lookup(files, file, "file")?, line }
        }
        ScopeSpec::Function { function } => {
            Scope::Function(lookup(functions, function, "function")?)
        }
        ScopeSpec::InlinedFunction { function, call_file, call_line } => Scope::InlinedFunction {
            func: lookup(functions, function, "function")?,
            call_file: lookup(files, call_file, "file")?,
            call_line,
        },
    };

    let id = session.contexts_mut().add_child(parent, scope);
    for v in spec.values {
        session.accumulate(id, v.metric, v.partial, v.value)?;
    }
    for child in spec.children {
        add_context(session, modules, files, functions, id, child)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_session_round_trip() {
        let json = r#"{
            "name": "demo",
            "modules": [{"path": "/bin/demo"}],
            "files": [{"path": "a.c"}],
            "functions": [{"name": "foo", "module": 0, "offset": 64, "file": 0, "line": 10}],
            "metrics": [{
                "name": "TIME",
                "partials": [{"combine": "sum"}],
                "statistics": [{"suffix": "Sum", "formula": [{"partial": 0}]}]
            }],
            "contexts": [{
                "kind": "function", "function": 0,
                "children": [{"kind": "line", "file": 0, "line": 42,
                              "values": [{"metric": 0, "partial": 0, "value": 1.5}]}]
            }]
        }"#;
        let spec: SessionSpec = serde_json::from_str(json).unwrap();
        let session = build_session(spec).unwrap();
        assert_eq!(session.contexts().len(), 3);
        assert_eq!(session.metrics().len(), 1);
        assert_eq!(session.contexts().node(2).values[0][0], Some(1.5));
    }

    #[test]
    fn test_bad_reference_is_reported() {
        let json = r#"{
            "name": "demo",
            "contexts": [{"kind": "point", "module": 3, "offset": 16}]
        }"#;
        let spec: SessionSpec = serde_json::from_str(json).unwrap();
        let err = build_session(spec).unwrap_err();
        assert!(matches!(err, InputError::BadReference { kind: "module", index: 3 }));
    }

    #[test]
    fn test_bad_combination_is_reported() {
        let json = r#"{
            "name": "demo",
            "metrics": [{"name": "M", "partials": [{"combine": "avg"}]}]
        }"#;
        let spec: SessionSpec = serde_json::from_str(json).unwrap();
        assert!(matches!(build_session(spec), Err(InputError::BadCombination(_))));
    }
}
