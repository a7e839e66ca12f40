//! Metric, Partial, and Statistic declarations.
//!
//! A Metric names something that was measured. Its Partials are the raw
//! accumulators fed by the measurement workers; its Statistics are named
//! formulas over those Partials that the analysis viewer recomputes. The
//! declarations here are purely descriptive - the serializer turns them
//! into the packed identifier scheme the viewer binds to.

use crate::utils::config::{MAX_PARTIALS, MAX_STATISTICS};
use crate::utils::error::SessionError;

/// How a Partial's values combine across contexts and threads
///
/// **Public** - declared per Partial, echoed into combine formulas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combination {
    Sum,
    Min,
    Max,
}

impl Combination {
    /// Name used in the emitted combine formula
    pub fn as_str(self) -> &'static str {
        match self {
            Combination::Sum => "sum",
            Combination::Min => "min",
            Combination::Max => "max",
        }
    }

    /// Apply the rule to an accumulator
    pub fn combine(self, acc: f64, value: f64) -> f64 {
        match self {
            Combination::Sum => acc + value,
            Combination::Min => acc.min(value),
            Combination::Max => acc.max(value),
        }
    }
}

/// One raw accumulator feeding a Metric
#[derive(Debug, Clone)]
pub struct Partial {
    /// Combination rule for this accumulator
    pub combinator: Combination,
}

/// One token of a finalize formula: literal text or a reference to one of
/// the owning Metric's Partials by index
#[derive(Debug, Clone)]
pub enum FormulaToken {
    Literal(String),
    Partial(usize),
}

/// A named, formula-derived presentation value
#[derive(Debug, Clone)]
pub struct Statistic {
    /// Suffix appended to the Metric name (e.g. "Sum", "Mean")
    pub suffix: String,

    /// Whether the viewer shows this column without being asked
    pub visible_by_default: bool,

    /// Whether the viewer renders a percent-of-total column
    pub show_percent: bool,

    /// Finalize formula, resolved against the owning Metric's Partials
    pub formula: Vec<FormulaToken>,
}

/// The two views a Metric's values can be presented under
///
/// Execution is the inclusive view (descendants counted), function the
/// exclusive one. A Metric must support at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricScopes {
    pub execution: bool,
    pub function: bool,
}

impl MetricScopes {
    pub const BOTH: MetricScopes = MetricScopes { execution: true, function: true };

    pub fn any(self) -> bool {
        self.execution || self.function
    }
}

/// Per-view context-scope base ids, assigned at registration.
///
/// Both sides are assigned even when a view is unsupported: the packed
/// identifier scheme mirrors unsupported values into the other side's
/// internal region, so the numbering must stay contiguous.
#[derive(Debug, Clone, Copy)]
pub struct ScopeIds {
    pub execution: u32,
    pub function: u32,
}

impl ScopeIds {
    pub fn get(self, execution_view: bool) -> u32 {
        if execution_view {
            self.execution
        } else {
            self.function
        }
    }
}

/// Declarative description of a Metric, before registration
#[derive(Debug, Clone)]
pub struct MetricDef {
    pub name: String,
    pub description: String,
    pub scopes: MetricScopes,
    pub partials: Vec<Partial>,
    pub statistics: Vec<Statistic>,
}

/// A registered Metric with its assigned scope-base ids
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub description: String,
    pub scopes: MetricScopes,
    pub partials: Vec<Partial>,
    pub statistics: Vec<Statistic>,
    pub scope_ids: ScopeIds,
}

impl MetricDef {
    /// Check the structural invariants the identifier packing relies on.
    ///
    /// **Public** - called by the session at registration; a violation is a
    /// fatal configuration error, never retried.
    pub fn validate(&self) -> Result<(), SessionError> {
        if !self.scopes.any() {
            return Err(SessionError::NoApplicableScope(self.name.clone()));
        }
        if self.partials.len() > MAX_PARTIALS {
            return Err(SessionError::TooManyPartials {
                name: self.name.clone(),
                count: self.partials.len(),
            });
        }
        if self.statistics.len() > MAX_STATISTICS {
            return Err(SessionError::TooManyStatistics {
                name: self.name.clone(),
                count: self.statistics.len(),
            });
        }
        for stat in &self.statistics {
            for tok in &stat.formula {
                if let FormulaToken::Partial(idx) = tok {
                    if *idx >= self.partials.len() {
                        return Err(SessionError::InvalidFormula {
                            name: format!("{}:{}", self.name, stat.suffix),
                            partial: *idx,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// One token of an extra-statistic formula: literal text or a reference to
/// a specific Partial of a specific Metric
#[derive(Debug, Clone)]
pub enum ExtraToken {
    Literal(String),
    MetricPartial { metric: usize, partial: usize },
}

/// A formula crossing Metric boundaries, evaluated at serialization time
/// against the live per-metric scope-id table
#[derive(Debug, Clone)]
pub struct ExtraStatistic {
    pub name: String,
    pub description: String,
    pub scopes: MetricScopes,
    pub visible_by_default: bool,
    pub show_percent: bool,

    /// Optional printf-style presentation format
    pub format: Option<String>,

    pub formula: Vec<ExtraToken>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(partials: usize, statistics: usize, scopes: MetricScopes) -> MetricDef {
        MetricDef {
            name: "CYCLES".to_string(),
            description: "cpu cycles".to_string(),
            scopes,
            partials: (0..partials)
                .map(|_| Partial { combinator: Combination::Sum })
                .collect(),
            statistics: (0..statistics)
                .map(|i| Statistic {
                    suffix: format!("S{}", i),
                    visible_by_default: true,
                    show_percent: false,
                    formula: vec![FormulaToken::Partial(0)],
                })
                .collect(),
        }
    }

    #[test]
    fn test_validate_ok_at_limits() {
        assert!(def(64, 64, MetricScopes::BOTH).validate().is_ok());
    }

    #[test]
    fn test_validate_no_scope() {
        let d = def(1, 0, MetricScopes { execution: false, function: false });
        assert!(matches!(d.validate(), Err(SessionError::NoApplicableScope(_))));
    }

    #[test]
    fn test_validate_too_many_partials() {
        let d = def(65, 0, MetricScopes::BOTH);
        assert!(matches!(d.validate(), Err(SessionError::TooManyPartials { count: 65, .. })));
    }

    #[test]
    fn test_validate_too_many_statistics() {
        let d = def(1, 65, MetricScopes::BOTH);
        assert!(matches!(d.validate(), Err(SessionError::TooManyStatistics { count: 65, .. })));
    }

    #[test]
    fn test_validate_formula_out_of_range() {
        let mut d = def(1, 1, MetricScopes::BOTH);
        d.statistics[0].formula = vec![FormulaToken::Partial(3)];
        assert!(matches!(d.validate(), Err(SessionError::InvalidFormula { partial: 3, .. })));
    }

    #[test]
    fn test_combination_rules() {
        assert_eq!(Combination::Sum.combine(2.0, 3.0), 5.0);
        assert_eq!(Combination::Min.combine(2.0, 3.0), 2.0);
        assert_eq!(Combination::Max.combine(2.0, 3.0), 3.0);
        assert_eq!(Combination::Min.as_str(), "min");
    }
}
