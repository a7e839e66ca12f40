//! Metric table rendering: the packed identifier scheme and recompute
//! formulas the analysis viewer binds to.
//!
//! Every packed id is `(scope_base << 8) | slot`. Slots enumerate the
//! partials in `[0, P)`, an internal mirror region in `[64, 64+P)` used
//! when a view is not natively supported (the value is mirrored from the
//! other view), and the statistics in `[256-S, 256)` with their mirror at
//! `+64`. With P, S <= 64 the regions never collide, and the low tail
//! stays free for future partials. The numbering is a wire contract, not
//! an implementation detail.

use crate::session::metric::{ExtraStatistic, ExtraToken, FormulaToken, Metric, Partial, Statistic};

use super::xml::quoted;

/// Pre-rendered table fragments for one metric
#[derive(Debug)]
pub struct MetricTags {
    /// `<Metric>` rows for the metric table
    pub tags: String,

    /// `<MetricDB>` rows for the metric-database table
    pub db_tags: String,

    /// Upper bound of the packed ids this metric occupies; extra
    /// statistics allocate above the maximum across all metrics
    pub max_id: u32,
}

fn combine_formula(out: &mut String, id: u32, p: &Partial) {
    out.push_str(&format!(
        "<MetricFormula t=\"combine\" frm=\"{}(${}, ${})\"/>\n",
        p.combinator.as_str(),
        id,
        id
    ));
}

fn finalize_formula(out: &mut String, mode: &str, id_base: u32, s: &Statistic) {
    out.push_str(&format!("<MetricFormula t=\"{}\" frm=\"", mode));
    for tok in &s.formula {
        match tok {
            FormulaToken::Partial(idx) => out.push_str(&format!("${}", id_base + *idx as u32)),
            FormulaToken::Literal(text) => out.push_str(text),
        }
    }
    out.push_str("\"/>\n");
}

/// One `<Metric>` row for a view the metric supports
#[allow(clippy::too_many_arguments)]
fn real_row(
    out: &mut String,
    name: &str,
    description: &str,
    id: u32,
    partner: u32,
    view_type: &str,
    show: &str,
    show_percent: &str,
    body: impl FnOnce(&mut String),
) {
    out.push_str(&format!(
        "<Metric i=\"{id}\" o=\"{id}\" n={} md={} v=\"derived-incr\" t=\"{view_type}\" partner=\"{partner}\" show=\"{show}\" show-percent=\"{show_percent}\">\n",
        quoted(name),
        quoted(description),
    ));
    body(out);
    out.push_str("<Info><NV n=\"units\" v=\"events\"/></Info>\n</Metric>\n");
}

/// The hidden placeholder row for a view the metric does not support;
/// keeps the downstream numbering contiguous
fn internal_row(out: &mut String, name: &str, id: u32, partner: u32, view_type: &str) {
    out.push_str(&format!(
        "<Metric i=\"{id}\" o=\"{id}\" n={} v=\"derived-incr\" t=\"{view_type}\" partner=\"{partner}\" show=\"4\" show-percent=\"0\"/>\n",
        quoted(&format!("{} INTERNAL", name)),
    ));
}

/// Render the metric-table and metric-db fragments for one metric
///
/// **Public** - the metric half of the serializer's table emission
pub fn build_metric_tags(m: &Metric) -> MetricTags {
    let ids = m.scope_ids;
    let max_id = (ids.execution.max(ids.function) << 8) + ((1 << 8) - 1);
    let mut tags = String::new();

    // First pass: get all the Partials out there.
    for (idx, partial) in m.partials.iter().enumerate() {
        let name = format!("{}:PARTIAL:{}", m.name, idx);
        let idx = idx as u32;

        let exec_id = if m.scopes.execution {
            (ids.execution << 8) + idx
        } else {
            (ids.function << 8) + 64 + idx
        };
        let func_id = if m.scopes.function {
            (ids.function << 8) + idx
        } else {
            (ids.execution << 8) + 64 + idx
        };

        let mut side = |this: bool, other: bool, id: u32, partner: u32, suffix: &str, ty: &str| {
            if this {
                let n = if other { format!("{}{}", name, suffix) } else { name.clone() };
                real_row(&mut tags, &n, &m.description, id, partner, ty, "4", "0", |out| {
                    combine_formula(out, id, partial)
                });
            } else {
                internal_row(&mut tags, &name, id, partner, ty);
            }
        };
        side(m.scopes.execution, m.scopes.function, exec_id, func_id, " (I)", "inclusive");
        side(m.scopes.function, m.scopes.execution, func_id, exec_id, " (E)", "exclusive");
    }

    // Second pass: handle all the Statistics.
    let s_count = m.statistics.len() as u32;
    for (idx, stat) in m.statistics.iter().enumerate() {
        let name = format!("{}:{}", m.name, stat.suffix);
        let idx = idx as u32;

        let exec_id = if m.scopes.execution {
            (ids.execution << 8) + 256 - s_count + idx
        } else {
            (ids.function << 8) + 256 - s_count + 64 + idx
        };
        let func_id = if m.scopes.function {
            (ids.function << 8) + 256 - s_count + idx
        } else {
            (ids.execution << 8) + 256 - s_count + 64 + idx
        };

        let show = if stat.visible_by_default { "1" } else { "0" };
        let show_percent = if stat.show_percent { "1" } else { "0" };

        let mut side =
            |this: bool, other: bool, id: u32, partner: u32, base: u32, suffix: &str, ty: &str| {
                if this {
                    let n = if other { format!("{}{}", name, suffix) } else { name.clone() };
                    real_row(&mut tags, &n, &m.description, id, partner, ty, show, show_percent, |out| {
                        finalize_formula(out, "view", base, stat)
                    });
                } else {
                    internal_row(&mut tags, &name, id, partner, ty);
                }
            };
        side(
            m.scopes.execution,
            m.scopes.function,
            exec_id,
            func_id,
            ids.execution << 8,
            " (I)",
            "inclusive",
        );
        side(
            m.scopes.function,
            m.scopes.execution,
            func_id,
            exec_id,
            ids.function << 8,
            " (E)",
            "exclusive",
        );
    }

    let mut db_tags = String::new();
    let mut db_side = |this: bool, other: bool, id: u32, suffix: &str| {
        if this {
            let n = if other { format!("{}{}", m.name, suffix) } else { m.name.clone() };
            db_tags.push_str(&format!("<MetricDB i=\"{}\" n={}/>\n", id, quoted(&n)));
        }
    };
    db_side(m.scopes.execution, m.scopes.function, ids.execution, " (I)");
    db_side(m.scopes.function, m.scopes.execution, ids.function, " (E)");

    MetricTags { tags, db_tags, max_id }
}

/// Render the rows for one extra statistic.
///
/// Extra statistics live above every packed metric id: `next_id` starts at
/// the maximum `max_id` across metrics and is bumped once per view.
/// Partial references resolve against the live scope-id table of the
/// metric they name, so formulas may cross metric boundaries freely.
pub fn extra_statistic_tags(es: &ExtraStatistic, metrics: &[Metric], next_id: &mut u32) -> String {
    let mut out = String::new();

    *next_id += 1;
    let exec_id = *next_id;
    *next_id += 1;
    let func_id = *next_id;

    let mut side = |this: bool, other: bool, id: u32, partner: u32, execution_view: bool, suffix: &str, ty: &str| {
        if this {
            let n = if other { format!("{}{}", es.name, suffix) } else { es.name.clone() };
            out.push_str(&format!(
                "<Metric i=\"{id}\" o=\"{id}\" n={} md={} v=\"derived-incr\" t=\"{ty}\" partner=\"{partner}\" show=\"{}\" show-percent=\"{}\" ",
                quoted(&n),
                quoted(&es.description),
                if es.visible_by_default { "1" } else { "0" },
                if es.show_percent { "1" } else { "0" },
            ));
            if let Some(fmt) = &es.format {
                out.push_str(&format!("fmt={} ", quoted(fmt)));
            }
            out.push_str(">\n<MetricFormula t=\"view\" frm=\"");
            for tok in &es.formula {
                match tok {
                    ExtraToken::Literal(text) => out.push_str(text),
                    ExtraToken::MetricPartial { metric, partial } => {
                        let base = metrics[*metric].scope_ids.get(execution_view);
                        out.push_str(&format!("${}", (base << 8) + *partial as u32));
                    }
                }
            }
            out.push_str("\"/>\n<Info><NV n=\"units\" v=\"events\"/></Info>\n</Metric>\n");
        } else {
            internal_row(&mut out, &es.name, id, partner, ty);
        }
    };
    side(es.scopes.execution, es.scopes.function, exec_id, func_id, true, " (I)", "inclusive");
    side(es.scopes.function, es.scopes.execution, func_id, exec_id, false, " (E)", "exclusive");

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::metric::{Combination, MetricScopes, ScopeIds};
    use std::collections::HashSet;

    fn metric(partials: usize, statistics: usize, scopes: MetricScopes) -> Metric {
        Metric {
            name: "M".to_string(),
            description: "d".to_string(),
            scopes,
            partials: (0..partials)
                .map(|_| Partial { combinator: Combination::Sum })
                .collect(),
            statistics: (0..statistics)
                .map(|i| Statistic {
                    suffix: format!("S{}", i),
                    visible_by_default: false,
                    show_percent: true,
                    formula: vec![
                        FormulaToken::Literal("2 * ".to_string()),
                        FormulaToken::Partial(0),
                    ],
                })
                .collect(),
            scope_ids: ScopeIds { execution: 4, function: 5 },
        }
    }

    /// Collect every `i="..."` id appearing in a fragment
    fn ids_of(tags: &str) -> Vec<u32> {
        tags.lines()
            .filter(|l| l.starts_with("<Metric "))
            .map(|l| {
                let rest = &l[l.find("i=\"").unwrap() + 3..];
                rest[..rest.find('"').unwrap()].parse().unwrap()
            })
            .collect()
    }

    #[test]
    fn test_packed_ids_pairwise_disjoint_at_limit() {
        let m = metric(64, 64, MetricScopes::BOTH);
        let t = build_metric_tags(&m);
        let ids = ids_of(&t.tags);
        assert_eq!(ids.len(), 2 * 64 + 2 * 64);
        let set: HashSet<u32> = ids.iter().copied().collect();
        assert_eq!(set.len(), ids.len(), "packed ids must not collide");
        assert!(ids.iter().all(|&i| i <= t.max_id));
    }

    #[test]
    fn test_single_scope_mirrors_into_internal_region() {
        let m = metric(2, 1, MetricScopes { execution: true, function: false });
        let t = build_metric_tags(&m);
        // Partial 0: execution at base slot 0, function mirrored at 64.
        assert!(t.tags.contains("i=\"1024\""), "execution partial 0 at (4<<8)+0");
        assert!(t.tags.contains("i=\"1088\""), "mirror partial 0 at (4<<8)+64");
        assert!(t.tags.contains("n=\"M:PARTIAL:0 INTERNAL\""));
        // Statistic mirrors land at 256-S+64 above the execution base.
        assert!(t.tags.contains(&format!("i=\"{}\"", (4 << 8) + 255)));
        assert!(t.tags.contains(&format!("i=\"{}\"", (4 << 8) + 255 + 64)));
    }

    #[test]
    fn test_combine_formula_echoes_rule() {
        let mut m = metric(1, 0, MetricScopes::BOTH);
        m.partials[0].combinator = Combination::Max;
        let t = build_metric_tags(&m);
        assert!(t.tags.contains("frm=\"max($1024, $1024)\""));
        assert!(t.tags.contains("frm=\"max($1280, $1280)\""), "function side at (5<<8)");
    }

    #[test]
    fn test_partial_rows_suffixed_when_both_views() {
        let m = metric(1, 0, MetricScopes::BOTH);
        let t = build_metric_tags(&m);
        assert!(t.tags.contains("n=\"M:PARTIAL:0 (I)\""));
        assert!(t.tags.contains("n=\"M:PARTIAL:0 (E)\""));
        assert!(!t.tags.contains("INTERNAL"));
    }

    #[test]
    fn test_statistic_formula_offsets_against_scope_base() {
        let m = metric(1, 1, MetricScopes::BOTH);
        let t = build_metric_tags(&m);
        assert!(t.tags.contains("frm=\"2 * $1024\""), "inclusive side resolves against 4<<8");
        assert!(t.tags.contains("frm=\"2 * $1280\""), "exclusive side resolves against 5<<8");
    }

    #[test]
    fn test_metric_db_rows() {
        let m = metric(1, 0, MetricScopes::BOTH);
        let t = build_metric_tags(&m);
        assert!(t.db_tags.contains("<MetricDB i=\"4\" n=\"M (I)\"/>"));
        assert!(t.db_tags.contains("<MetricDB i=\"5\" n=\"M (E)\"/>"));

        let m = metric(1, 0, MetricScopes { execution: true, function: false });
        let t = build_metric_tags(&m);
        assert!(t.db_tags.contains("<MetricDB i=\"4\" n=\"M\"/>"));
        assert!(!t.db_tags.contains("i=\"5\""));
    }

    #[test]
    fn test_extra_statistic_allocates_above_metrics() {
        let m = metric(1, 0, MetricScopes::BOTH);
        let t = build_metric_tags(&m);
        let es = ExtraStatistic {
            name: "RATE".to_string(),
            description: "per-cycle".to_string(),
            scopes: MetricScopes::BOTH,
            visible_by_default: true,
            show_percent: false,
            format: Some("%.2f".to_string()),
            formula: vec![
                ExtraToken::Literal("100 * ".to_string()),
                ExtraToken::MetricPartial { metric: 0, partial: 0 },
            ],
        };
        let mut next_id = t.max_id;
        let tags = extra_statistic_tags(&es, std::slice::from_ref(&m), &mut next_id);
        assert_eq!(next_id, t.max_id + 2);
        assert!(tags.contains(&format!("i=\"{}\"", t.max_id + 1)));
        assert!(tags.contains(&format!("i=\"{}\"", t.max_id + 2)));
        // References resolve against the owning metric's live base per view.
        assert!(tags.contains("frm=\"100 * $1024\""));
        assert!(tags.contains("frm=\"100 * $1280\""));
        assert!(tags.contains("fmt=\"%.2f\""));
    }
}
