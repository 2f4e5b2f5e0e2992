//! Pure AST→AST rewrites (§4.7), each idempotent, applied to a pipeline
//! until none of them changes anything further. The optimizer never
//! introduces a new operator variant and never removes a stage whose
//! removal would change which rows come out.

use std::collections::HashSet;

use crate::ast::expr::{Expr, Logical, LogicalOp};
use crate::ast::stage::{ProjectedField, Sort, Stage};

const MAX_ITERATIONS: usize = 64;

/// Runs every pass to a fixed point and returns the rewritten stage list.
pub fn optimize(mut stages: Vec<Stage>) -> Vec<Stage> {
    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        stages = merge_adjacent_matches(stages, &mut changed);
        stages = merge_adjacent_limits(stages, &mut changed);
        stages = merge_adjacent_skips(stages, &mut changed);
        stages = remove_redundant_sorts(stages, &mut changed);
        stages = match_before_project_pushdown(stages, &mut changed);
        stages = match_before_limit_pushdown(stages, &mut changed);
        stages = sort_limit_fusion(stages, &mut changed);
        if !changed {
            break;
        }
    }
    stages
}

fn and_of(a: Expr, b: Expr) -> Expr {
    Expr::Logical(Logical {
        op: LogicalOp::And,
        children: vec![a, b],
    })
}

fn merge_adjacent_matches(stages: Vec<Stage>, changed: &mut bool) -> Vec<Stage> {
    let mut out: Vec<Stage> = Vec::with_capacity(stages.len());
    for stage in stages {
        if let (Some(Stage::Match(prev)), Stage::Match(curr)) = (out.last(), &stage) {
            let merged = and_of(prev.clone(), curr.clone());
            out.pop();
            out.push(Stage::Match(merged));
            *changed = true;
            tracing::debug!(pass = "merge_adjacent_matches", "merged two adjacent $match stages");
        } else {
            out.push(stage);
        }
    }
    out
}

fn merge_adjacent_limits(stages: Vec<Stage>, changed: &mut bool) -> Vec<Stage> {
    let mut out: Vec<Stage> = Vec::with_capacity(stages.len());
    for stage in stages {
        if let (Some(Stage::Limit(prev)), Stage::Limit(curr)) = (out.last(), &stage) {
            let min = (*prev).min(*curr);
            out.pop();
            out.push(Stage::Limit(min));
            *changed = true;
            tracing::debug!(pass = "merge_adjacent_limits", "merged two adjacent $limit stages");
        } else {
            out.push(stage);
        }
    }
    out
}

fn merge_adjacent_skips(stages: Vec<Stage>, changed: &mut bool) -> Vec<Stage> {
    let mut out: Vec<Stage> = Vec::with_capacity(stages.len());
    for stage in stages {
        if let (Some(Stage::Skip(prev)), Stage::Skip(curr)) = (out.last(), &stage) {
            let sum = prev + curr;
            out.pop();
            out.push(Stage::Skip(sum));
            *changed = true;
            tracing::debug!(pass = "merge_adjacent_skips", "merged two adjacent $skip stages");
        } else {
            out.push(stage);
        }
    }
    out
}

fn remove_redundant_sorts(stages: Vec<Stage>, changed: &mut bool) -> Vec<Stage> {
    let mut out: Vec<Stage> = Vec::with_capacity(stages.len());
    for stage in stages {
        if let (Some(Stage::Sort(_)), Stage::Sort(_)) = (out.last(), &stage) {
            out.pop();
            out.push(stage);
            *changed = true;
            tracing::debug!(pass = "remove_redundant_sorts", "dropped a sort superseded by an adjacent later sort");
        } else {
            out.push(stage);
        }
    }
    out
}

fn collect_referenced_fields(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::FieldPath(fp) => {
            out.insert(fp.segments[0].clone());
        }
        Expr::Exists(e) => {
            out.insert(e.field.segments[0].clone());
        }
        Expr::InList(l) => {
            out.insert(l.field.segments[0].clone());
            for v in &l.values {
                collect_referenced_fields(v, out);
            }
        }
        Expr::Comparison(c) => {
            collect_referenced_fields(&c.left, out);
            match &c.right {
                crate::ast::expr::ComparisonOperand::Single(r) => collect_referenced_fields(r, out),
                crate::ast::expr::ComparisonOperand::List(items) => {
                    for i in items {
                        collect_referenced_fields(i, out);
                    }
                }
            }
        }
        Expr::Logical(l) => {
            for c in &l.children {
                collect_referenced_fields(c, out);
            }
        }
        Expr::Arithmetic(a) => {
            for o in &a.operands {
                collect_referenced_fields(o, out);
            }
        }
        _ => {}
    }
}

/// `$project → $match` becomes `$match → $project` only if every field the
/// match references is still present (and not renamed) in the projection.
fn match_before_project_pushdown(stages: Vec<Stage>, changed: &mut bool) -> Vec<Stage> {
    let mut out: Vec<Stage> = Vec::with_capacity(stages.len());
    for stage in stages {
        if let (Some(Stage::Project(p)), Stage::Match(match_expr)) = (out.last(), &stage) {
            let mut referenced = HashSet::new();
            collect_referenced_fields(match_expr, &mut referenced);
            if projection_preserves_fields(p, &referenced) {
                let project_stage = out.pop().unwrap();
                out.push(stage);
                out.push(project_stage);
                *changed = true;
                tracing::debug!(pass = "match_before_project_pushdown", "pushed a $match ahead of a $project");
                continue;
            }
        }
        out.push(stage);
    }
    out
}

fn projection_preserves_fields(projection: &crate::ast::stage::Projection, referenced: &HashSet<String>) -> bool {
    let is_exclusion = projection
        .fields
        .iter()
        .any(|(_, f)| matches!(f, ProjectedField::Exclude));
    if is_exclusion {
        let excluded: HashSet<&str> = projection
            .fields
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        referenced.iter().all(|f| !excluded.contains(f.as_str()))
    } else {
        let included: HashSet<&str> = projection
            .fields
            .iter()
            .filter(|(_, f)| matches!(f, ProjectedField::Include))
            .map(|(name, _)| name.as_str())
            .collect();
        referenced.iter().all(|f| included.contains(f.as_str()))
    }
}

/// `$limit → $match` becomes `$match → $limit`, pushing filters above
/// row-count gates.
fn match_before_limit_pushdown(stages: Vec<Stage>, changed: &mut bool) -> Vec<Stage> {
    let mut out: Vec<Stage> = Vec::with_capacity(stages.len());
    for stage in stages {
        if let (Some(Stage::Limit(n)), Stage::Match(_)) = (out.last(), &stage) {
            let n = *n;
            out.pop();
            out.push(stage);
            out.push(Stage::Limit(n));
            *changed = true;
            tracing::debug!(pass = "match_before_limit_pushdown", "pushed a $match ahead of a $limit");
            continue;
        }
        out.push(stage);
    }
    out
}

/// Adjacent `$sort → $limit(n)` or `$sort → $skip(s) → $limit(n)` annotates
/// the sort with `limit_hint = s + n`. Not applied across any row-changing
/// stage.
fn sort_limit_fusion(stages: Vec<Stage>, changed: &mut bool) -> Vec<Stage> {
    let mut out = stages;
    for i in 0..out.len() {
        let hint = match &out[i] {
            Stage::Sort(s) if s.limit_hint.is_none() => {
                if let Some(Stage::Limit(n)) = out.get(i + 1) {
                    Some(*n)
                } else if let (Some(Stage::Skip(s_val)), Some(Stage::Limit(n))) =
                    (out.get(i + 1), out.get(i + 2))
                {
                    Some(s_val + n)
                } else {
                    None
                }
            }
            _ => None,
        };
        if let Some(limit_hint) = hint {
            if let Stage::Sort(sort) = &out[i] {
                let updated = Sort {
                    keys: sort.keys.clone(),
                    limit_hint: Some(limit_hint),
                };
                out[i] = Stage::Sort(updated);
                *changed = true;
                tracing::debug!(pass = "sort_limit_fusion", limit_hint, "fused a $sort with a following $limit");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::stage::SortDirection;

    #[test]
    fn merges_adjacent_limits_to_minimum() {
        let stages = vec![Stage::Limit(10), Stage::Limit(5)];
        let out = optimize(stages);
        assert_eq!(out, vec![Stage::Limit(5)]);
    }

    #[test]
    fn merges_adjacent_skips_by_sum() {
        let stages = vec![Stage::Skip(10), Stage::Skip(5)];
        let out = optimize(stages);
        assert_eq!(out, vec![Stage::Skip(15)]);
    }

    #[test]
    fn sort_limit_fusion_sets_hint() {
        let sort = Sort {
            keys: vec![("amount".to_string(), SortDirection::Desc)],
            limit_hint: None,
        };
        let stages = vec![Stage::Sort(sort), Stage::Limit(5)];
        let out = optimize(stages);
        match &out[0] {
            Stage::Sort(s) => assert_eq!(s.limit_hint, Some(5)),
            other => panic!("expected Sort, got {other:?}"),
        }
    }

    #[test]
    fn sort_skip_limit_fusion_sums_hint() {
        let sort = Sort {
            keys: vec![("amount".to_string(), SortDirection::Asc)],
            limit_hint: None,
        };
        let stages = vec![Stage::Sort(sort), Stage::Skip(20), Stage::Limit(10)];
        let out = optimize(stages);
        match &out[0] {
            Stage::Sort(s) => assert_eq!(s.limit_hint, Some(30)),
            other => panic!("expected Sort, got {other:?}"),
        }
    }

    #[test]
    fn optimize_is_idempotent() {
        let stages = vec![Stage::Limit(10), Stage::Limit(5), Stage::Skip(1), Stage::Skip(2)];
        let once = optimize(stages);
        let twice = optimize(once.clone());
        assert_eq!(once, twice);
    }
}
