//! The Pipeline Composer (§4.6): walks the (already optimized) stage list
//! once, accumulating `WHERE`/`JOIN`/`GROUP BY`/`ORDER BY` fragments from the
//! "inline" stages (`Match`, `Lookup`, `Unwind`, `AddFields`, `Project`,
//! `Group`, `Sort`, `Skip`, `Limit` — later one of a repeated kind wins) and
//! finalizing them into one `SELECT`. A handful of stages don't fit inside
//! that single statement — `$unionWith`, `$out`, and `$facet` each need a
//! derived table or a standalone statement of their own — those act as
//! pivots: whatever was accumulated so far is finalized and wrapped, then
//! composition continues from the new base they produce.

use crate::ast::expr::{Expr, Logical, LogicalOp};
use crate::ast::stage::{
    Bucket, BucketAuto, GraphLookup, Group, Lookup, Pipeline, Projection, SetWindowFields, Sort,
    Stage, Unwind,
};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::render::expr::render_expr;
use crate::render::stage::{
    render_bucket, render_bucket_auto, render_group, render_lookup_join, render_match_filter,
    render_projection_list, render_sort_items, render_unwind_join, render_window_outputs,
};

/// One accumulated "run" of inline stages, ready to finalize into a SELECT.
#[derive(Default)]
struct PendingRun {
    matches: Vec<Expr>,
    lookups: Vec<Lookup>,
    unwinds: Vec<Unwind>,
    extra_joins: Vec<String>,
    addfields: Vec<(String, Expr)>,
    project: Option<Projection>,
    group: Option<Group>,
    bucket: Option<Bucket>,
    bucket_auto: Option<BucketAuto>,
    set_window_fields: Option<SetWindowFields>,
    replace_root: Option<Expr>,
    redact: Option<Expr>,
    count_field: Option<String>,
    sort: Option<Sort>,
    skip: Option<i64>,
    limit: Option<i64>,
    sample: Option<i64>,
}

impl PendingRun {
    fn has_select_shape_conflict(&self) -> bool {
        [
            self.group.is_some(),
            self.bucket.is_some(),
            self.bucket_auto.is_some(),
            self.replace_root.is_some(),
            self.count_field.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count()
            > 1
    }
}

/// Composes a whole translated pipeline into one SQL statement.
pub fn compose(pipeline: &Pipeline, ctx: &mut Context) -> Result<String> {
    Ok(compose_inner(pipeline, ctx)?.0)
}

/// Same as [`compose`], but also returns the output column aliases in
/// order — needed by `$facet`, whose branches each contribute one named
/// column to the combined row.
fn compose_inner(pipeline: &Pipeline, ctx: &mut Context) -> Result<(String, Vec<String>)> {
    // `compose_inner` recurses (`$unionWith`'s right side, `$facet`'s
    // branches) on the same `ctx`; start each invocation alias-free so a
    // sibling run's base alias never leaks into this one.
    ctx.clear_base_table_alias();
    let data_column = ctx.data_column.clone();

    let mut from_sql = pipeline.source_collection.clone();
    let mut run = PendingRun::default();

    for stage in &pipeline.stages {
        match stage {
            Stage::Match(e) => run.matches.push(e.clone()),
            Stage::Lookup(l) => {
                if l.local_field.is_some() && l.foreign_field.is_some() {
                    ctx.register_lookup(
                        l.as_name.clone(),
                        l.from.clone(),
                        l.local_field.clone().unwrap(),
                        l.foreign_field.clone().unwrap(),
                    );
                }
                run.lookups.push(l.clone());
            }
            Stage::Unwind(u) => run.unwinds.push(u.clone()),
            Stage::AddFields(fields) => run.addfields.extend(fields.clone()),
            Stage::Project(p) => run.project = Some(p.clone()),
            Stage::Group(g) => run.group = Some(g.clone()),
            Stage::Bucket(b) => run.bucket = Some(b.clone()),
            Stage::BucketAuto(b) => run.bucket_auto = Some(b.clone()),
            Stage::SetWindowFields(s) => run.set_window_fields = Some(s.clone()),
            Stage::ReplaceRoot(e) => run.replace_root = Some(e.clone()),
            Stage::Redact(e) => run.redact = Some(e.clone()),
            Stage::Count(field) => run.count_field = Some(field.clone()),
            Stage::Sort(s) => run.sort = Some(s.clone()),
            Stage::Skip(n) => run.skip = Some(*n),
            Stage::Limit(n) => run.limit = Some(*n),
            Stage::Sample(n) => run.sample = Some(*n),
            Stage::GraphLookup(gl) => {
                // A graph lookup always joins an extra table, so the run needs
                // a base alias from here on; assign it now (rather than
                // waiting for `finalize_select`) since the join condition
                // below renders base-document field references immediately.
                if ctx.base_table_alias().is_none() {
                    let alias = ctx.generate_table_alias("base");
                    ctx.set_base_table_alias(alias);
                }
                let (join, warning) = render_graph_lookup_join(ctx, gl, &data_column)?;
                if let Some((code, msg)) = warning {
                    ctx.push_warning(code, msg);
                }
                run.extra_joins.push(join);
            }
            Stage::UnionWith(u) => {
                let (left_sql, _) = finalize_select(ctx, &run, &from_sql, &data_column)?;
                let right_sql = compose_sub_pipeline(ctx, &u.collection, &u.pipeline)?;
                from_sql = format!("(({left_sql}) UNION ALL ({right_sql}))");
                run = PendingRun::default();
            }
            Stage::Facet(branches) => {
                return render_facet(ctx, branches, &from_sql);
            }
            Stage::Out(out) => {
                let (inner_sql, aliases) = finalize_select(ctx, &run, &from_sql, &data_column)?;
                let table = crate::validator::validate_table_name(&out.collection)?;
                let qualified = match &out.schema {
                    Some(schema) => format!("{}.{table}", crate::validator::validate_table_name(schema)?),
                    None => table,
                };
                let columns = aliases
                    .iter()
                    .map(|a| format!("\"{a}\""))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Ok((
                    format!("INSERT INTO {qualified} ({columns})\nSELECT {columns} FROM ({inner_sql})"),
                    aliases,
                ));
            }
        }
    }

    finalize_select(ctx, &run, &from_sql, &data_column)
}

/// Builds the final `SELECT ... FROM ... WHERE ... GROUP BY ... ORDER BY ...`
/// for one accumulated run, plus the output column aliases it produced.
///
/// A base table alias is only introduced when this run actually joins
/// something in (a lookup, an unwind, or a graph-lookup join) — an alias-free
/// run renders the bare `FROM qualified_table` / `data` form the spec
/// requires for a join-free pipeline (§4.6).
fn finalize_select(
    ctx: &mut Context,
    run: &PendingRun,
    from_sql: &str,
    data_column: &str,
) -> Result<(String, Vec<String>)> {
    if run.has_select_shape_conflict() {
        return Err(Error::integrity(
            "more than one of $group/$bucket/$bucketAuto/$replaceRoot/$count present in the same run",
        ));
    }

    let needs_base_alias = !run.lookups.is_empty() || !run.unwinds.is_empty() || !run.extra_joins.is_empty();
    let base_alias = if needs_base_alias {
        // A graph-lookup join (if any) already assigned the alias mid-loop,
        // since its join condition had to be rendered before this point;
        // reuse it so the FROM clause and join text agree on one alias.
        let alias = match ctx.base_table_alias() {
            Some(existing) => existing.to_string(),
            None => {
                let generated = ctx.generate_table_alias("base");
                ctx.set_base_table_alias(generated.clone());
                generated
            }
        };
        Some(alias)
    } else {
        ctx.clear_base_table_alias();
        None
    };

    let mut from_items = vec![match &base_alias {
        Some(alias) => format!("{from_sql} {alias}"),
        None => from_sql.to_string(),
    }];
    if let Some(alias) = base_alias.as_deref() {
        for lookup in &run.lookups {
            if let Some(join) = render_lookup_join(ctx, lookup, alias, data_column)? {
                from_items.push(join);
            }
        }
    }
    from_items.extend(run.extra_joins.iter().cloned());
    if let Some(alias) = base_alias.as_deref() {
        for unwind in &run.unwinds {
            from_items.push(render_unwind_join(ctx, unwind, alias, data_column)?);
        }
    }
    let from_clause = from_items.join(", ");

    let where_clause = if run.matches.is_empty() {
        None
    } else {
        let combined = if run.matches.len() == 1 {
            run.matches[0].clone()
        } else {
            Expr::Logical(Logical {
                op: LogicalOp::And,
                children: run.matches.clone(),
            })
        };
        Some(render_match_filter(ctx, &combined)?)
    };

    let data_ref = ctx.data_column_ref();

    if let Some(bucket_auto) = &run.bucket_auto {
        return finalize_bucket_auto(ctx, run, bucket_auto, &from_clause, where_clause.as_deref(), &data_ref);
    }

    let (select_list, group_by): (String, Option<String>) = if let Some(field) = &run.count_field {
        (format!("COUNT(*) AS \"{field}\""), None)
    } else if let Some(group) = &run.group {
        render_group(ctx, group)?
    } else if let Some(bucket) = &run.bucket {
        let (items, case_sql) = render_bucket(ctx, bucket, data_column)?;
        (items, Some(case_sql))
    } else if let Some(root) = &run.replace_root {
        let mut nested = ctx.create_nested_context();
        render_expr(&mut nested, root)?;
        (format!("{} AS \"{data_column}\"", nested.to_sql()), None)
    } else if let Some(redact_expr) = &run.redact {
        ctx.push_warning(
            "redact.row_level_predicate_only",
            "$redact is emulated as a row-keep/row-drop WHERE predicate; field-level redaction within a surviving document is not applied",
        );
        let mut nested = ctx.create_nested_context();
        render_expr(&mut nested, redact_expr)?;
        let predicate = nested.to_sql();
        let combined_where = match &where_clause {
            Some(w) => format!("({w}) AND ({predicate} = 'KEEP')"),
            None => format!("{predicate} = 'KEEP'"),
        };
        let select_list = format!("{data_ref} AS \"{data_column}\"");
        let sql = finalize_select_tail(ctx, run, &from_clause, Some(combined_where), &select_list, None, &data_ref)?;
        return Ok((sql, extract_aliases(&select_list)));
    } else if let Some(swf) = &run.set_window_fields {
        let mut items = vec![format!("{data_ref} AS \"{data_column}\"")];
        items.extend(render_window_outputs(
            ctx,
            swf.partition_by.as_ref(),
            &swf.sort_by,
            &swf.output,
            &data_ref,
        )?);
        (items.join(", "), None)
    } else {
        (
            render_projection_list(ctx, run.project.as_ref(), &run.addfields, &data_ref)?,
            None,
        )
    };

    let sql = finalize_select_tail(ctx, run, &from_clause, where_clause, &select_list, group_by, &data_ref)?;
    Ok((sql, extract_aliases(&select_list)))
}

/// `data_ref` is the base-document reference used to re-read the source
/// document in `ORDER BY` — `base_0.data` when this run joins in other
/// tables, bare `data` otherwise.
fn finalize_select_tail(
    ctx: &mut Context,
    run: &PendingRun,
    from_clause: &str,
    where_clause: Option<String>,
    select_list: &str,
    group_by: Option<String>,
    data_ref: &str,
) -> Result<String> {
    let mut sql = format!("SELECT {select_list}\nFROM {from_clause}");
    if let Some(w) = &where_clause {
        sql.push_str("\nWHERE ");
        sql.push_str(w);
    }
    if let Some(gb) = &group_by {
        sql.push_str("\nGROUP BY ");
        sql.push_str(gb);
    }
    if let Some(sort) = &run.sort {
        let order = render_sort_items(ctx, sort, data_ref)?;
        if !order.is_empty() {
            sql.push_str("\nORDER BY ");
            sql.push_str(&order);
        }
    }
    if let Some(sample_n) = run.sample {
        sql.push_str("\nORDER BY DBMS_RANDOM.VALUE");
        sql.push_str(&format!("\nFETCH FIRST {sample_n} ROWS ONLY"));
        return Ok(sql);
    }
    if let Some(skip_n) = run.skip {
        sql.push_str(&format!("\nOFFSET {skip_n} ROWS"));
    }
    let effective_limit = run
        .limit
        .or_else(|| run.sort.as_ref().and_then(|s| s.limit_hint));
    if let Some(limit_n) = effective_limit {
        sql.push_str(&format!("\nFETCH FIRST {limit_n} ROWS ONLY"));
    }
    Ok(sql)
}

/// `$bucketAuto` needs an `NTILE` value computed per row before it can be
/// grouped on, so it renders as a two-level query: an inner `SELECT` that
/// tags every row with its bucket number, and an outer `SELECT` that groups
/// on that tag.
fn finalize_bucket_auto(
    ctx: &mut Context,
    run: &PendingRun,
    bucket_auto: &BucketAuto,
    from_clause: &str,
    where_clause: Option<&str>,
    data_ref: &str,
) -> Result<(String, Vec<String>)> {
    let ntile_expr = {
        let mut nested = ctx.create_nested_context();
        render_expr(&mut nested, &bucket_auto.group_by)?;
        format!("NTILE({}) OVER (ORDER BY {})", bucket_auto.buckets, nested.to_sql())
    };

    let inner_alias = ctx.generate_table_alias("bucket_src");
    let mut inner_sql = format!("SELECT {ntile_expr} AS bucket_id, {data_ref} AS doc\nFROM {from_clause}");
    if let Some(w) = where_clause {
        inner_sql.push_str("\nWHERE ");
        inner_sql.push_str(w);
    }

    let mut inner_ctx = ctx.create_nested_context();
    inner_ctx.set_base_table_alias(inner_alias.clone());
    inner_ctx.data_column = "doc".to_string();
    let mut select_items = vec!["bucket_id AS _id".to_string()];
    for (alias, accumulator) in &bucket_auto.output {
        let mut nested = inner_ctx.create_nested_context();
        render_expr(&mut nested, &Expr::Accumulator(accumulator.clone()))?;
        select_items.push(format!("{} AS \"{alias}\"", nested.to_sql()));
    }
    let select_list = select_items.join(", ");

    // The outer, grouped row only has `_id` and the accumulator aliases —
    // a following `$sort` can only order by those, not by the original
    // document fields, so `$sort` after `$bucketAuto` is not honored here.
    let mut sql = format!("SELECT {select_list}\nFROM ({inner_sql}) {inner_alias}\nGROUP BY bucket_id");
    if run.sort.is_some() {
        ctx.push_warning(
            "bucket_auto.sort_not_applied",
            "a $sort following $bucketAuto is not rendered; only accumulator/_id-less ordering is supported",
        );
    }
    if let Some(limit_n) = run.limit {
        sql.push_str(&format!("\nFETCH FIRST {limit_n} ROWS ONLY"));
    }
    Ok((sql, extract_aliases(&select_list)))
}

/// `$graphLookup` would need a recursive `CONNECT BY`/`WITH ... RECURSIVE`
/// traversal to honor unbounded depth; this renders a single-hop
/// approximation (equivalent to `maxDepth: 0`) and reports the gap as a
/// warning whenever the caller asked for more than one hop.
fn render_graph_lookup_join(
    ctx: &Context,
    graph_lookup: &GraphLookup,
    data_column: &str,
) -> Result<(String, Option<(&'static str, &'static str)>)> {
    let table = crate::validator::validate_table_name(&graph_lookup.from)?;
    let alias = ctx.generate_table_alias(&graph_lookup.from);
    let connect_to = crate::validator::validate_field_name(&graph_lookup.connect_to_field)?;

    let mut start_ctx = ctx.create_nested_context();
    render_expr(&mut start_ctx, &graph_lookup.start_with)?;
    let start_expr = start_ctx.to_sql();

    let mut join_condition = format!(
        "JSON_VALUE({alias}.{data_column}, '$.{connect_to}') = {start_expr}"
    );
    if let Some(restrict) = &graph_lookup.restrict_search_with_match {
        let mut restrict_ctx = ctx.create_nested_context();
        restrict_ctx.set_base_table_alias(alias.clone());
        render_expr(&mut restrict_ctx, restrict)?;
        join_condition.push_str(" AND ");
        join_condition.push_str(&restrict_ctx.to_sql());
    }
    let join = format!("LEFT OUTER JOIN {table} {alias} ON {join_condition}");

    let warning = if graph_lookup.max_depth.map(|d| d > 0).unwrap_or(true) {
        Some((
            "graph_lookup.single_hop_only",
            "rendered as a single-hop join; recursive traversal beyond one hop is not evaluated server-side",
        ))
    } else {
        None
    };
    Ok((join, warning))
}

fn compose_sub_pipeline(ctx: &mut Context, collection: &str, stages: &[Stage]) -> Result<String> {
    let table = crate::validator::validate_table_name(collection)?;
    let sub_pipeline = Pipeline {
        source_collection: table,
        stages: stages.to_vec(),
    };
    compose(&sub_pipeline, ctx)
}

/// `$facet` forks the current rows through several independent
/// sub-pipelines and combines them into one row, one column per branch,
/// each column an aggregated array of that branch's output rows.
fn render_facet(
    ctx: &mut Context,
    branches: &[(String, Vec<Stage>)],
    from_sql: &str,
) -> Result<(String, Vec<String>)> {
    let mut items = Vec::with_capacity(branches.len());
    let mut names = Vec::with_capacity(branches.len());
    for (name, stages) in branches {
        let branch_pipeline = Pipeline {
            source_collection: from_sql.to_string(),
            stages: stages.clone(),
        };
        let (branch_sql, branch_aliases) = compose_inner(&branch_pipeline, ctx)?;
        let branch_alias = ctx.generate_table_alias("facet");
        let object_fields = branch_aliases
            .iter()
            .map(|a| format!("'{a}' VALUE {branch_alias}.\"{a}\""))
            .collect::<Vec<_>>()
            .join(", ");
        items.push(format!(
            "(SELECT JSON_ARRAYAGG(JSON_OBJECT({object_fields})) FROM ({branch_sql}) {branch_alias}) AS \"{name}\""
        ));
        names.push(name.clone());
    }
    Ok((format!("SELECT {} FROM DUAL", items.join(", ")), names))
}

/// Recovers the output column aliases from a composed `SELECT`'s top-level
/// item list — used so `$facet` can re-wrap a branch's columns into a
/// `JSON_OBJECT` without every renderer threading alias lists around.
/// Splits on commas at paren-depth zero, then takes the identifier after
/// each item's final ` AS `.
fn extract_aliases(select_list: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in select_list.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                items.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    if !current.trim().is_empty() {
        items.push(current);
    }
    items
        .iter()
        .filter_map(|item| {
            item.rfind(" AS ").map(|idx| {
                item[idx + 4..].trim().trim_matches('"').to_string()
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_aliases_handles_simple_list() {
        let aliases = extract_aliases("JSON_VALUE(b.data, '$.name') AS \"name\", COUNT(*) AS \"total\"");
        assert_eq!(aliases, vec!["name".to_string(), "total".to_string()]);
    }

    #[test]
    fn extract_aliases_ignores_commas_inside_parens() {
        let aliases = extract_aliases("JSON_OBJECT('a' VALUE 1, 'b' VALUE 2) AS \"obj\"");
        assert_eq!(aliases, vec!["obj".to_string()]);
    }
}
