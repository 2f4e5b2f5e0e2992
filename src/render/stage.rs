//! Per-stage fragment renderers (§4.5). Stage renderers emit the SQL
//! fragment the Composer slots into the right clause — a boolean
//! expression for `Match`, a SELECT-list for `Project`/`Group`, a JOIN for
//! `Lookup`, and so on. None of them emit a whole `SELECT` statement;
//! `crate::compose` owns clause ordering.

use bson::Bson;

use crate::ast::expr::{AccumulatorOp, CompoundId, Expr};
use crate::ast::stage::{
    Bucket, BucketAuto, Group, Lookup, ProjectedField, Projection, Sort, SortDirection, Unwind,
    WindowOutput,
};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::render::expr::render_expr;

/// Renders a `$match` boolean filter into a fresh nested buffer.
pub fn render_match_filter(ctx: &Context, expr: &Expr) -> Result<String> {
    let mut nested = ctx.create_nested_context();
    render_expr(&mut nested, expr)?;
    Ok(nested.to_sql())
}

/// Renders a `$project`/`$addFields` SELECT list. `addfields` are appended
/// after the base projection's own fields, each as `AS alias`.
pub fn render_projection_list(
    ctx: &Context,
    projection: Option<&Projection>,
    addfields: &[(String, Expr)],
    data_column: &str,
) -> Result<String> {
    let mut items: Vec<String> = Vec::new();

    match projection {
        None => items.push(data_column.to_string()),
        Some(p) => {
            if p.fields.iter().any(|(_, f)| matches!(f, ProjectedField::Exclude)) {
                // Pure exclusion projection: there is no stored-document
                // equivalent of "all columns minus these" over a single
                // JSON column, so exclusion renders as the base document;
                // the excluded keys are a client-side contract today.
                items.push(data_column.to_string());
            } else {
                for (name, field) in &p.fields {
                    match field {
                        ProjectedField::Include => {
                            let mut nested = ctx.create_nested_context();
                            nested.sql(&format!("JSON_VALUE({data_column}, '$."));
                            nested.json_field(name)?;
                            nested.sql("')");
                            items.push(format!("{} AS \"{name}\"", nested.to_sql()));
                        }
                        ProjectedField::Computed(expr) => {
                            let mut nested = ctx.create_nested_context();
                            render_expr(&mut nested, expr)?;
                            items.push(format!("{} AS \"{name}\"", nested.to_sql()));
                        }
                        ProjectedField::Exclude => unreachable!(),
                    }
                }
                if items.is_empty() {
                    items.push(data_column.to_string());
                }
            }
        }
    }

    for (name, expr) in addfields {
        let mut nested = ctx.create_nested_context();
        render_expr(&mut nested, expr)?;
        items.push(format!("{} AS \"{name}\"", nested.to_sql()));
    }

    Ok(items.join(", "))
}

/// Renders a `$group` stage: the SELECT-list fragment (`_id` plus
/// accumulators) and, separately, the `GROUP BY` fragment (empty when
/// `_id` is `Literal(null)`, per §4.6 point 7).
pub fn render_group(ctx: &Context, group: &Group) -> Result<(String, Option<String>)> {
    let mut select_items = Vec::new();
    let mut group_by: Option<String> = None;

    match &group.id {
        Expr::Literal(Bson::Null) => {
            // whole-collection aggregate: no GROUP BY, no _id column.
        }
        Expr::CompoundId(CompoundId { fields }) => {
            let mut parts = Vec::new();
            let mut group_parts = Vec::new();
            for (key, value) in fields {
                let mut nested = ctx.create_nested_context();
                render_expr(&mut nested, value)?;
                let frag = nested.to_sql();
                parts.push(format!("{frag} AS \"{key}\""));
                group_parts.push(frag);
            }
            select_items.extend(parts);
            group_by = Some(group_parts.join(", "));
        }
        other => {
            let mut nested = ctx.create_nested_context();
            render_expr(&mut nested, other)?;
            let frag = nested.to_sql();
            select_items.push(format!("{frag} AS _id"));
            group_by = Some(frag);
        }
    }

    for (alias, accumulator) in &group.fields {
        let mut nested = ctx.create_nested_context();
        crate::render::expr::render_expr(&mut nested, &Expr::Accumulator(accumulator.clone()))?;
        let frag = nested.to_sql();
        select_items.push(format!("{frag} AS \"{alias}\""));
    }

    Ok((select_items.join(", "), group_by))
}

/// Renders a `$sort` `ORDER BY` item list (without the `ORDER BY` keyword).
pub fn render_sort_items(ctx: &Context, sort: &Sort, data_column: &str) -> Result<String> {
    let mut items = Vec::with_capacity(sort.keys.len());
    for (field, direction) in &sort.keys {
        let mut nested = ctx.create_nested_context();
        nested.sql(&format!("JSON_VALUE({data_column}, '$."));
        nested.json_field(field)?;
        nested.sql("')");
        let frag = nested.to_sql();
        items.push(match direction {
            SortDirection::Asc => frag,
            SortDirection::Desc => format!("{frag} DESC"),
        });
    }
    Ok(items.join(", "))
}

/// Renders a `$lookup`'s `LEFT OUTER JOIN`, or `None` when the lookup was
/// consumed by a `$size` rewrite and its JOIN can be elided.
pub fn render_lookup_join(ctx: &Context, lookup: &Lookup, base_alias: &str, data_column: &str) -> Result<Option<String>> {
    if ctx.is_lookup_consumed_by_size(&lookup.as_name) {
        return Ok(None);
    }
    let (Some(local_field), Some(foreign_field)) = (&lookup.local_field, &lookup.foreign_field) else {
        return Err(Error::unsupported(
            "$lookup",
            "the let+pipeline correlated form is not yet rendered; only the equality localField/foreignField form is supported",
        ));
    };
    let table = crate::validator::validate_table_name(&lookup.from)?;
    let alias = ctx.generate_table_alias(&lookup.from);
    ctx.register_lookup_table_alias(&lookup.as_name, alias.clone());
    let foreign_field = crate::validator::validate_field_name(foreign_field)?;
    let local_field = crate::validator::validate_field_name(local_field)?;
    Ok(Some(format!(
        "LEFT OUTER JOIN {table} {alias} ON JSON_VALUE({base_alias}.{data_column}, '$.{local_field}') = JSON_VALUE({alias}.{data_column}, '$.{foreign_field}')"
    )))
}

/// Renders a `$unwind` as a comma-joined `JSON_TABLE` row source, the form
/// the Composer splices into `FROM` after a comma. `preserveNullAndEmptyArrays`
/// wraps the table expression in `OUTER(...)` so a document with a missing or
/// empty array still contributes one row with `value` bound to `NULL`.
pub fn render_unwind_join(ctx: &Context, unwind: &Unwind, base_alias: &str, data_column: &str) -> Result<String> {
    let field = crate::validator::validate_field_name(&unwind.path)?;
    let alias = ctx.generate_table_alias("unwind");
    let mut columns = "value PATH '$'".to_string();
    if let Some(idx_name) = &unwind.include_array_index {
        let idx_name = crate::validator::validate_field_name(idx_name)?;
        columns.push_str(&format!(", \"{idx_name}\" FOR ORDINALITY"));
    }
    let json_table = format!(
        "JSON_TABLE({base_alias}.{data_column}, '$.{field}[*]' COLUMNS ({columns}))"
    );
    let table_expr = if unwind.preserve_null_and_empty_arrays {
        format!("OUTER({json_table})")
    } else {
        json_table
    };
    Ok(format!("{table_expr} {alias}"))
}

/// Renders a `$bucket`/`$bucketAuto` `SELECT`-list and `GROUP BY` fragment.
/// `$bucket` groups by a `CASE` over explicit boundaries; `$bucketAuto`
/// uses `NTILE`.
pub fn render_bucket(ctx: &Context, bucket: &Bucket, data_column: &str) -> Result<(String, String)> {
    let mut case_ctx = ctx.create_nested_context();
    case_ctx.sql("CASE ");
    for window in bucket.boundaries.windows(2) {
        case_ctx.sql("WHEN ");
        render_expr(&mut case_ctx, &bucket.group_by)?;
        case_ctx.sql(" >= ");
        render_expr(&mut case_ctx, &window[0])?;
        case_ctx.sql(" AND ");
        render_expr(&mut case_ctx, &bucket.group_by)?;
        case_ctx.sql(" < ");
        render_expr(&mut case_ctx, &window[1])?;
        case_ctx.sql(" THEN ");
        render_expr(&mut case_ctx, &window[0])?;
        case_ctx.sql(" ");
    }
    if let Some(default) = &bucket.default {
        case_ctx.sql("ELSE ");
        render_expr(&mut case_ctx, default)?;
        case_ctx.sql(" ");
    }
    case_ctx.sql("END");
    let case_sql = case_ctx.to_sql();

    let mut select_items = vec![format!("{case_sql} AS _id")];
    let _ = data_column;
    for (alias, accumulator) in &bucket.output {
        let mut nested = ctx.create_nested_context();
        render_expr(&mut nested, &Expr::Accumulator(accumulator.clone()))?;
        select_items.push(format!("{} AS \"{alias}\"", nested.to_sql()));
    }
    Ok((select_items.join(", "), case_sql))
}

pub fn render_bucket_auto(ctx: &Context, bucket: &BucketAuto) -> Result<(String, String)> {
    let mut nested = ctx.create_nested_context();
    render_expr(&mut nested, &bucket.group_by)?;
    let order_expr = nested.to_sql();
    let ntile_sql = format!("NTILE({}) OVER (ORDER BY {order_expr})", bucket.buckets);

    let mut select_items = vec![format!("{ntile_sql} AS _id")];
    for (alias, accumulator) in &bucket.output {
        let mut acc_ctx = ctx.create_nested_context();
        render_expr(&mut acc_ctx, &Expr::Accumulator(accumulator.clone()))?;
        select_items.push(format!("{} AS \"{alias}\"", acc_ctx.to_sql()));
    }
    Ok((select_items.join(", "), ntile_sql))
}

/// Renders a `$setWindowFields` output list: accumulator expressions with
/// an `OVER (PARTITION BY ... ORDER BY ...)` clause.
pub fn render_window_outputs(
    ctx: &Context,
    partition_by: Option<&Expr>,
    sort_by: &[(String, SortDirection)],
    outputs: &[WindowOutput],
    data_column: &str,
) -> Result<Vec<String>> {
    let mut partition_sql = None;
    if let Some(p) = partition_by {
        let mut nested = ctx.create_nested_context();
        render_expr(&mut nested, p)?;
        partition_sql = Some(nested.to_sql());
    }
    let mut order_parts = Vec::with_capacity(sort_by.len());
    for (field, direction) in sort_by {
        let mut nested = ctx.create_nested_context();
        nested.sql(&format!("JSON_VALUE({data_column}, '$."));
        nested.json_field(field)?;
        nested.sql("')");
        let frag = nested.to_sql();
        order_parts.push(match direction {
            SortDirection::Asc => frag,
            SortDirection::Desc => format!("{frag} DESC"),
        });
    }

    let mut items = Vec::with_capacity(outputs.len());
    for output in outputs {
        let mut nested = ctx.create_nested_context();
        match output.function.op {
            AccumulatorOp::Count => nested.sql("COUNT(*)"),
            _ => render_expr(
                &mut nested,
                &Expr::Accumulator(output.function.clone()),
            )?,
        }
        let mut clause = nested.to_sql();
        clause.push_str(" OVER (");
        let mut wrote_any = false;
        if let Some(p) = &partition_sql {
            clause.push_str("PARTITION BY ");
            clause.push_str(p);
            wrote_any = true;
        }
        if !order_parts.is_empty() {
            if wrote_any {
                clause.push(' ');
            }
            clause.push_str("ORDER BY ");
            clause.push_str(&order_parts.join(", "));
        }
        clause.push(')');
        items.push(format!("{clause} AS \"{}\"", output.alias));
    }
    Ok(items)
}
