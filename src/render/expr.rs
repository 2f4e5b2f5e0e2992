//! Per-expression-variant SQL rendering (§4.5). Every function appends to
//! the context's buffer; none returns a `String` — the context is the
//! single source of truth for bind numbering and alias uniqueness.

use bson::Bson;

use crate::ast::expr::*;
use crate::context::Context;
use crate::error::{Error, Result};

/// Renders one expression node. The entry point every stage renderer calls
/// for its child expressions.
pub fn render_expr(ctx: &mut Context, expr: &Expr) -> Result<()> {
    match expr {
        Expr::Literal(v) => render_literal(ctx, v),
        Expr::FieldPath(fp) => render_field_path(ctx, fp),
        Expr::Comparison(c) => render_comparison(ctx, c),
        Expr::Logical(l) => render_logical(ctx, l),
        Expr::Arithmetic(a) => render_arithmetic(ctx, a),
        Expr::StringOp(s) => render_string_op(ctx, s),
        Expr::DateOp(d) => render_date_op(ctx, d),
        Expr::ArrayOp(a) => render_array_op(ctx, a),
        Expr::Accumulator(a) => render_accumulator(ctx, a),
        Expr::Conditional(c) => render_conditional(ctx, c),
        Expr::TypeConversion(t) => render_type_conversion(ctx, t),
        Expr::ObjectOp(o) => render_object_op(ctx, o),
        Expr::Exists(e) => render_exists(ctx, e),
        Expr::InList(l) => render_in_list(ctx, l),
        Expr::CompoundId(c) => render_compound_id(ctx, c),
        Expr::LookupSize(l) => render_lookup_size(ctx, l),
    }
}

fn render_literal(ctx: &mut Context, value: &Bson) -> Result<()> {
    match value {
        Bson::Null => ctx.sql("NULL"),
        _ => ctx.bind(value.clone()),
    }
    Ok(())
}

fn render_field_path(ctx: &mut Context, fp: &FieldPath) -> Result<()> {
    let data_ref = ctx.data_column_ref();
    let numeric = matches!(fp.return_type, Some(JsonReturnType::Number));
    if numeric && !ctx.dialect.supports_json_value_returning {
        ctx.sql("TO_NUMBER(");
    }
    ctx.sql(&format!("JSON_VALUE({data_ref}, '$."));
    for (i, seg) in fp.segments.iter().enumerate() {
        if i > 0 {
            ctx.sql(".");
        }
        ctx.json_field(seg)?;
    }
    ctx.sql("'");
    if numeric && ctx.dialect.supports_json_value_returning {
        ctx.sql(" RETURNING NUMBER");
    }
    ctx.sql(")");
    if numeric && !ctx.dialect.supports_json_value_returning {
        ctx.sql(")");
    }
    Ok(())
}

/// Renders an expression where a numeric SQL result is required: a
/// `FieldPath` gets a `NUMBER`-typed `JSON_VALUE`; anything else renders
/// as-is, trusting the producing operator already yields a number.
fn render_numeric(ctx: &mut Context, expr: &Expr) -> Result<()> {
    match expr {
        Expr::FieldPath(fp) => render_field_path(ctx, &fp.clone().with_return_type(JsonReturnType::Number)),
        other => render_expr(ctx, other),
    }
}

fn is_numeric_literal(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Literal(Bson::Int32(_)) | Expr::Literal(Bson::Int64(_)) | Expr::Literal(Bson::Double(_))
    )
}

fn render_comparison(ctx: &mut Context, cmp: &Comparison) -> Result<()> {
    let numeric_context = is_numeric_literal(&cmp.left)
        || matches!(&cmp.right, ComparisonOperand::Single(r) if is_numeric_literal(r));

    let op_text = match cmp.op {
        CompareOp::Eq => "=",
        CompareOp::Ne => "<>",
        CompareOp::Gt => ">",
        CompareOp::Gte => ">=",
        CompareOp::Lt => "<",
        CompareOp::Lte => "<=",
        CompareOp::In | CompareOp::Nin => {
            return render_comparison_in(ctx, cmp, numeric_context);
        }
    };

    if numeric_context {
        render_numeric(ctx, &cmp.left)?;
    } else {
        render_expr(ctx, &cmp.left)?;
    }
    ctx.sql(&format!(" {op_text} "));
    match &cmp.right {
        ComparisonOperand::Single(r) => {
            if numeric_context {
                render_numeric(ctx, r)?;
            } else {
                render_expr(ctx, r)?;
            }
        }
        ComparisonOperand::List(_) => {
            return Err(Error::integrity("comparison operator with a list operand must be $in/$nin"));
        }
    }
    Ok(())
}

fn render_comparison_in(ctx: &mut Context, cmp: &Comparison, numeric_context: bool) -> Result<()> {
    let values = match &cmp.right {
        ComparisonOperand::List(values) => values,
        ComparisonOperand::Single(_) => {
            return Err(Error::unsupported(
                "$in/$nin",
                "a dynamic (non-literal-array) right-hand operand is not supported; only a literal array is translated",
            ));
        }
    };
    if numeric_context {
        render_numeric(ctx, &cmp.left)?;
    } else {
        render_expr(ctx, &cmp.left)?;
    }
    ctx.sql(if cmp.op == CompareOp::In { " IN (" } else { " NOT IN (" });
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            ctx.sql(", ");
        }
        render_expr(ctx, v)?;
    }
    ctx.sql(")");
    Ok(())
}

fn render_logical(ctx: &mut Context, logical: &Logical) -> Result<()> {
    match logical.op {
        LogicalOp::Not => {
            ctx.sql("NOT ( ");
            render_expr(ctx, &logical.children[0])?;
            ctx.sql(" )");
        }
        LogicalOp::Nor => {
            ctx.sql("NOT ( ");
            render_join(ctx, &logical.children, " OR ")?;
            ctx.sql(" )");
        }
        LogicalOp::And => {
            ctx.sql("( ");
            render_join(ctx, &logical.children, " AND ")?;
            ctx.sql(" )");
        }
        LogicalOp::Or => {
            ctx.sql("( ");
            render_join(ctx, &logical.children, " OR ")?;
            ctx.sql(" )");
        }
    }
    Ok(())
}

fn render_join(ctx: &mut Context, children: &[Expr], sep: &str) -> Result<()> {
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            ctx.sql(sep);
        }
        render_expr(ctx, child)?;
    }
    Ok(())
}

fn render_arithmetic(ctx: &mut Context, arith: &Arithmetic) -> Result<()> {
    match arith.op {
        ArithmeticOp::Mod => {
            ctx.sql("MOD(");
            render_numeric(ctx, &arith.operands[0])?;
            ctx.sql(", ");
            render_numeric(ctx, &arith.operands[1])?;
            ctx.sql(")");
        }
        ArithmeticOp::Add | ArithmeticOp::Multiply | ArithmeticOp::Subtract | ArithmeticOp::Divide => {
            let op_text = match arith.op {
                ArithmeticOp::Add => " + ",
                ArithmeticOp::Multiply => " * ",
                ArithmeticOp::Subtract => " - ",
                ArithmeticOp::Divide => " / ",
                ArithmeticOp::Mod => unreachable!(),
            };
            ctx.sql("(");
            for (i, operand) in arith.operands.iter().enumerate() {
                if i > 0 {
                    ctx.sql(op_text);
                }
                render_numeric(ctx, operand)?;
            }
            ctx.sql(")");
        }
    }
    Ok(())
}

fn render_string_op(ctx: &mut Context, op: &StringOp) -> Result<()> {
    match op {
        StringOp::Concat(parts) => {
            ctx.sql("(");
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    ctx.sql(" || ");
                }
                render_expr(ctx, part)?;
            }
            ctx.sql(")");
        }
        StringOp::ToLower(e) => {
            ctx.sql("LOWER(");
            render_expr(ctx, e)?;
            ctx.sql(")");
        }
        StringOp::ToUpper(e) => {
            ctx.sql("UPPER(");
            render_expr(ctx, e)?;
            ctx.sql(")");
        }
        StringOp::Substr { string, start, length } => {
            // $substr's `start` is 0-based; Oracle SUBSTR is 1-based.
            ctx.sql("SUBSTR(");
            render_expr(ctx, string)?;
            ctx.sql(", (");
            render_numeric(ctx, start)?;
            ctx.sql(") + 1");
            if let Some(len) = length {
                ctx.sql(", ");
                render_numeric(ctx, len)?;
            }
            ctx.sql(")");
        }
        StringOp::Trim(e) => {
            ctx.sql("TRIM(");
            render_expr(ctx, e)?;
            ctx.sql(")");
        }
        StringOp::Strlen(e) => {
            ctx.sql("LENGTH(");
            render_expr(ctx, e)?;
            ctx.sql(")");
        }
    }
    Ok(())
}

const ISO8601_FORMAT: &str = "'YYYY-MM-DD\"T\"HH24:MI:SS.FF3\"Z\"'";

fn render_as_timestamp(ctx: &mut Context, e: &Expr) -> Result<()> {
    ctx.sql("TO_TIMESTAMP(");
    render_expr(ctx, e)?;
    ctx.sql(&format!(", {ISO8601_FORMAT})"));
    Ok(())
}

fn render_date_op(ctx: &mut Context, op: &DateOp) -> Result<()> {
    let (field, arg) = match op {
        DateOp::Year(e) => ("YEAR", e),
        DateOp::Month(e) => ("MONTH", e),
        DateOp::DayOfMonth(e) => ("DAY", e),
        DateOp::Hour(e) => ("HOUR", e),
        DateOp::Minute(e) => ("MINUTE", e),
        DateOp::Second(e) => ("SECOND", e),
        DateOp::DayOfWeek(_) | DateOp::DayOfYear(_) => {
            let (fmt, e) = match op {
                DateOp::DayOfWeek(e) => ("D", e),
                DateOp::DayOfYear(e) => ("DDD", e),
                _ => unreachable!(),
            };
            ctx.sql("TO_NUMBER(TO_CHAR(");
            render_as_timestamp(ctx, e)?;
            ctx.sql(&format!(", '{fmt}'))"));
            return Ok(());
        }
    };
    ctx.sql(&format!("EXTRACT({field} FROM "));
    render_as_timestamp(ctx, arg)?;
    ctx.sql(")");
    Ok(())
}

/// `$arrayElemAt`/`$first`/`$last` only render when the array operand is a
/// plain `FieldPath` and the index (when present) is a literal integer —
/// the only forms expressible as a static JSON path segment.
fn literal_index(index: &Expr) -> Option<i64> {
    match index {
        Expr::Literal(Bson::Int32(n)) => Some(*n as i64),
        Expr::Literal(Bson::Int64(n)) => Some(*n),
        _ => None,
    }
}

fn array_index_path_segment(index: i64) -> String {
    if index >= 0 {
        format!("[{index}]")
    } else if index == -1 {
        "[last]".to_string()
    } else {
        format!("[last-{}]", (-index) - 1)
    }
}

fn render_field_path_with_index(ctx: &mut Context, fp: &FieldPath, segment: &str) -> Result<()> {
    let data_ref = ctx.data_column_ref();
    ctx.sql(&format!("JSON_VALUE({data_ref}, '$."));
    for (i, seg) in fp.segments.iter().enumerate() {
        if i > 0 {
            ctx.sql(".");
        }
        ctx.json_field(seg)?;
    }
    ctx.sql(segment);
    ctx.sql("')");
    Ok(())
}

fn render_array_op(ctx: &mut Context, op: &ArrayOp) -> Result<()> {
    match op {
        ArrayOp::ElemAt { array, index } => {
            let (Expr::FieldPath(fp), Some(idx)) = (array.as_ref(), literal_index(index)) else {
                return Err(Error::unsupported(
                    "$arrayElemAt",
                    "only a literal integer index on a plain field path is supported",
                ));
            };
            render_field_path_with_index(ctx, fp, &array_index_path_segment(idx))
        }
        ArrayOp::First(array) => match array.as_ref() {
            Expr::FieldPath(fp) => render_field_path_with_index(ctx, fp, "[0]"),
            _ => Err(Error::unsupported("$first", "only a plain field path array operand is supported")),
        },
        ArrayOp::Last(array) => match array.as_ref() {
            Expr::FieldPath(fp) => render_field_path_with_index(ctx, fp, "[last]"),
            _ => Err(Error::unsupported("$last", "only a plain field path array operand is supported")),
        },
        ArrayOp::Size(array) => render_array_size(ctx, array),
        ArrayOp::Slice { .. } => Err(Error::unsupported(
            "$slice",
            "array slicing requires a JSON_TABLE-based correlated subquery, not yet implemented",
        )),
        ArrayOp::ConcatArrays(_) => Err(Error::unsupported(
            "$concatArrays",
            "array concatenation has no direct Oracle JSON-column equivalent",
        )),
        ArrayOp::Filter { .. } => Err(Error::unsupported(
            "$filter",
            "requires a JSON_TABLE-based correlated subquery, not yet implemented",
        )),
        ArrayOp::Map { .. } => Err(Error::unsupported(
            "$map",
            "requires a JSON_TABLE-based correlated subquery, not yet implemented",
        )),
        ArrayOp::Reduce { .. } => Err(Error::unsupported(
            "$reduce",
            "requires a JSON_TABLE-based correlated subquery, not yet implemented",
        )),
    }
}

fn render_array_size(ctx: &mut Context, array: &Expr) -> Result<()> {
    let Expr::FieldPath(fp) = array else {
        return Err(Error::unsupported("$size", "only a plain field path array operand is supported"));
    };
    if fp.segments.len() == 1 {
        if let Some(lookup) = ctx.lookup_size_expression(&fp.segments[0]) {
            ctx.mark_lookup_consumed_by_size(&fp.segments[0]);
            return render_lookup_size(ctx, &lookup);
        }
    }
    render_field_path_with_index(ctx, fp, ".size()")
}

fn render_lookup_size(ctx: &mut Context, lookup: &LookupSize) -> Result<()> {
    let base_ref = ctx.data_column_ref();
    let table = crate::validator::validate_table_name(&lookup.foreign_table)?;
    let alias = ctx.generate_table_alias(&lookup.foreign_table);
    let data_column = ctx.data_column.clone();
    ctx.sql(&format!("(SELECT COUNT(*) FROM {table} {alias} WHERE JSON_VALUE({alias}.{data_column}, '$."));
    ctx.json_field(&lookup.foreign_field)?;
    ctx.sql(&format!("') = JSON_VALUE({base_ref}, '$."));
    ctx.json_field(&lookup.local_field)?;
    ctx.sql("'))");
    Ok(())
}

/// Every accumulator but `$count` carries an argument by construction of
/// `crate::parser::expr::parse_accumulator`; a `None` here means that
/// invariant broke somewhere upstream.
fn required_arg<'a>(arg: &'a Option<Box<Expr>>, op: &str) -> Result<&'a Expr> {
    arg.as_deref()
        .ok_or_else(|| Error::integrity(format!("{op} accumulator reached rendering with no argument")))
}

fn render_accumulator(ctx: &mut Context, acc: &Accumulator) -> Result<()> {
    match acc.op {
        AccumulatorOp::Count => {
            ctx.sql("COUNT(*)");
        }
        AccumulatorOp::Sum => {
            ctx.sql("SUM(");
            render_numeric(ctx, required_arg(&acc.arg, "$sum")?)?;
            ctx.sql(")");
        }
        AccumulatorOp::Avg => {
            ctx.sql("AVG(");
            render_numeric(ctx, required_arg(&acc.arg, "$avg")?)?;
            ctx.sql(")");
        }
        AccumulatorOp::Min => {
            ctx.sql("MIN(");
            render_expr(ctx, required_arg(&acc.arg, "$min")?)?;
            ctx.sql(")");
        }
        AccumulatorOp::Max => {
            ctx.sql("MAX(");
            render_expr(ctx, required_arg(&acc.arg, "$max")?)?;
            ctx.sql(")");
        }
        AccumulatorOp::First => {
            ctx.push_warning(
                "emulated.first_accumulator",
                "$first inside a grouping context is emulated via MIN; Oracle's FIRST_VALUE requires an OVER clause and an explicit ordering this translator does not assume",
            );
            ctx.sql("MIN(");
            render_expr(ctx, required_arg(&acc.arg, "$first")?)?;
            ctx.sql(")");
        }
        AccumulatorOp::Last => {
            ctx.push_warning(
                "emulated.last_accumulator",
                "$last inside a grouping context is emulated via MAX; Oracle's LAST_VALUE requires an OVER clause and an explicit ordering this translator does not assume",
            );
            ctx.sql("MAX(");
            render_expr(ctx, required_arg(&acc.arg, "$last")?)?;
            ctx.sql(")");
        }
        AccumulatorOp::Push => {
            ctx.sql("JSON_ARRAYAGG(");
            render_expr(ctx, required_arg(&acc.arg, "$push")?)?;
            ctx.sql(")");
        }
        AccumulatorOp::AddToSet => {
            if ctx.dialect.supports_distinct_json_arrayagg {
                ctx.sql("JSON_ARRAYAGG(DISTINCT ");
                render_expr(ctx, required_arg(&acc.arg, "$addToSet")?)?;
                ctx.sql(")");
            } else {
                ctx.push_warning(
                    "emulated.add_to_set",
                    "$addToSet is emulated via LISTAGG(DISTINCT ...) because the configured dialect lacks JSON_ARRAYAGG(DISTINCT ...)",
                );
                ctx.sql("JSON_QUERY('[' || LISTAGG(DISTINCT ");
                render_expr(ctx, required_arg(&acc.arg, "$addToSet")?)?;
                ctx.sql(", ',') || ']', '$')");
            }
        }
    }
    Ok(())
}

fn render_conditional(ctx: &mut Context, cond: &Conditional) -> Result<()> {
    match cond {
        Conditional::Cond { condition, then_expr, else_expr } => {
            ctx.sql("CASE WHEN ");
            render_expr(ctx, condition)?;
            ctx.sql(" THEN ");
            render_expr(ctx, then_expr)?;
            ctx.sql(" ELSE ");
            render_expr(ctx, else_expr)?;
            ctx.sql(" END");
        }
        Conditional::IfNull { candidates } => {
            ctx.sql("COALESCE(");
            for (i, c) in candidates.iter().enumerate() {
                if i > 0 {
                    ctx.sql(", ");
                }
                render_expr(ctx, c)?;
            }
            ctx.sql(")");
        }
    }
    Ok(())
}

fn convert_target<'a>(op: TypeConversionOp, to: &'a Option<String>) -> &'a str {
    if let Some(t) = to {
        return t.as_str();
    }
    match op {
        TypeConversionOp::ToInt => "int",
        TypeConversionOp::ToLong => "long",
        TypeConversionOp::ToDouble => "double",
        TypeConversionOp::ToDecimal => "decimal",
        TypeConversionOp::ToString => "string",
        TypeConversionOp::ToBool => "bool",
        TypeConversionOp::ToDate => "date",
        TypeConversionOp::ToObjectId => "objectId",
        _ => "",
    }
}

fn render_type_conversion(ctx: &mut Context, conv: &TypeConversion) -> Result<()> {
    match conv.op {
        TypeConversionOp::Type => {
            ctx.sql("CASE WHEN ");
            render_expr(ctx, &conv.arg)?;
            ctx.sql(" IS NULL THEN 'null' WHEN REGEXP_LIKE(");
            render_expr(ctx, &conv.arg)?;
            ctx.sql(", '^-?[0-9]+$') THEN 'int' WHEN REGEXP_LIKE(");
            render_expr(ctx, &conv.arg)?;
            ctx.sql(", '^-?[0-9]*\\.[0-9]+$') THEN 'double' ELSE 'string' END");
            return Ok(());
        }
        TypeConversionOp::IsNumber => {
            ctx.sql("CASE WHEN REGEXP_LIKE(");
            render_expr(ctx, &conv.arg)?;
            ctx.sql(", '^-?[0-9]*\\.?[0-9]+$') THEN 'true' ELSE 'false' END");
            return Ok(());
        }
        TypeConversionOp::IsString => {
            ctx.sql("CASE WHEN NOT REGEXP_LIKE(");
            render_expr(ctx, &conv.arg)?;
            ctx.sql(", '^-?[0-9]*\\.?[0-9]+$') THEN 'true' ELSE 'false' END");
            return Ok(());
        }
        TypeConversionOp::ToBool => {
            ctx.sql("CASE WHEN ");
            render_expr(ctx, &conv.arg)?;
            ctx.sql(" IS NULL OR ");
            render_expr(ctx, &conv.arg)?;
            ctx.sql(" IN ('0', 'false') THEN 'false' ELSE 'true' END");
            return Ok(());
        }
        _ => {}
    }

    let target = convert_target(conv.op, &conv.to).to_ascii_lowercase();
    match target.as_str() {
        "int" | "long" | "decimal" => {
            ctx.sql("TO_NUMBER(");
            render_expr(ctx, &conv.arg)?;
            ctx.sql(")");
        }
        "double" => {
            ctx.sql("TO_BINARY_DOUBLE(");
            render_expr(ctx, &conv.arg)?;
            ctx.sql(")");
        }
        "date" => {
            ctx.sql("TO_TIMESTAMP_TZ(");
            render_expr(ctx, &conv.arg)?;
            ctx.sql(&format!(", {ISO8601_FORMAT})"));
        }
        "string" | "objectid" => {
            ctx.sql("TO_CHAR(");
            render_expr(ctx, &conv.arg)?;
            ctx.sql(")");
        }
        other => {
            return Err(Error::unsupported("$convert", format!("unrecognized target type '{other}'")));
        }
    }
    Ok(())
}

fn render_object_op(_ctx: &mut Context, op: &ObjectOp) -> Result<()> {
    let name = match op {
        ObjectOp::MergeObjects(_) => "$mergeObjects",
        ObjectOp::ObjectToArray(_) => "$objectToArray",
        ObjectOp::ArrayToObject(_) => "$arrayToObject",
    };
    Err(Error::unsupported(name, "document-shape transforms have no direct Oracle JSON-column rendering in this translator"))
}

fn render_exists(ctx: &mut Context, exists: &Exists) -> Result<()> {
    let data_ref = ctx.data_column_ref();
    if !exists.polarity {
        ctx.sql("NOT ");
    }
    ctx.sql(&format!("JSON_EXISTS({data_ref}, '$."));
    for (i, seg) in exists.field.segments.iter().enumerate() {
        if i > 0 {
            ctx.sql(".");
        }
        ctx.json_field(seg)?;
    }
    ctx.sql("')");
    Ok(())
}

fn render_in_list(ctx: &mut Context, list: &InList) -> Result<()> {
    if list.values.is_empty() {
        ctx.sql(if list.negated { "1 = 1" } else { "1 = 0" });
        return Ok(());
    }
    render_field_path(ctx, &list.field)?;
    ctx.sql(if list.negated { " NOT IN (" } else { " IN (" });
    for (i, v) in list.values.iter().enumerate() {
        if i > 0 {
            ctx.sql(", ");
        }
        render_expr(ctx, v)?;
    }
    ctx.sql(")");
    Ok(())
}

/// Renders a `$group._id`/object-literal compound expression as a
/// `JSON_OBJECT(...)` construction. `crate::render::stage`'s `Group`
/// renderer special-cases this same node to also produce the flat
/// `GROUP BY` expression list.
fn render_compound_id(ctx: &mut Context, compound: &CompoundId) -> Result<()> {
    ctx.sql("JSON_OBJECT(");
    for (i, (key, value)) in compound.fields.iter().enumerate() {
        if i > 0 {
            ctx.sql(", ");
        }
        let escaped = key.replace('\'', "''");
        ctx.sql(&format!("'{escaped}' VALUE "));
        render_expr(ctx, value)?;
    }
    ctx.sql(")");
    Ok(())
}
