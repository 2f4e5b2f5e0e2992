//! Recursive expression parser: raw BSON → [`Expr`].
//!
//! Internal helpers return `anyhow::Result` for the ergonomics of `?` and
//! `.context(...)`; the public entry points fold that into the crate's
//! `Error` at this module's boundary, the same split the host codebase
//! draws between its expression parser and its public API.

use anyhow::{anyhow, bail, Context as _};
use bson::{Bson, Document};

use crate::ast::expr::{
    AccumulatorOp, ArithmeticOp, ArrayOp, Comparison, ComparisonOperand, CompareOp, CompoundId,
    Conditional, DateOp, Expr, FieldPath, Logical, LogicalOp, Arithmetic, ObjectOp, StringOp,
    TypeConversion, TypeConversionOp, Accumulator,
};
use crate::error::Result;
use crate::validator;

/// Parses one BSON value in expression position.
pub fn parse_expr(value: &Bson) -> Result<Expr> {
    Ok(parse_expr_inner(value)?)
}

fn parse_expr_inner(value: &Bson) -> anyhow::Result<Expr> {
    match value {
        Bson::String(s) if s.starts_with('$') => {
            let segments = validator::validate_and_normalize_field_path(s)?;
            Ok(Expr::FieldPath(FieldPath::new(segments)))
        }
        Bson::Document(doc) => parse_document_expr(doc),
        other => Ok(Expr::Literal(other.clone())),
    }
}

fn parse_document_expr(doc: &Document) -> anyhow::Result<Expr> {
    let dollar_keys: Vec<&str> = doc
        .keys()
        .map(|k| k.as_str())
        .filter(|k| k.starts_with('$'))
        .collect();

    match dollar_keys.as_slice() {
        [op] if doc.len() == 1 => parse_operator(op, doc.get(*op).unwrap()),
        _ => {
            // A plain document in expression position: every value is
            // itself an expression, order preserved. Used both for
            // `$group._id` compound keys and for object-shaped output in
            // `$project`/`$addFields`.
            let mut fields = Vec::with_capacity(doc.len());
            for (k, v) in doc.iter() {
                fields.push((k.clone(), parse_expr_inner(v)?));
            }
            Ok(Expr::CompoundId(CompoundId { fields }))
        }
    }
}

fn as_array(value: &Bson, op: &str) -> anyhow::Result<&[Bson]> {
    match value {
        Bson::Array(arr) => Ok(arr.as_slice()),
        _ => bail!("{op} expects an array argument"),
    }
}

fn exactly<'a>(arr: &'a [Bson], n: usize, op: &str) -> anyhow::Result<&'a [Bson]> {
    if arr.len() != n {
        bail!("{op} expects exactly {n} argument(s), got {}", arr.len());
    }
    Ok(arr)
}

fn at_least<'a>(arr: &'a [Bson], n: usize, op: &str) -> anyhow::Result<&'a [Bson]> {
    if arr.len() < n {
        bail!("{op} expects at least {n} argument(s), got {}", arr.len());
    }
    Ok(arr)
}

/// A single scalar argument may be written either as the bare value or as
/// a one-element array, both accepted by MongoDB's expression parser.
fn single_arg(value: &Bson) -> &Bson {
    match value {
        Bson::Array(arr) if arr.len() == 1 => &arr[0],
        other => other,
    }
}

fn parse_exprs(values: &[Bson]) -> anyhow::Result<Vec<Expr>> {
    values.iter().map(parse_expr_inner).collect()
}

fn doc_field<'a>(doc: &'a Document, key: &str, op: &str) -> anyhow::Result<&'a Bson> {
    doc.get(key)
        .ok_or_else(|| anyhow!("{op} requires a '{key}' field"))
}

fn parse_operator(op: &str, value: &Bson) -> anyhow::Result<Expr> {
    match op {
        // --- Comparison -------------------------------------------------
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
            let arr = exactly(as_array(value, op)?, 2, op)?;
            let cmp_op = match op {
                "$eq" => CompareOp::Eq,
                "$ne" => CompareOp::Ne,
                "$gt" => CompareOp::Gt,
                "$gte" => CompareOp::Gte,
                "$lt" => CompareOp::Lt,
                _ => CompareOp::Lte,
            };
            Ok(Expr::Comparison(Comparison {
                op: cmp_op,
                left: Box::new(parse_expr_inner(&arr[0])?),
                right: ComparisonOperand::Single(Box::new(parse_expr_inner(&arr[1])?)),
            }))
        }
        "$in" | "$nin" => {
            let arr = exactly(as_array(value, op)?, 2, op)?;
            let cmp_op = if op == "$in" { CompareOp::In } else { CompareOp::Nin };
            let right = match &arr[1] {
                Bson::Array(list) => ComparisonOperand::List(parse_exprs(list)?),
                other => ComparisonOperand::Single(Box::new(parse_expr_inner(other)?)),
            };
            Ok(Expr::Comparison(Comparison {
                op: cmp_op,
                left: Box::new(parse_expr_inner(&arr[0])?),
                right,
            }))
        }

        // --- Logical ------------------------------------------------------
        "$and" | "$or" | "$nor" => {
            let arr = as_array(value, op)?;
            let logical_op = match op {
                "$and" => LogicalOp::And,
                "$or" => LogicalOp::Or,
                _ => LogicalOp::Nor,
            };
            Ok(Expr::Logical(Logical {
                op: logical_op,
                children: parse_exprs(arr)?,
            }))
        }
        "$not" => {
            let inner = single_arg(value);
            Ok(Expr::Logical(Logical {
                op: LogicalOp::Not,
                children: vec![parse_expr_inner(inner)?],
            }))
        }

        // --- Arithmetic -----------------------------------------------
        "$add" | "$multiply" => {
            let arr = as_array(value, op)?;
            let arith_op = if op == "$add" {
                ArithmeticOp::Add
            } else {
                ArithmeticOp::Multiply
            };
            Ok(Expr::Arithmetic(Arithmetic {
                op: arith_op,
                operands: parse_exprs(arr)?,
            }))
        }
        "$subtract" | "$divide" | "$mod" => {
            let arr = exactly(as_array(value, op)?, 2, op)?;
            let arith_op = match op {
                "$subtract" => ArithmeticOp::Subtract,
                "$divide" => ArithmeticOp::Divide,
                _ => ArithmeticOp::Mod,
            };
            Ok(Expr::Arithmetic(Arithmetic {
                op: arith_op,
                operands: parse_exprs(arr)?,
            }))
        }

        // --- String -----------------------------------------------------
        "$concat" => Ok(Expr::StringOp(StringOp::Concat(parse_exprs(as_array(value, op)?)?))),
        "$toLower" => Ok(Expr::StringOp(StringOp::ToLower(Box::new(parse_expr_inner(single_arg(value))?)))),
        "$toUpper" => Ok(Expr::StringOp(StringOp::ToUpper(Box::new(parse_expr_inner(single_arg(value))?)))),
        "$substr" | "$substrCP" | "$substrBytes" => {
            let arr = as_array(value, op)?;
            at_least(arr, 2, op)?;
            Ok(Expr::StringOp(StringOp::Substr {
                string: Box::new(parse_expr_inner(&arr[0])?),
                start: Box::new(parse_expr_inner(&arr[1])?),
                length: match arr.get(2) {
                    Some(v) => Some(Box::new(parse_expr_inner(v)?)),
                    None => None,
                },
            }))
        }
        "$trim" => {
            let inner = match value {
                Bson::Document(d) => doc_field(d, "input", op)?,
                other => other,
            };
            Ok(Expr::StringOp(StringOp::Trim(Box::new(parse_expr_inner(inner)?))))
        }
        "$strLenCP" | "$strLenBytes" => {
            Ok(Expr::StringOp(StringOp::Strlen(Box::new(parse_expr_inner(single_arg(value))?))))
        }

        // --- Date -------------------------------------------------------
        "$year" | "$month" | "$dayOfMonth" | "$hour" | "$minute" | "$second" | "$dayOfWeek"
        | "$dayOfYear" => {
            let inner = match value {
                Bson::Document(d) if d.contains_key("date") => doc_field(d, "date", op)?,
                other => single_arg(other),
            };
            let e = Box::new(parse_expr_inner(inner)?);
            Ok(Expr::DateOp(match op {
                "$year" => DateOp::Year(e),
                "$month" => DateOp::Month(e),
                "$dayOfMonth" => DateOp::DayOfMonth(e),
                "$hour" => DateOp::Hour(e),
                "$minute" => DateOp::Minute(e),
                "$second" => DateOp::Second(e),
                "$dayOfWeek" => DateOp::DayOfWeek(e),
                _ => DateOp::DayOfYear(e),
            }))
        }

        // --- Array --------------------------------------------------------
        "$arrayElemAt" => {
            let arr = exactly(as_array(value, op)?, 2, op)?;
            Ok(Expr::ArrayOp(ArrayOp::ElemAt {
                array: Box::new(parse_expr_inner(&arr[0])?),
                index: Box::new(parse_expr_inner(&arr[1])?),
            }))
        }
        "$size" => Ok(Expr::ArrayOp(ArrayOp::Size(Box::new(parse_expr_inner(single_arg(value))?)))),
        "$first" => Ok(Expr::ArrayOp(ArrayOp::First(Box::new(parse_expr_inner(single_arg(value))?)))),
        "$last" => Ok(Expr::ArrayOp(ArrayOp::Last(Box::new(parse_expr_inner(single_arg(value))?)))),
        "$slice" => {
            let arr = as_array(value, op)?;
            at_least(arr, 2, op)?;
            Ok(Expr::ArrayOp(ArrayOp::Slice {
                array: Box::new(parse_expr_inner(&arr[0])?),
                start: Box::new(parse_expr_inner(&arr[1])?),
                length: match arr.get(2) {
                    Some(v) => Some(Box::new(parse_expr_inner(v)?)),
                    None => None,
                },
            }))
        }
        "$concatArrays" => Ok(Expr::ArrayOp(ArrayOp::ConcatArrays(parse_exprs(as_array(value, op)?)?))),
        "$filter" => {
            let Bson::Document(d) = value else { bail!("{op} expects a document") };
            let input = Box::new(parse_expr_inner(doc_field(d, "input", op)?)?);
            let as_name = match d.get("as") {
                Some(Bson::String(s)) => s.clone(),
                _ => "this".to_string(),
            };
            let cond = Box::new(parse_expr_inner(doc_field(d, "cond", op)?)?);
            Ok(Expr::ArrayOp(ArrayOp::Filter { input, as_name, cond }))
        }
        "$map" => {
            let Bson::Document(d) = value else { bail!("{op} expects a document") };
            let input = Box::new(parse_expr_inner(doc_field(d, "input", op)?)?);
            let as_name = match d.get("as") {
                Some(Bson::String(s)) => s.clone(),
                _ => "this".to_string(),
            };
            let in_expr = Box::new(parse_expr_inner(doc_field(d, "in", op)?)?);
            Ok(Expr::ArrayOp(ArrayOp::Map { input, as_name, in_expr }))
        }
        "$reduce" => {
            let Bson::Document(d) = value else { bail!("{op} expects a document") };
            let input = Box::new(parse_expr_inner(doc_field(d, "input", op)?)?);
            let initial = Box::new(parse_expr_inner(doc_field(d, "initialValue", op)?)?);
            let in_expr = Box::new(parse_expr_inner(doc_field(d, "in", op)?)?);
            Ok(Expr::ArrayOp(ArrayOp::Reduce { input, initial, in_expr }))
        }

        // --- Accumulators (also reachable outside grouping; the stage
        // parser is the one that enforces the context restriction) -------
        "$sum" | "$avg" | "$min" | "$max" | "$first" | "$last" | "$push" | "$addToSet" => {
            Ok(Expr::Accumulator(parse_accumulator(op, value)?))
        }
        // --- Conditional -----------------------------------------------
        "$cond" => parse_cond(value),
        "$ifNull" => {
            let arr = at_least(as_array(value, op)?, 2, op)?;
            Ok(Expr::Conditional(Conditional::IfNull {
                candidates: parse_exprs(arr)?,
            }))
        }

        // --- Type conversion ---------------------------------------------
        "$toInt" => simple_convert(value, TypeConversionOp::ToInt),
        "$toLong" => simple_convert(value, TypeConversionOp::ToLong),
        "$toDouble" => simple_convert(value, TypeConversionOp::ToDouble),
        "$toDecimal" => simple_convert(value, TypeConversionOp::ToDecimal),
        "$toString" => simple_convert(value, TypeConversionOp::ToString),
        "$toBool" => simple_convert(value, TypeConversionOp::ToBool),
        "$toDate" => simple_convert(value, TypeConversionOp::ToDate),
        "$toObjectId" => simple_convert(value, TypeConversionOp::ToObjectId),
        "$type" => simple_convert(value, TypeConversionOp::Type),
        "$isNumber" => simple_convert(value, TypeConversionOp::IsNumber),
        "$isString" => simple_convert(value, TypeConversionOp::IsString),
        "$convert" => {
            let Bson::Document(d) = value else { bail!("$convert expects a document") };
            let arg = Box::new(parse_expr_inner(doc_field(d, "input", op)?)?);
            let on_error = match d.get("onError") {
                Some(v) => Some(Box::new(parse_expr_inner(v)?)),
                None => None,
            };
            let on_null = match d.get("onNull") {
                Some(v) => Some(Box::new(parse_expr_inner(v)?)),
                None => None,
            };
            let to = match doc_field(d, "to", op)? {
                Bson::String(s) => Some(s.clone()),
                _ => bail!("$convert.to must be a string"),
            };
            Ok(Expr::TypeConversion(TypeConversion {
                op: TypeConversionOp::Convert,
                arg,
                to,
                on_error,
                on_null,
            }))
        }

        // --- Object -------------------------------------------------------
        "$mergeObjects" => {
            let exprs = match value {
                Bson::Array(arr) => parse_exprs(arr)?,
                other => vec![parse_expr_inner(other)?],
            };
            Ok(Expr::ObjectOp(ObjectOp::MergeObjects(exprs)))
        }
        "$objectToArray" => Ok(Expr::ObjectOp(ObjectOp::ObjectToArray(Box::new(parse_expr_inner(single_arg(value))?)))),
        "$arrayToObject" => Ok(Expr::ObjectOp(ObjectOp::ArrayToObject(Box::new(parse_expr_inner(single_arg(value))?)))),

        other => return Err(crate::parser::UnknownOperatorError(other.to_string()).into()),
    }
}

fn simple_convert(value: &Bson, convert_op: TypeConversionOp) -> anyhow::Result<Expr> {
    Ok(Expr::TypeConversion(TypeConversion {
        op: convert_op,
        arg: Box::new(parse_expr_inner(single_arg(value))?),
        to: None,
        on_error: None,
        on_null: None,
    }))
}

fn parse_cond(value: &Bson) -> anyhow::Result<Expr> {
    let (condition, then_expr, else_expr) = match value {
        Bson::Array(arr) => {
            let arr = exactly(arr, 3, "$cond")?;
            (&arr[0], &arr[1], &arr[2])
        }
        Bson::Document(d) => (
            doc_field(d, "if", "$cond")?,
            doc_field(d, "then", "$cond")?,
            doc_field(d, "else", "$cond")?,
        ),
        _ => bail!("$cond expects an array or document"),
    };
    Ok(Expr::Conditional(Conditional::Cond {
        condition: Box::new(parse_expr_inner(condition)?),
        then_expr: Box::new(parse_expr_inner(then_expr)?),
        else_expr: Box::new(parse_expr_inner(else_expr)?),
    }))
}

/// Parses one accumulator expression, e.g. the value side of a `$group`
/// output field: `{"total": {"$sum": "$amount"}}`.
pub fn parse_accumulator(op: &str, value: &Bson) -> anyhow::Result<Accumulator> {
    let accumulator_op = match op {
        "$sum" => AccumulatorOp::Sum,
        "$avg" => AccumulatorOp::Avg,
        "$min" => AccumulatorOp::Min,
        "$max" => AccumulatorOp::Max,
        "$first" => AccumulatorOp::First,
        "$last" => AccumulatorOp::Last,
        "$push" => AccumulatorOp::Push,
        "$addToSet" => AccumulatorOp::AddToSet,
        other => bail!("'{other}' is not an accumulator operator"),
    };
    let arg = Box::new(parse_expr_inner(value).context("parsing accumulator argument")?);
    Ok(Accumulator {
        op: accumulator_op,
        arg: Some(arg),
    })
}

/// `$count`'s accumulator form, which takes no argument.
pub fn count_accumulator() -> Accumulator {
    Accumulator {
        op: AccumulatorOp::Count,
        arg: None,
    }
}
