//! Parses `$match`-style filter documents (and `$graphLookup`'s
//! `restrictSearchWithMatch`) into a boolean [`Expr`] tree.
//!
//! This is deliberately a separate entry point from [`crate::parser::expr`]:
//! MongoDB's query-predicate syntax (`{field: {$gt: 5}}`, implicit
//! equality, `{field: {$exists: true}}`) is a different grammar from its
//! expression language, even though both bottom out in the same [`Expr`]
//! variants where they overlap (`Comparison`, `Logical`).

use anyhow::bail;
use bson::{Bson, Document};

use crate::ast::expr::{
    CompareOp, Comparison, ComparisonOperand, Exists, Expr, FieldPath, InList, Logical, LogicalOp,
};
use crate::error::Result;
use crate::parser::expr::parse_expr;
use crate::validator;

/// Parses a complete `$match` filter document (or an equivalent
/// sub-document such as `restrictSearchWithMatch`) into a single boolean
/// expression, ANDing together every top-level clause.
pub fn parse_match_filter(doc: &Document) -> Result<Expr> {
    Ok(parse_filter_inner(doc)?)
}

fn parse_filter_inner(doc: &Document) -> anyhow::Result<Expr> {
    let mut clauses = Vec::with_capacity(doc.len());
    for (key, value) in doc.iter() {
        match key.as_str() {
            "$and" => clauses.push(logical_of(LogicalOp::And, value)?),
            "$or" => clauses.push(logical_of(LogicalOp::Or, value)?),
            "$nor" => clauses.push(logical_of(LogicalOp::Nor, value)?),
            "$expr" => clauses.push(parse_expr(value)?),
            other if other.starts_with('$') => {
                bail!("unsupported top-level operator '{other}' in a match filter")
            }
            field => clauses.push(parse_field_predicate(field, value)?),
        }
    }
    Ok(and_all(clauses))
}

fn and_all(mut clauses: Vec<Expr>) -> Expr {
    if clauses.len() == 1 {
        clauses.pop().unwrap()
    } else {
        Expr::Logical(Logical {
            op: LogicalOp::And,
            children: clauses,
        })
    }
}

fn logical_of(op: LogicalOp, value: &Bson) -> anyhow::Result<Expr> {
    let Bson::Array(items) = value else {
        bail!("logical operator expects an array of sub-filters");
    };
    let mut children = Vec::with_capacity(items.len());
    for item in items {
        let Bson::Document(d) = item else {
            bail!("logical operator array elements must be documents");
        };
        children.push(parse_filter_inner(d)?);
    }
    Ok(Expr::Logical(Logical { op, children }))
}

fn parse_field_predicate(field: &str, value: &Bson) -> anyhow::Result<Expr> {
    let segments = validator::validate_and_normalize_field_path(field)?;
    let path = FieldPath::new(segments);

    match value {
        Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')) => {
            let mut preds = Vec::with_capacity(d.len());
            for (op, op_value) in d.iter() {
                preds.push(parse_field_operator(&path, op, op_value)?);
            }
            Ok(and_all(preds))
        }
        other => Ok(Expr::Comparison(Comparison {
            op: CompareOp::Eq,
            left: Box::new(Expr::FieldPath(path)),
            right: ComparisonOperand::Single(Box::new(parse_expr(other)?)),
        })),
    }
}

fn parse_field_operator(field: &FieldPath, op: &str, value: &Bson) -> anyhow::Result<Expr> {
    match op {
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
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
                left: Box::new(Expr::FieldPath(field.clone())),
                right: ComparisonOperand::Single(Box::new(parse_expr(value)?)),
            }))
        }
        "$in" | "$nin" => {
            let Bson::Array(items) = value else {
                bail!("{op} expects an array of values");
            };
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(parse_expr(item)?);
            }
            Ok(Expr::InList(InList {
                field: field.clone(),
                values,
                negated: op == "$nin",
            }))
        }
        "$exists" => {
            let polarity = match value {
                Bson::Boolean(b) => *b,
                _ => bail!("$exists expects a boolean"),
            };
            Ok(Expr::Exists(Exists {
                field: field.clone(),
                polarity,
            }))
        }
        "$not" => {
            let Bson::Document(d) = value else {
                bail!("$not expects a document of operators");
            };
            let mut preds = Vec::with_capacity(d.len());
            for (inner_op, inner_value) in d.iter() {
                preds.push(parse_field_operator(field, inner_op, inner_value)?);
            }
            Ok(Expr::Logical(Logical {
                op: LogicalOp::Not,
                children: vec![and_all(preds)],
            }))
        }
        other => bail!("unsupported match operator '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn implicit_equality_becomes_comparison() {
        let expr = parse_match_filter(&doc! {"status": "active"}).unwrap();
        match expr {
            Expr::Comparison(c) => assert_eq!(c.op, CompareOp::Eq),
            other => panic!("expected Comparison, got {other:?}"),
        }
    }

    #[test]
    fn multiple_top_level_fields_and_together() {
        let expr = parse_match_filter(&doc! {"status": "active", "total": 5}).unwrap();
        match expr {
            Expr::Logical(l) => {
                assert_eq!(l.op, LogicalOp::And);
                assert_eq!(l.children.len(), 2);
            }
            other => panic!("expected Logical And, got {other:?}"),
        }
    }

    #[test]
    fn exists_operator_parses() {
        let expr = parse_match_filter(&doc! {"shipped": {"$exists": true}}).unwrap();
        match expr {
            Expr::Exists(e) => assert!(e.polarity),
            other => panic!("expected Exists, got {other:?}"),
        }
    }

    #[test]
    fn in_operator_parses_to_in_list() {
        let expr = parse_match_filter(&doc! {"category": {"$in": ["a", "b"]}}).unwrap();
        match expr {
            Expr::InList(l) => {
                assert!(!l.negated);
                assert_eq!(l.values.len(), 2);
            }
            other => panic!("expected InList, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unsupported_query_operator() {
        assert!(parse_match_filter(&doc! {"tags": {"$all": ["a"]}}).is_err());
    }

    #[test]
    fn rejects_system_variable_field() {
        assert!(parse_match_filter(&doc! {"$$ROOT": "x"}).is_err());
    }
}
