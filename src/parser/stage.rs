//! One sub-parser per pipeline stage, dispatching on the stage document's
//! single `$`-prefixed key.

use anyhow::{anyhow, bail};
use bson::{Bson, Document};

use crate::ast::expr::{Accumulator, Expr};
use crate::ast::stage::{
    Bucket, BucketAuto, GraphLookup, Group, Lookup, OutSpec, ProjectedField, Projection,
    SetWindowFields, Sort, SortDirection, Stage, Unwind, UnionWith, WindowOutput,
};
use crate::error::{Error, Result};
use crate::parser::expr::parse_expr;
use crate::parser::filter::parse_match_filter;
use crate::parser::UnknownOperatorError;
use crate::validator;
use crate::warnings::Warning;

/// Parses an ordered sequence of stage documents into `Stage` values.
///
/// When `strict_mode` is true, a stage (or an expression nested inside one)
/// naming an unrecognized operator is a hard [`Error::UnknownOperator`].
/// When false, that stage is dropped instead and a warning describing the
/// drop is returned alongside the stages that did parse (§7). Any other
/// parse failure (malformed structure, wrong BSON type, missing required
/// field) is always fatal regardless of `strict_mode`.
pub fn parse_pipeline(docs: &[Document], strict_mode: bool) -> Result<(Vec<Stage>, Vec<Warning>)> {
    let mut stages = Vec::with_capacity(docs.len());
    let mut warnings = Vec::new();
    for doc in docs {
        match parse_stage_inner(doc) {
            Ok(stage) => stages.push(stage),
            Err(e) => match e.downcast::<UnknownOperatorError>() {
                Ok(unknown) if !strict_mode => {
                    warnings.push(Warning::new(
                        "unknown_operator.stage_dropped",
                        format!("unrecognized operator '{}'; stage dropped (strict_mode is off)", unknown.0),
                    ));
                }
                Ok(unknown) => return Err(Error::unknown_operator(unknown.0)),
                Err(e) => return Err(e.into()),
            },
        }
    }
    Ok((stages, warnings))
}

/// Parses a single stage document, always in strict mode — used by callers
/// (and this module's own tests) that want one stage in isolation rather
/// than the drop-on-unknown-operator behavior of [`parse_pipeline`].
pub fn parse_stage(doc: &Document) -> Result<Stage> {
    match parse_stage_inner(doc) {
        Ok(stage) => Ok(stage),
        Err(e) => match e.downcast::<UnknownOperatorError>() {
            Ok(unknown) => Err(Error::unknown_operator(unknown.0)),
            Err(e) => Err(e.into()),
        },
    }
}

fn single_key(doc: &Document) -> anyhow::Result<(&str, &Bson)> {
    if doc.len() != 1 {
        bail!("a stage document must have exactly one top-level key, got {}", doc.len());
    }
    let (k, v) = doc.iter().next().unwrap();
    if !k.starts_with('$') {
        bail!("stage key '{k}' must start with '$'");
    }
    Ok((k.as_str(), v))
}

fn as_doc(value: &Bson, op: &str) -> anyhow::Result<&Document> {
    match value {
        Bson::Document(d) => Ok(d),
        _ => bail!("{op} expects a document argument"),
    }
}

fn as_i64(value: &Bson, op: &str) -> anyhow::Result<i64> {
    match value {
        Bson::Int32(n) => Ok(*n as i64),
        Bson::Int64(n) => Ok(*n),
        Bson::Double(d) => Ok(*d as i64),
        _ => bail!("{op} expects a numeric argument"),
    }
}

fn doc_field<'a>(doc: &'a Document, key: &str, op: &str) -> anyhow::Result<&'a Bson> {
    doc.get(key).ok_or_else(|| anyhow!("{op} requires a '{key}' field"))
}

fn opt_str(doc: &Document, key: &str) -> Option<String> {
    match doc.get(key) {
        Some(Bson::String(s)) => Some(s.clone()),
        _ => None,
    }
}

fn strip_field_sigil(s: &str) -> String {
    s.strip_prefix('$').unwrap_or(s).to_string()
}

fn parse_stage_inner(doc: &Document) -> anyhow::Result<Stage> {
    let (key, value) = single_key(doc)?;
    match key {
        "$match" => Ok(Stage::Match(parse_match_filter(as_doc(value, key)?)?)),
        "$project" => Ok(Stage::Project(parse_projection(value)?)),
        "$addFields" | "$set" => Ok(Stage::AddFields(parse_field_expr_map(value)?)),
        "$unset" => Ok(Stage::Project(parse_unset(value)?)),
        "$replaceRoot" => {
            let d = as_doc(value, key)?;
            Ok(Stage::ReplaceRoot(parse_expr(doc_field(d, "newRoot", key)?)?))
        }
        "$replaceWith" => Ok(Stage::ReplaceRoot(parse_expr(value)?)),
        "$group" => Ok(Stage::Group(parse_group(value)?)),
        "$sort" => Ok(Stage::Sort(parse_sort(value)?)),
        "$skip" => Ok(Stage::Skip(as_i64(value, key)?)),
        "$limit" => Ok(Stage::Limit(as_i64(value, key)?)),
        "$sample" => {
            let d = as_doc(value, key)?;
            Ok(Stage::Sample(as_i64(doc_field(d, "size", key)?, key)?))
        }
        "$count" => match value {
            Bson::String(name) => Ok(Stage::Count(name.clone())),
            _ => bail!("$count expects a field name string"),
        },
        "$lookup" => Ok(Stage::Lookup(parse_lookup(value)?)),
        "$unwind" => Ok(Stage::Unwind(parse_unwind(value)?)),
        "$unionWith" => Ok(Stage::UnionWith(parse_union_with(value)?)),
        "$out" => Ok(Stage::Out(parse_out(value)?)),
        "$bucket" => Ok(Stage::Bucket(parse_bucket(value)?)),
        "$bucketAuto" => Ok(Stage::BucketAuto(parse_bucket_auto(value)?)),
        "$facet" => Ok(Stage::Facet(parse_facet(value)?)),
        "$graphLookup" => Ok(Stage::GraphLookup(parse_graph_lookup(value)?)),
        "$setWindowFields" => Ok(Stage::SetWindowFields(parse_set_window_fields(value)?)),
        "$redact" => Ok(Stage::Redact(parse_expr(value)?)),
        other => return Err(UnknownOperatorError(other.to_string()).into()),
    }
}

fn parse_field_expr_map(value: &Bson) -> anyhow::Result<Vec<(String, Expr)>> {
    let Bson::Document(d) = value else {
        bail!("expected a document of field: expression pairs");
    };
    let mut out = Vec::with_capacity(d.len());
    for (k, v) in d.iter() {
        out.push((k.clone(), parse_expr(v)?));
    }
    Ok(out)
}

fn is_falsy_projection_value(value: &Bson) -> bool {
    matches!(value, Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false))
}

fn is_truthy_projection_value(value: &Bson) -> bool {
    matches!(value, Bson::Int32(1) | Bson::Int64(1) | Bson::Boolean(true))
}

fn parse_projection(value: &Bson) -> anyhow::Result<Projection> {
    let Bson::Document(d) = value else {
        bail!("$project expects a document");
    };
    let mut exclude_id = false;
    let mut fields = Vec::with_capacity(d.len());
    let mut saw_include = false;
    let mut saw_exclude = false;
    for (k, v) in d.iter() {
        if k == "_id" {
            if is_falsy_projection_value(v) {
                exclude_id = true;
            }
            continue;
        }
        let field = if is_truthy_projection_value(v) {
            saw_include = true;
            ProjectedField::Include
        } else if is_falsy_projection_value(v) {
            saw_exclude = true;
            ProjectedField::Exclude
        } else {
            saw_include = true;
            ProjectedField::Computed(parse_expr(v)?)
        };
        fields.push((k.clone(), field));
    }
    if saw_include && saw_exclude {
        bail!("$project cannot mix inclusion and exclusion (other than on _id)");
    }
    Ok(Projection { exclude_id, fields })
}

fn parse_unset(value: &Bson) -> anyhow::Result<Projection> {
    let names: Vec<String> = match value {
        Bson::String(s) => vec![s.clone()],
        Bson::Array(arr) => arr
            .iter()
            .map(|v| match v {
                Bson::String(s) => Ok(s.clone()),
                _ => Err(anyhow!("$unset array elements must be strings")),
            })
            .collect::<anyhow::Result<Vec<_>>>()?,
        _ => bail!("$unset expects a string or array of strings"),
    };
    let mut exclude_id = false;
    let mut fields = Vec::with_capacity(names.len());
    for name in names {
        if name == "_id" {
            exclude_id = true;
        } else {
            fields.push((name, ProjectedField::Exclude));
        }
    }
    Ok(Projection { exclude_id, fields })
}

fn parse_sort(value: &Bson) -> anyhow::Result<Sort> {
    let Bson::Document(d) = value else {
        bail!("$sort expects a document");
    };
    let mut keys = Vec::with_capacity(d.len());
    for (k, v) in d.iter() {
        let direction = match v {
            Bson::Int32(1) | Bson::Int64(1) | Bson::Double(1.0) => SortDirection::Asc,
            Bson::Int32(-1) | Bson::Int64(-1) | Bson::Double(d) if *d == -1.0 => SortDirection::Desc,
            _ => bail!("unsupported $sort specification for field '{k}'"),
        };
        keys.push((k.clone(), direction));
    }
    Ok(Sort { keys, limit_hint: None })
}

fn accumulator_from_single_key_doc(value: &Bson) -> anyhow::Result<Accumulator> {
    let Bson::Document(d) = value else {
        bail!("expected an accumulator document with a single '$op' key");
    };
    if d.len() != 1 {
        bail!("accumulator document must have exactly one operator key");
    }
    let (op, arg) = d.iter().next().unwrap();
    if op == "$count" {
        return Ok(crate::parser::expr::count_accumulator());
    }
    crate::parser::expr::parse_accumulator(op, arg)
}

fn parse_output_map(value: Option<&Bson>) -> anyhow::Result<Vec<(String, Accumulator)>> {
    let mut out = Vec::new();
    if let Some(Bson::Document(d)) = value {
        for (k, v) in d.iter() {
            out.push((k.clone(), accumulator_from_single_key_doc(v)?));
        }
    }
    Ok(out)
}

fn parse_group(value: &Bson) -> anyhow::Result<Group> {
    let Bson::Document(d) = value else {
        bail!("$group expects a document");
    };
    let id = parse_expr(doc_field(d, "_id", "$group")?)?;
    let mut fields = Vec::with_capacity(d.len());
    for (k, v) in d.iter() {
        if k == "_id" {
            continue;
        }
        fields.push((k.clone(), accumulator_from_single_key_doc(v)?));
    }
    Ok(Group { id, fields })
}

fn parse_sub_pipeline(value: Option<&Bson>) -> anyhow::Result<Option<Vec<Stage>>> {
    match value {
        None => Ok(None),
        Some(Bson::Array(arr)) => {
            let mut docs = Vec::with_capacity(arr.len());
            for item in arr {
                match item {
                    Bson::Document(d) => docs.push(parse_stage_inner(d)?),
                    _ => bail!("sub-pipeline elements must be stage documents"),
                }
            }
            Ok(Some(docs))
        }
        Some(_) => bail!("pipeline field must be an array of stage documents"),
    }
}

fn parse_lookup(value: &Bson) -> anyhow::Result<Lookup> {
    let d = as_doc(value, "$lookup")?;
    let from = match doc_field(d, "from", "$lookup")? {
        Bson::String(s) => validator::validate_table_name(s)?,
        _ => bail!("$lookup.from must be a string"),
    };
    let as_name = match doc_field(d, "as", "$lookup")? {
        Bson::String(s) => s.clone(),
        _ => bail!("$lookup.as must be a string"),
    };
    let local_field = opt_str(d, "localField");
    let foreign_field = opt_str(d, "foreignField");

    let mut let_vars = Vec::new();
    if let Some(Bson::Document(let_doc)) = d.get("let") {
        for (k, v) in let_doc.iter() {
            let_vars.push((k.clone(), parse_expr(v)?));
        }
    }
    let pipeline = parse_sub_pipeline(d.get("pipeline"))?;

    Ok(Lookup {
        from,
        local_field,
        foreign_field,
        as_name,
        let_vars,
        pipeline,
    })
}

fn parse_unwind(value: &Bson) -> anyhow::Result<Unwind> {
    match value {
        Bson::String(s) => Ok(Unwind {
            path: strip_field_sigil(s),
            preserve_null_and_empty_arrays: false,
            include_array_index: None,
        }),
        Bson::Document(d) => {
            let path = match doc_field(d, "path", "$unwind")? {
                Bson::String(s) => strip_field_sigil(s),
                _ => bail!("$unwind.path must be a string"),
            };
            let preserve = matches!(d.get("preserveNullAndEmptyArrays"), Some(Bson::Boolean(true)));
            let include_array_index = opt_str(d, "includeArrayIndex");
            Ok(Unwind {
                path,
                preserve_null_and_empty_arrays: preserve,
                include_array_index,
            })
        }
        _ => bail!("$unwind expects a string or document"),
    }
}

fn parse_union_with(value: &Bson) -> anyhow::Result<UnionWith> {
    match value {
        Bson::String(s) => Ok(UnionWith {
            collection: validator::validate_table_name(s)?,
            pipeline: Vec::new(),
        }),
        Bson::Document(d) => {
            let collection = match doc_field(d, "coll", "$unionWith")? {
                Bson::String(s) => validator::validate_table_name(s)?,
                _ => bail!("$unionWith.coll must be a string"),
            };
            let pipeline = parse_sub_pipeline(d.get("pipeline"))?.unwrap_or_default();
            Ok(UnionWith { collection, pipeline })
        }
        _ => bail!("$unionWith expects a string or document"),
    }
}

fn parse_out(value: &Bson) -> anyhow::Result<OutSpec> {
    match value {
        Bson::String(s) => Ok(OutSpec {
            collection: validator::validate_table_name(s)?,
            schema: None,
        }),
        Bson::Document(d) => {
            let collection = match doc_field(d, "coll", "$out")? {
                Bson::String(s) => validator::validate_table_name(s)?,
                _ => bail!("$out.coll must be a string"),
            };
            let schema = match d.get("db") {
                Some(Bson::String(s)) => Some(validator::validate_table_name(s)?),
                _ => None,
            };
            Ok(OutSpec { collection, schema })
        }
        _ => bail!("$out expects a string or document"),
    }
}

fn parse_bucket(value: &Bson) -> anyhow::Result<Bucket> {
    let d = as_doc(value, "$bucket")?;
    let group_by = parse_expr(doc_field(d, "groupBy", "$bucket")?)?;
    let Bson::Array(boundary_vals) = doc_field(d, "boundaries", "$bucket")? else {
        bail!("$bucket.boundaries must be an array");
    };
    let mut boundaries = Vec::with_capacity(boundary_vals.len());
    for v in boundary_vals {
        boundaries.push(parse_expr(v)?);
    }
    let default = match d.get("default") {
        Some(v) => Some(parse_expr(v)?),
        None => None,
    };
    let output = parse_output_map(d.get("output"))?;
    Ok(Bucket {
        group_by,
        boundaries,
        default,
        output,
    })
}

fn parse_bucket_auto(value: &Bson) -> anyhow::Result<BucketAuto> {
    let d = as_doc(value, "$bucketAuto")?;
    let group_by = parse_expr(doc_field(d, "groupBy", "$bucketAuto")?)?;
    let buckets = as_i64(doc_field(d, "buckets", "$bucketAuto")?, "$bucketAuto")?;
    let output = parse_output_map(d.get("output"))?;
    Ok(BucketAuto {
        group_by,
        buckets,
        output,
    })
}

fn parse_facet(value: &Bson) -> anyhow::Result<Vec<(String, Vec<Stage>)>> {
    let d = as_doc(value, "$facet")?;
    let mut out = Vec::with_capacity(d.len());
    for (name, sub) in d.iter() {
        let pipeline = parse_sub_pipeline(Some(sub))?
            .ok_or_else(|| anyhow!("$facet.{name} must be an array of stages"))?;
        out.push((name.clone(), pipeline));
    }
    Ok(out)
}

fn parse_graph_lookup(value: &Bson) -> anyhow::Result<GraphLookup> {
    let d = as_doc(value, "$graphLookup")?;
    let from = match doc_field(d, "from", "$graphLookup")? {
        Bson::String(s) => validator::validate_table_name(s)?,
        _ => bail!("$graphLookup.from must be a string"),
    };
    let start_with = parse_expr(doc_field(d, "startWith", "$graphLookup")?)?;
    let connect_from_field = match doc_field(d, "connectFromField", "$graphLookup")? {
        Bson::String(s) => s.clone(),
        _ => bail!("$graphLookup.connectFromField must be a string"),
    };
    let connect_to_field = match doc_field(d, "connectToField", "$graphLookup")? {
        Bson::String(s) => s.clone(),
        _ => bail!("$graphLookup.connectToField must be a string"),
    };
    let as_name = match doc_field(d, "as", "$graphLookup")? {
        Bson::String(s) => s.clone(),
        _ => bail!("$graphLookup.as must be a string"),
    };
    let max_depth = match d.get("maxDepth") {
        Some(v) => Some(as_i64(v, "$graphLookup")?),
        None => None,
    };
    let depth_field = opt_str(d, "depthField");
    let restrict_search_with_match = match d.get("restrictSearchWithMatch") {
        Some(Bson::Document(rd)) => Some(parse_match_filter(rd)?),
        Some(_) => bail!("$graphLookup.restrictSearchWithMatch must be a document"),
        None => None,
    };
    Ok(GraphLookup {
        from,
        start_with,
        connect_from_field,
        connect_to_field,
        as_name,
        max_depth,
        depth_field,
        restrict_search_with_match,
    })
}

fn parse_set_window_fields(value: &Bson) -> anyhow::Result<SetWindowFields> {
    let d = as_doc(value, "$setWindowFields")?;
    let partition_by = match d.get("partitionBy") {
        Some(v) => Some(parse_expr(v)?),
        None => None,
    };
    let mut sort_by = Vec::new();
    if let Some(Bson::Document(sort_doc)) = d.get("sortBy") {
        for (k, v) in sort_doc.iter() {
            let direction = match v {
                Bson::Int32(1) | Bson::Int64(1) => SortDirection::Asc,
                Bson::Int32(-1) | Bson::Int64(-1) => SortDirection::Desc,
                _ => bail!("unsupported $setWindowFields.sortBy specification for '{k}'"),
            };
            sort_by.push((k.clone(), direction));
        }
    }
    let mut output = Vec::new();
    if let Some(Bson::Document(out_doc)) = d.get("output") {
        for (alias, spec) in out_doc.iter() {
            let Bson::Document(spec_doc) = spec else {
                bail!("$setWindowFields.output.{alias} must be a document");
            };
            let (op, arg) = spec_doc
                .iter()
                .find(|(k, _)| *k != "window")
                .ok_or_else(|| anyhow!("$setWindowFields.output.{alias} has no accumulator key"))?;
            let function = if op == "$count" {
                crate::parser::expr::count_accumulator()
            } else {
                crate::parser::expr::parse_accumulator(op, arg)?
            };
            output.push(WindowOutput {
                alias: alias.clone(),
                function,
            });
        }
    }
    Ok(SetWindowFields {
        partition_by,
        sort_by,
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn parses_limit_and_skip() {
        assert_eq!(parse_stage(&doc! {"$limit": 10}).unwrap(), Stage::Limit(10));
        assert_eq!(parse_stage(&doc! {"$skip": 20}).unwrap(), Stage::Skip(20));
    }

    #[test]
    fn parses_count_as_count_variant() {
        assert_eq!(
            parse_stage(&doc! {"$count": "total"}).unwrap(),
            Stage::Count("total".to_string())
        );
    }

    #[test]
    fn set_desugars_to_add_fields() {
        let stage = parse_stage(&doc! {"$set": {"x": 1}}).unwrap();
        assert!(matches!(stage, Stage::AddFields(_)));
    }

    #[test]
    fn replace_with_desugars_to_replace_root() {
        let stage = parse_stage(&doc! {"$replaceWith": "$doc"}).unwrap();
        assert!(matches!(stage, Stage::ReplaceRoot(_)));
    }

    #[test]
    fn project_rejects_mixed_inclusion_exclusion() {
        assert!(parse_stage(&doc! {"$project": {"a": 1, "b": 0}}).is_err());
    }

    #[test]
    fn project_allows_id_exclusion_alongside_inclusion() {
        let stage = parse_stage(&doc! {"$project": {"a": 1, "_id": 0}}).unwrap();
        match stage {
            Stage::Project(p) => assert!(p.exclude_id),
            other => panic!("expected Project, got {other:?}"),
        }
    }

    #[test]
    fn lookup_parses_simple_equality_form() {
        let stage = parse_stage(&doc! {
            "$lookup": {"from": "items", "localField": "_id", "foreignField": "orderId", "as": "lines"}
        })
        .unwrap();
        match stage {
            Stage::Lookup(l) => {
                assert_eq!(l.from, "items");
                assert_eq!(l.as_name, "lines");
                assert_eq!(l.local_field.as_deref(), Some("_id"));
            }
            other => panic!("expected Lookup, got {other:?}"),
        }
    }

    #[test]
    fn facet_parses_nested_pipelines() {
        let stage = parse_stage(&doc! {
            "$facet": {"counts": [{"$count": "n"}]}
        })
        .unwrap();
        match stage {
            Stage::Facet(facets) => {
                assert_eq!(facets.len(), 1);
                assert_eq!(facets[0].0, "counts");
                assert_eq!(facets[0].1.len(), 1);
            }
            other => panic!("expected Facet, got {other:?}"),
        }
    }

    #[test]
    fn group_requires_underscore_id() {
        assert!(parse_stage(&doc! {"$group": {"total": {"$sum": "$amount"}}}).is_err());
    }

    #[test]
    fn group_with_sum_parses() {
        let stage = parse_stage(&doc! {
            "$group": {"_id": "$category", "total": {"$sum": "$amount"}}
        })
        .unwrap();
        match stage {
            Stage::Group(g) => assert_eq!(g.fields.len(), 1),
            other => panic!("expected Group, got {other:?}"),
        }
    }
}
