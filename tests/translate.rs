//! End-to-end coverage of `aggora::translate` against whole pipelines, as a
//! caller using the public API would exercise it.

use aggora::{Capability, Configuration, Error, Options};
use bson::{doc, Bson, Document};

fn translate(stages: Vec<Document>) -> aggora::Result<aggora::TranslationResult> {
    let config = Configuration::new("orders");
    let options = Options::default();
    aggora::translate(&stages, &config, &options)
}

fn translate_with_options(
    stages: Vec<Document>,
    options: Options,
) -> aggora::Result<aggora::TranslationResult> {
    let config = Configuration::new("orders");
    aggora::translate(&stages, &config, &options)
}

#[test]
fn simple_limit() {
    let result = translate(vec![doc! {"$limit": 5}]).unwrap();
    assert_eq!(
        result.sql,
        "SELECT data\nFROM orders\nFETCH FIRST 5 ROWS ONLY"
    );
    assert_eq!(result.capability, Capability::FullSupport);
}

#[test]
fn skip_and_limit() {
    let result = translate(vec![doc! {"$skip": 10}, doc! {"$limit": 5}]).unwrap();
    assert!(result.sql.contains("OFFSET 10 ROWS"));
    assert!(result.sql.contains("FETCH FIRST 5 ROWS ONLY"));
}

#[test]
fn match_binds_a_literal() {
    let result = translate(vec![doc! {"$match": {"status": "active"}}]).unwrap();
    assert!(result.sql.contains("WHERE"));
    assert!(result.sql.contains(":1"));
    assert_eq!(result.binds, vec![Bson::String("active".to_string())]);
}

#[test]
fn group_with_sum() {
    let result = translate(vec![doc! {
        "$group": {"_id": "$category", "total": {"$sum": "$amount"}},
    }])
    .unwrap();
    assert!(result.sql.contains("GROUP BY"));
    assert!(result.sql.contains("SUM("));
    assert!(result.sql.contains("AS \"category\""));
    assert!(result.sql.contains("AS \"total\""));
}

#[test]
fn sort_then_limit() {
    let result = translate(vec![
        doc! {"$sort": {"amount": -1}},
        doc! {"$limit": 3},
    ])
    .unwrap();
    assert!(result.sql.contains("ORDER BY"));
    assert!(result.sql.contains("DESC"));
    assert!(result.sql.contains("FETCH FIRST 3 ROWS ONLY"));
}

#[test]
fn lookup_introduces_a_base_alias_and_qualifies_the_join() {
    let result = translate(vec![doc! {
        "$lookup": {
            "from": "items",
            "localField": "_id",
            "foreignField": "order_id",
            "as": "items",
        },
    }])
    .unwrap();
    assert!(result.sql.contains("FROM orders base_0"));
    assert!(result.sql.contains("LEFT OUTER JOIN items"));
    assert!(result.sql.contains("base_0.data"));
}

#[test]
fn unknown_operator_is_fatal_by_default() {
    let err = translate(vec![doc! {"$madeUpStage": {}}]).unwrap_err();
    assert!(matches!(err, Error::UnknownOperator { .. }));
}

#[test]
fn unknown_operator_is_dropped_with_a_warning_when_strict_mode_is_off() {
    let options = Options {
        strict_mode: false,
        ..Options::default()
    };
    let result = translate_with_options(
        vec![doc! {"$madeUpStage": {}}, doc! {"$limit": 5}],
        options,
    )
    .unwrap();
    assert!(result.sql.contains("FETCH FIRST 5 ROWS ONLY"));
    assert_eq!(result.capability, Capability::Partial);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.code == "unknown_operator.stage_dropped"));
}

#[test]
fn lookup_consumed_by_size_elides_its_join() {
    let result = translate(vec![
        doc! {"$lookup": {
            "from": "items",
            "localField": "_id",
            "foreignField": "order_id",
            "as": "items",
        }},
        doc! {"$project": {"item_count": {"$size": "$items"}}},
    ])
    .unwrap();
    assert!(!result.sql.contains("LEFT OUTER JOIN items"));
    assert!(result.sql.contains("(SELECT COUNT(*) FROM items"));
    assert!(result.sql.contains("AS \"item_count\""));
}

#[test]
fn adjacent_matches_merge_into_one_where() {
    let result = translate(vec![
        doc! {"$match": {"status": "active"}},
        doc! {"$match": {"total": {"$gt": 100}}},
    ])
    .unwrap();
    assert_eq!(result.sql.matches("WHERE").count(), 1);
    assert_eq!(result.binds.len(), 2);
    assert!(result.sql.contains(":1") && result.sql.contains(":2"));
}

#[test]
fn empty_pipeline_selects_the_whole_document() {
    let result = translate(vec![]).unwrap();
    assert_eq!(result.sql, "SELECT data\nFROM orders");
    assert!(result.binds.is_empty());
    assert_eq!(result.capability, Capability::FullSupport);
}

#[test]
fn limit_zero_is_honored_literally() {
    let result = translate(vec![doc! {"$limit": 0}]).unwrap();
    assert!(result.sql.contains("FETCH FIRST 0 ROWS ONLY"));
}

#[test]
fn root_system_variable_is_rejected() {
    let err = translate(vec![doc! {"$group": {"_id": "$$ROOT"}}]).unwrap_err();
    assert!(matches!(err, Error::ValidationError(_)));
}

#[test]
fn negative_array_elem_at_index_renders_as_last_offset() {
    let result = translate(vec![doc! {
        "$project": {"last_tag": {"$arrayElemAt": ["$tags", -1]}},
    }])
    .unwrap();
    assert!(result.sql.contains("[last]"));
    assert!(result.sql.contains("AS \"last_tag\""));
}

#[test]
fn second_to_last_array_elem_at_uses_last_minus_offset() {
    let result = translate(vec![doc! {
        "$project": {"prev_tag": {"$arrayElemAt": ["$tags", -2]}},
    }])
    .unwrap();
    assert!(result.sql.contains("[last-1]"));
}

#[test]
fn graph_lookup_reports_single_hop_partial_support() {
    let result = translate(vec![doc! {
        "$graphLookup": {
            "from": "employees",
            "startWith": "$reports_to",
            "connectFromField": "reports_to",
            "connectToField": "_id",
            "as": "chain",
        },
    }])
    .unwrap();
    assert!(result.sql.contains("LEFT OUTER JOIN employees"));
    assert_eq!(result.capability, Capability::Partial);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.code == "graph_lookup.single_hop_only"));
}

#[test]
fn facet_produces_one_column_per_branch() {
    let result = translate(vec![doc! {
        "$facet": {
            "cheap": [{"$match": {"tier": "low"}}],
            "count": [{"$count": "n"}],
        },
    }])
    .unwrap();
    assert!(result.sql.contains("FROM DUAL"));
    assert!(result.sql.contains("AS \"cheap\""));
    assert!(result.sql.contains("AS \"count\""));
}

#[test]
fn translation_is_deterministic() {
    let stages = vec![
        doc! {"$match": {"status": "active"}},
        doc! {"$sort": {"amount": -1}},
        doc! {"$limit": 10},
    ];
    let first = translate(stages.clone()).unwrap();
    let second = translate(stages).unwrap();
    assert_eq!(first.sql, second.sql);
    assert_eq!(first.binds, second.binds);
}

#[test]
fn redact_renders_as_row_level_predicate_and_grades_partial() {
    let result = translate(vec![doc! {
        "$redact": {
            "$cond": {
                "if": {"$eq": ["$level", "public"]},
                "then": "KEEP",
                "else": "PRUNE",
            },
        },
    }])
    .unwrap();
    assert!(result.sql.contains("WHERE"));
    assert!(result.sql.contains("= 'KEEP'"));
    assert_eq!(result.capability, Capability::Partial);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.code == "redact.row_level_predicate_only"));
}
