//! The stage side of the AST: one variant per pipeline stage, each a value
//! object holding typed children built entirely from [`crate::ast::expr`]
//! types — no raw BSON survives parsing.

use crate::ast::expr::{Accumulator, Expr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectedField {
    Include,
    Exclude,
    Computed(Expr),
}

/// `$project`.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub exclude_id: bool,
    pub fields: Vec<(String, ProjectedField)>,
}

/// `$group`. `id` is required (may be `Expr::Literal(Bson::Null)`); `fields`
/// is an ordered alias→accumulator list.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub id: Expr,
    pub fields: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub keys: Vec<(String, SortDirection)>,
    /// Set by the Sort+Limit-fusion optimizer pass; `None` until then.
    /// See §4.7.
    pub limit_hint: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub from: String,
    pub local_field: Option<String>,
    pub foreign_field: Option<String>,
    pub as_name: String,
    /// Populated only for the `let`+`pipeline` correlated form.
    pub let_vars: Vec<(String, Expr)>,
    pub pipeline: Option<Vec<Stage>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unwind {
    pub path: String,
    pub preserve_null_and_empty_arrays: bool,
    pub include_array_index: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionWith {
    pub collection: String,
    pub pipeline: Vec<Stage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutSpec {
    pub collection: String,
    pub schema: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub group_by: Expr,
    pub boundaries: Vec<Expr>,
    pub default: Option<Expr>,
    pub output: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketAuto {
    pub group_by: Expr,
    pub buckets: i64,
    pub output: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphLookup {
    pub from: String,
    pub start_with: Expr,
    pub connect_from_field: String,
    pub connect_to_field: String,
    pub as_name: String,
    pub max_depth: Option<i64>,
    pub depth_field: Option<String>,
    /// Parsed as a `$match`-style document per §4.3.
    pub restrict_search_with_match: Option<Expr>,
}

/// A `$setWindowFields` output reuses the accumulator operator set as a
/// window function rendered with an `OVER (...)` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowOutput {
    pub alias: String,
    pub function: Accumulator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetWindowFields {
    pub partition_by: Option<Expr>,
    pub sort_by: Vec<(String, SortDirection)>,
    pub output: Vec<WindowOutput>,
}

/// One transformation step. Exactly the closed list from §3, plus the
/// `$count` sugar the parser folds into `Group`+`Project` before this enum
/// is ever constructed — `$set`/`$unset`/`$replaceWith` likewise arrive
/// here already desugared into `AddFields`/`Project`/`ReplaceRoot`.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Expr),
    Project(Projection),
    Group(Group),
    Sort(Sort),
    Skip(i64),
    Limit(i64),
    Sample(i64),
    Lookup(Lookup),
    Unwind(Unwind),
    AddFields(Vec<(String, Expr)>),
    ReplaceRoot(Expr),
    UnionWith(UnionWith),
    Out(OutSpec),
    Bucket(Bucket),
    BucketAuto(BucketAuto),
    Facet(Vec<(String, Vec<Stage>)>),
    GraphLookup(GraphLookup),
    SetWindowFields(SetWindowFields),
    Redact(Expr),
    /// `$count`'s dedicated desugaring target: a single-row, single-field
    /// `COUNT(*)` projection. The field name is the output field.
    Count(String),
}

/// Ordered stage sequence plus the collection the pipeline reads from.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub source_collection: String,
    pub stages: Vec<Stage>,
}
