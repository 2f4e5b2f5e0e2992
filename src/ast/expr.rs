//! The expression side of the AST: a closed sum type with one variant per
//! row of the expression table, each an immutable value object.
//!
//! Nothing here touches SQL text or the generation context — see
//! `crate::render::expr` for that. `bson::Bson` is reused directly for
//! [`Literal`] rather than re-deriving a scalar-value enum; every other
//! variant is purpose-built.

use bson::Bson;

/// One node of a parsed MongoDB aggregation expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Bson),
    FieldPath(FieldPath),
    Comparison(Comparison),
    Logical(Logical),
    Arithmetic(Arithmetic),
    StringOp(StringOp),
    DateOp(DateOp),
    ArrayOp(ArrayOp),
    Accumulator(Accumulator),
    Conditional(Conditional),
    TypeConversion(TypeConversion),
    ObjectOp(ObjectOp),
    Exists(Exists),
    InList(InList),
    CompoundId(CompoundId),
    LookupSize(LookupSize),
}

/// A JSON return type hint threaded onto a [`FieldPath`] so the renderer can
/// emit `JSON_VALUE(... RETURNING NUMBER)` where an operator's context
/// requires a non-string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonReturnType {
    Number,
    StringType,
    Bool,
}

/// `"$a.b.c"`, `"$.a.b.c"`, and `"a.b.c"` all normalize to the same segment
/// list at parse time (see `crate::validator::validate_and_normalize_field_path`);
/// this type never stores the raw, un-normalized string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    pub segments: Vec<String>,
    pub return_type: Option<JsonReturnType>,
    pub data_column_override: Option<String>,
}

impl FieldPath {
    pub fn new(segments: Vec<String>) -> Self {
        FieldPath {
            segments,
            return_type: None,
            data_column_override: None,
        }
    }

    pub fn with_return_type(mut self, rt: JsonReturnType) -> Self {
        self.return_type = Some(rt);
        self
    }

    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

/// The right-hand side of a [`Comparison`]: a single expression for
/// `eq/ne/gt/gte/lt/lte`, or a list for `in/nin`.
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonOperand {
    Single(Box<Expr>),
    List(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub op: CompareOp,
    pub left: Box<Expr>,
    pub right: ComparisonOperand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nor,
    Not,
}

/// `children` preserves the written grouping; the renderer emits explicit
/// parentheses rather than relying on associativity (§3 invariant).
#[derive(Debug, Clone, PartialEq)]
pub struct Logical {
    pub op: LogicalOp,
    pub children: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
}

/// `operands` preserves input order; `subtract`/`divide`/`mod` are validated
/// to have exactly two operands at parse time, `add`/`multiply` may have more.
#[derive(Debug, Clone, PartialEq)]
pub struct Arithmetic {
    pub op: ArithmeticOp,
    pub operands: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringOp {
    Concat(Vec<Expr>),
    ToLower(Box<Expr>),
    ToUpper(Box<Expr>),
    /// Input is 0-based (`$substr`'s own convention); the renderer
    /// translates to Oracle's 1-based `SUBSTR`.
    Substr {
        string: Box<Expr>,
        start: Box<Expr>,
        length: Option<Box<Expr>>,
    },
    Trim(Box<Expr>),
    Strlen(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DateOp {
    Year(Box<Expr>),
    Month(Box<Expr>),
    DayOfMonth(Box<Expr>),
    Hour(Box<Expr>),
    Minute(Box<Expr>),
    Second(Box<Expr>),
    DayOfWeek(Box<Expr>),
    DayOfYear(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayOp {
    /// Negative `index` means "from the end"; the renderer maps `-1` to
    /// `[last]` and `-n` to `[last-(n-1)]`.
    ElemAt { array: Box<Expr>, index: Box<Expr> },
    Size(Box<Expr>),
    First(Box<Expr>),
    Last(Box<Expr>),
    Slice {
        array: Box<Expr>,
        start: Box<Expr>,
        length: Option<Box<Expr>>,
    },
    ConcatArrays(Vec<Expr>),
    Filter {
        input: Box<Expr>,
        as_name: String,
        cond: Box<Expr>,
    },
    Map {
        input: Box<Expr>,
        as_name: String,
        in_expr: Box<Expr>,
    },
    Reduce {
        input: Box<Expr>,
        initial: Box<Expr>,
        in_expr: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorOp {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    First,
    Last,
    Push,
    AddToSet,
}

/// Valid only inside a grouping context (`$group`, `$bucket`,
/// `$bucketAuto`, or as a `$setWindowFields` output); the parser tags these
/// so the renderer can reject one that surfaces elsewhere with an
/// [`crate::error::Error::IntegrityError`].
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    pub op: AccumulatorOp,
    /// `None` only for `count`, the single argument-less accumulator.
    pub arg: Option<Box<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Conditional {
    Cond {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// `$ifNull` candidates, first non-null wins; Mongo's n-ary form with
    /// the last candidate acting as the unconditional default.
    IfNull { candidates: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeConversionOp {
    ToInt,
    ToLong,
    ToDouble,
    ToDecimal,
    ToString,
    ToBool,
    ToDate,
    ToObjectId,
    Type,
    IsNumber,
    IsString,
    Convert,
}

/// `on_error`/`on_null`/`to` are populated only for the `$convert` document
/// form; the terse `$toInt`/etc. forms leave all three `None`/unset (`op`
/// already names the target type in that case).
#[derive(Debug, Clone, PartialEq)]
pub struct TypeConversion {
    pub op: TypeConversionOp,
    pub arg: Box<Expr>,
    /// The declared `to` type name for `$convert` (e.g. `"int"`,
    /// `"double"`), used to pick the same rendering table as the terse
    /// `$toInt`/`$toDouble` forms.
    pub to: Option<String>,
    pub on_error: Option<Box<Expr>>,
    pub on_null: Option<Box<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectOp {
    MergeObjects(Vec<Expr>),
    ObjectToArray(Box<Expr>),
    ArrayToObject(Box<Expr>),
}

/// `$exists` predicate: `polarity = false` for `{$exists: false}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exists {
    pub field: FieldPath,
    pub polarity: bool,
}

/// The `$match`-level `{field: {$in: [...]}}` / `{$nin: [...]}` sugar,
/// distinct from the two-argument expression-language `$in` captured by
/// [`Comparison`].
#[derive(Debug, Clone, PartialEq)]
pub struct InList {
    pub field: FieldPath,
    pub values: Vec<Expr>,
    pub negated: bool,
}

/// `$group._id` as a document: an ordered list rather than a map, since
/// rendering order must be deterministic (§8 invariant 3/4).
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundId {
    pub fields: Vec<(String, Expr)>,
}

/// Introduced by the optimizer (never by the parser): rewrites
/// `$size: "$lookupField"` into a correlated-subquery count and marks the
/// originating `$lookup` as consumed so the Composer elides its JOIN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupSize {
    pub foreign_table: String,
    pub local_field: String,
    pub foreign_field: String,
}
