//! Dialect capability flags.
//!
//! The design currently targets a single Oracle dialect, but renderers
//! never hardcode that assumption — they read capability flags off a
//! `Dialect` value instead, per the "no inheritance needed" note in the
//! design notes. A second dialect is a matter of constructing a different
//! `Dialect`, not touching any renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    /// `JSON_VALUE(doc, '$.path' RETURNING NUMBER)` — Oracle 12c+.
    pub supports_json_value_returning: bool,
    /// `doc.path.nested` dot-notation access into a JSON column, preserving
    /// the underlying JSON type instead of always returning VARCHAR2.
    pub supports_nested_path: bool,
    /// `JSON_TABLE(...)` for unwind/array-filter/array-map rendering.
    pub supports_json_collection_tables: bool,
    /// `JSON_ARRAYAGG(DISTINCT expr)` — if absent, `$addToSet` falls back
    /// to a `LISTAGG(DISTINCT ...)`-based emulation and is graded EMULATED.
    pub supports_distinct_json_arrayagg: bool,
}

impl Dialect {
    /// Oracle 19c+ with the full JSON feature set enabled.
    pub const fn oracle() -> Self {
        Dialect {
            supports_json_value_returning: true,
            supports_nested_path: true,
            supports_json_collection_tables: true,
            supports_distinct_json_arrayagg: true,
        }
    }

    /// An older Oracle deployment lacking `JSON_ARRAYAGG(DISTINCT ...)`.
    /// `$addToSet` is emulated via `LISTAGG` and graded EMULATED rather
    /// than FULL_SUPPORT.
    pub const fn oracle_legacy() -> Self {
        Dialect {
            supports_distinct_json_arrayagg: false,
            ..Self::oracle()
        }
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Self::oracle()
    }
}
