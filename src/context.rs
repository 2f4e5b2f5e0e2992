//! The Generation Context: mutable builder state threaded through
//! rendering (§4.4). A context owns a private SQL text buffer; alias
//! counters, the bind list, the virtual-field registry, the lookup
//! registry, and the warning list live in a reference-counted shared cell
//! so that [`Context::create_nested_context`] can hand out a sibling with
//! its own buffer while keeping numbering and registrations global across
//! the whole statement (§5, §9 "Context sharing").

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use bson::Bson;

use crate::ast::expr::{Expr, LookupSize};
use crate::dialect::Dialect;
use crate::warnings::Warning;

/// A registered `$lookup`, keyed by its `as` name.
struct LookupRegistration {
    foreign_table: String,
    local_field: String,
    foreign_field: String,
    alias: Option<String>,
    consumed_by_size: Cell<bool>,
}

struct SharedState {
    binds: RefCell<Vec<Bson>>,
    alias_counters: RefCell<HashMap<String, u32>>,
    virtual_fields: RefCell<HashMap<String, Expr>>,
    lookups: RefCell<HashMap<String, LookupRegistration>>,
    warnings: RefCell<Vec<Warning>>,
}

impl SharedState {
    fn new() -> Self {
        SharedState {
            binds: RefCell::new(Vec::new()),
            alias_counters: RefCell::new(HashMap::new()),
            virtual_fields: RefCell::new(HashMap::new()),
            lookups: RefCell::new(HashMap::new()),
            warnings: RefCell::new(Vec::new()),
        }
    }
}

pub struct Context {
    shared: Rc<SharedState>,
    buffer: String,
    pub dialect: Dialect,
    pub inline_bind_variables: bool,
    pub data_column: String,
    base_alias: Option<String>,
}

impl Context {
    pub fn new(dialect: Dialect, inline_bind_variables: bool, data_column: impl Into<String>) -> Self {
        Context {
            shared: Rc::new(SharedState::new()),
            buffer: String::new(),
            dialect,
            inline_bind_variables,
            data_column: data_column.into(),
            base_alias: None,
        }
    }

    /// A sibling context for rendering a self-contained fragment (a
    /// correlated subquery, a `$lookup` pipeline, a `$facet` branch). It
    /// shares this context's bind list, alias counters, registries, and
    /// warnings, but starts with an empty buffer of its own.
    pub fn create_nested_context(&self) -> Context {
        Context {
            shared: Rc::clone(&self.shared),
            buffer: String::new(),
            dialect: self.dialect,
            inline_bind_variables: self.inline_bind_variables,
            data_column: self.data_column.clone(),
            base_alias: self.base_alias.clone(),
        }
    }

    /// The qualified data-column reference for the current base alias:
    /// `alias.data` when a base alias is set (any lookup/unwind/facet
    /// present), bare `data` otherwise.
    pub fn data_column_ref(&self) -> String {
        match &self.base_alias {
            Some(alias) => format!("{alias}.{}", self.data_column),
            None => self.data_column.clone(),
        }
    }

    pub fn set_base_table_alias(&mut self, alias: impl Into<String>) {
        self.base_alias = Some(alias.into());
    }

    /// Resets to the alias-free (bare `data` column) state — used between
    /// runs in the same statement (e.g. the two sides of a `$unionWith`
    /// pivot) so one run's alias never leaks into the next.
    pub fn clear_base_table_alias(&mut self) {
        self.base_alias = None;
    }

    pub fn base_table_alias(&self) -> Option<&str> {
        self.base_alias.as_deref()
    }

    /// Appends raw SQL text to this context's buffer.
    pub fn sql(&mut self, fragment: &str) {
        self.buffer.push_str(fragment);
    }

    /// Consumes this context, returning its accumulated buffer — used to
    /// splice a nested context's output into its parent.
    pub fn to_sql(self) -> String {
        self.buffer
    }

    pub fn buffer_str(&self) -> &str {
        &self.buffer
    }

    /// Appends the next bind placeholder and records the value, or — in
    /// `inline_bind_variables` mode — formats the value as a SQL literal
    /// directly. Placeholders are one-indexed and assigned in left-to-right
    /// rendering order (§5 ordering guarantee).
    pub fn bind(&mut self, value: Bson) {
        if self.inline_bind_variables {
            let literal = inline_literal(&value);
            self.sql(&literal);
        } else {
            let mut binds = self.shared.binds.borrow_mut();
            binds.push(value);
            let frag = format!(":{}", binds.len());
            drop(binds);
            self.sql(&frag);
        }
    }

    pub fn take_binds(self) -> Vec<Bson> {
        // Only meaningful on the root context; nested contexts share the
        // same underlying Vec, so this drains the whole statement's binds
        // exactly once after the last context using it is dropped.
        Rc::try_unwrap(self.shared)
            .map(|s| s.binds.into_inner())
            .unwrap_or_else(|shared| shared.binds.borrow().clone())
    }

    /// Appends `name` unquoted if it matches the unquoted-identifier
    /// grammar, double-quoted otherwise (§6 emitted-SQL surface).
    pub fn identifier(&mut self, name: &str) {
        if is_unquoted_identifier(name) {
            self.sql(name);
        } else {
            let escaped = name.replace('"', "\"\"");
            self.sql(&format!("\"{escaped}\""));
        }
    }

    /// Validates `name` via the Validator, then appends it literally — for
    /// use inside a JSON path expression where it has already been proven
    /// safe.
    pub fn json_field(&mut self, name: &str) -> crate::error::Result<()> {
        let validated = crate::validator::validate_field_name(name)?;
        self.sql(&validated);
        Ok(())
    }

    pub fn table_name(&mut self, name: &str) -> crate::error::Result<()> {
        let validated = crate::validator::validate_table_name(name)?;
        self.sql(&validated);
        Ok(())
    }

    /// Returns a fresh, unique alias `base_N`, where `N` is a per-`base`
    /// counter shared across every context derived from the same root.
    pub fn generate_table_alias(&self, base: &str) -> String {
        let mut counters = self.shared.alias_counters.borrow_mut();
        let counter = counters.entry(base.to_string()).or_insert(0);
        let alias = format!("{base}_{counter}");
        *counter += 1;
        alias
    }

    pub fn register_virtual_field(&self, name: impl Into<String>, expr: Expr) {
        self.shared.virtual_fields.borrow_mut().insert(name.into(), expr);
    }

    pub fn lookup_virtual_field(&self, name: &str) -> Option<Expr> {
        self.shared.virtual_fields.borrow().get(name).cloned()
    }

    pub fn register_lookup(
        &self,
        as_name: impl Into<String>,
        foreign_table: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
    ) {
        let as_name = as_name.into();
        self.shared.lookups.borrow_mut().insert(
            as_name,
            LookupRegistration {
                foreign_table: foreign_table.into(),
                local_field: local_field.into(),
                foreign_field: foreign_field.into(),
                alias: None,
                consumed_by_size: Cell::new(false),
            },
        );
    }

    pub fn register_lookup_table_alias(&self, as_name: &str, alias: impl Into<String>) {
        if let Some(reg) = self.shared.lookups.borrow_mut().get_mut(as_name) {
            reg.alias = Some(alias.into());
        }
    }

    pub fn lookup_table_alias(&self, as_name: &str) -> Option<String> {
        self.shared
            .lookups
            .borrow()
            .get(as_name)
            .and_then(|r| r.alias.clone())
    }

    /// If `field` is a registered lookup's `as` name, returns the
    /// [`LookupSize`] expression the optimizer uses to rewrite
    /// `$size: "$field"` into a correlated count, and marks the lookup as
    /// consumed so the Composer can elide its JOIN.
    pub fn lookup_size_expression(&self, field: &str) -> Option<LookupSize> {
        let lookups = self.shared.lookups.borrow();
        let reg = lookups.get(field)?;
        Some(LookupSize {
            foreign_table: reg.foreign_table.clone(),
            local_field: reg.local_field.clone(),
            foreign_field: reg.foreign_field.clone(),
        })
    }

    pub fn mark_lookup_consumed_by_size(&self, as_name: &str) {
        if let Some(reg) = self.shared.lookups.borrow().get(as_name) {
            reg.consumed_by_size.set(true);
        }
    }

    pub fn is_lookup_consumed_by_size(&self, as_name: &str) -> bool {
        self.shared
            .lookups
            .borrow()
            .get(as_name)
            .map(|r| r.consumed_by_size.get())
            .unwrap_or(false)
    }

    pub fn push_warning(&self, code: impl Into<String>, message: impl Into<String>) {
        let warning = Warning::new(code, message);
        tracing::warn!(warning_code = %warning.code, message = %warning.message, "translation warning");
        self.shared.warnings.borrow_mut().push(warning);
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.shared.warnings.borrow().clone()
    }
}

fn is_unquoted_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Formats a bind value as an inline SQL literal: single-quoted strings
/// with doubled-quote escaping, `NULL`, `'true'`/`'false'` for booleans (to
/// survive Oracle JSON storage round-trips), unquoted numerics.
fn inline_literal(value: &Bson) -> String {
    match value {
        Bson::Null => "NULL".to_string(),
        Bson::Boolean(b) => format!("'{}'", if *b { "true" } else { "false" }),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(d) => d.to_string(),
        Bson::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}
