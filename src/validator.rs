//! Central policy for field names, field paths, and table names.
//!
//! Every identifier that ends up inside generated SQL passes through here
//! first. The generated SQL embeds field names literally inside JSON path
//! expressions (`$.foo.bar`) where a bind placeholder cannot be used, so
//! rejecting anything outside a tight grammar is the only defense against
//! injection through a crafted field name.
//!
//! `strict_mode` (see [`crate::config::Options`]) never weakens this
//! module — it only changes how the parser reacts to an *unknown
//! operator*, not how identifiers are validated.

use crate::error::{Error, Result};

const MAX_IDENTIFIER_LEN: usize = 128;

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Validates a single path segment (no dots) against `^[A-Za-z_][A-Za-z0-9_]*$`,
/// 1..=128 characters.
fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::validation("field path segment must not be empty"));
    }
    if segment.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::validation(format!(
            "identifier '{segment}' exceeds maximum length of {MAX_IDENTIFIER_LEN}"
        )));
    }
    let mut chars = segment.chars();
    let first = chars.next().unwrap();
    if !is_ident_start(first) {
        return Err(Error::validation(format!(
            "identifier '{segment}' must start with a letter or underscore"
        )));
    }
    if !chars.all(is_ident_continue) {
        return Err(Error::validation(format!(
            "identifier '{segment}' contains characters outside [A-Za-z0-9_]"
        )));
    }
    Ok(())
}

/// Validates a field name, which may be a dotted path. Each segment is
/// validated individually; empty segments, a leading dot, and consecutive
/// dots are all rejected. Returns the normalized (unchanged, but
/// provenance-checked) string.
pub fn validate_field_name(s: &str) -> Result<String> {
    if s.is_empty() {
        return Err(Error::validation("field name must not be empty"));
    }
    if s.starts_with('.') || s.ends_with('.') || s.contains("..") {
        return Err(Error::validation(format!(
            "field path '{s}' has a leading, trailing, or doubled dot"
        )));
    }
    for segment in s.split('.') {
        validate_segment(segment)?;
    }
    Ok(s.to_string())
}

/// Validates each segment of an already-split field path.
pub fn validate_field_path_segments(segments: &[String]) -> Result<()> {
    if segments.is_empty() {
        return Err(Error::validation("field path must have at least one segment"));
    }
    for segment in segments {
        validate_segment(segment)?;
    }
    Ok(())
}

/// Strips a leading `$` or `$.` (MongoDB field-reference sigils), then
/// validates what remains and splits it into segments.
///
/// `FieldPath("$x")`, `FieldPath("$.x")`, and `FieldPath("x")` are all
/// normalized to the same segment list, per the invariant in §3.
pub fn validate_and_normalize_field_path(s: &str) -> Result<Vec<String>> {
    let stripped = s.strip_prefix("$.").or_else(|| s.strip_prefix('$')).unwrap_or(s);
    if stripped.starts_with('$') {
        // `$$ROOT`, `$$CURRENT`, and other system variables are not plain
        // field paths; they are rejected here unless a caller has already
        // special-cased them before reaching the validator.
        return Err(Error::validation(format!(
            "'{s}' is a system variable, not a field path"
        )));
    }
    validate_field_name(stripped)?;
    Ok(stripped.split('.').map(|s| s.to_string()).collect())
}

/// Validates a table/collection name: same grammar as a field name segment,
/// but single-segment only (no dots) and no leading underscore (Oracle
/// reserves leading-underscore identifiers for its own system objects in
/// most configurations, and it is never a meaningful table name here).
pub fn validate_table_name(s: &str) -> Result<String> {
    if s.is_empty() {
        return Err(Error::validation("table name must not be empty"));
    }
    if s.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::validation(format!(
            "table name '{s}' exceeds maximum length of {MAX_IDENTIFIER_LEN}"
        )));
    }
    if s.contains('.') {
        return Err(Error::validation(format!(
            "table name '{s}' must not contain '.'"
        )));
    }
    if s.starts_with('_') {
        return Err(Error::validation(format!(
            "table name '{s}' must not start with '_'"
        )));
    }
    validate_segment(s)?;
    Ok(s.to_string())
}

/// Validates a filesystem path supplied by the CLI collaborator (out of
/// scope for this crate's runtime behavior, but the policy is specified
/// here so a host implementing the CLI has one place to call into).
pub fn validate_file_path(s: &str) -> Result<()> {
    if s.contains('\0') {
        return Err(Error::validation("file path contains a NUL byte"));
    }
    if s.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(Error::validation(format!(
            "file path '{s}' contains a '..' segment"
        )));
    }
    if let Some(scheme_end) = s.find("://") {
        let scheme = &s[..scheme_end];
        if scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.') {
            return Err(Error::validation(format!(
                "file path '{s}' looks like a URL with scheme '{scheme}'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_field_name() {
        assert_eq!(validate_field_name("status").unwrap(), "status");
    }

    #[test]
    fn accepts_dotted_path() {
        assert_eq!(validate_field_name("a.b.c").unwrap(), "a.b.c");
    }

    #[test]
    fn rejects_leading_dot() {
        assert!(validate_field_name(".a").is_err());
    }

    #[test]
    fn rejects_consecutive_dots() {
        assert!(validate_field_name("a..b").is_err());
    }

    #[test]
    fn rejects_injection_attempt() {
        assert!(validate_field_name("a'; DROP TABLE orders; --").is_err());
    }

    #[test]
    fn rejects_over_length_identifier() {
        let long = "a".repeat(200);
        assert!(validate_field_name(&long).is_err());
    }

    #[test]
    fn normalizes_dollar_prefixed_paths() {
        assert_eq!(
            validate_and_normalize_field_path("$a.b").unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            validate_and_normalize_field_path("$.a.b").unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            validate_and_normalize_field_path("a.b").unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn rejects_system_variables() {
        assert!(validate_and_normalize_field_path("$$ROOT").is_err());
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = validate_and_normalize_field_path("$a.b").unwrap();
        let joined = once.join(".");
        let twice = validate_and_normalize_field_path(&joined).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn table_name_rejects_dots_and_leading_underscore() {
        assert!(validate_table_name("schema.table").is_err());
        assert!(validate_table_name("_system").is_err());
        assert!(validate_table_name("orders").is_ok());
    }

    #[test]
    fn file_path_rejects_traversal_and_schemes() {
        assert!(validate_file_path("../etc/passwd").is_err());
        assert!(validate_file_path("http://evil.example/x").is_err());
        assert!(validate_file_path("a\0b").is_err());
        assert!(validate_file_path("pipelines/orders.json").is_ok());
    }
}
