use crate::error::{Error, Result};
use crate::validator;
use serde::Deserialize;
use std::fs;

/// Names the target of a translation: which table holds the documents and
/// which column holds the JSON payload.
///
/// Immutable once constructed. `qualified_table_name` is derived, not
/// stored, so there is never a chance for it to drift out of sync with
/// `schema_name`/`collection_name`.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    pub collection_name: String,
    #[serde(default)]
    pub schema_name: Option<String>,
    #[serde(default = "default_data_column_name")]
    pub data_column_name: String,
}

fn default_data_column_name() -> String {
    "data".to_string()
}

impl Default for Configuration {
    /// An empty `collection_name` — only useful as the seed `load_from_file`
    /// falls back to when no config file is present; `validate()` rejects it
    /// until the caller sets a real collection name.
    fn default() -> Self {
        Self {
            collection_name: String::new(),
            schema_name: None,
            data_column_name: default_data_column_name(),
        }
    }
}

impl Configuration {
    pub fn new(collection_name: impl Into<String>) -> Self {
        Self {
            collection_name: collection_name.into(),
            schema_name: None,
            data_column_name: default_data_column_name(),
        }
    }

    pub fn with_schema(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = Some(schema_name.into());
        self
    }

    pub fn with_data_column_name(mut self, data_column_name: impl Into<String>) -> Self {
        self.data_column_name = data_column_name.into();
        self
    }

    /// The table reference to use in the generated `FROM` clause, with the
    /// schema qualifier present only when configured.
    pub fn qualified_table_name(&self) -> Result<String> {
        let table = validator::validate_table_name(&self.collection_name)?;
        match &self.schema_name {
            Some(schema) => {
                let schema = validator::validate_table_name(schema)?;
                Ok(format!("{schema}.{table}"))
            }
            None => Ok(table),
        }
    }

    /// Re-runs the validator over every identifier this configuration names,
    /// so a bad configuration fails fast rather than surfacing midway
    /// through rendering.
    pub fn validate(&self) -> Result<()> {
        validator::validate_table_name(&self.collection_name)?;
        if let Some(schema) = &self.schema_name {
            validator::validate_table_name(schema)?;
        }
        validator::validate_field_name(&self.data_column_name)?;
        Ok(())
    }
}

/// Per-translation knobs that don't name a table or column.
#[derive(Debug, Clone, Deserialize)]
pub struct Options {
    /// When true, literal values are formatted inline in the SQL text
    /// instead of bound via `:N` placeholders. Off by default: binds are
    /// the safer and more cacheable default for a prepared-statement
    /// executor.
    #[serde(default)]
    pub inline_bind_variables: bool,

    /// When true, the renderer inserts newlines/indentation for
    /// readability. Purely cosmetic — never changes clause order or
    /// semantics.
    #[serde(default)]
    pub pretty_print: bool,

    /// When true, the composer may annotate the generated SQL with Oracle
    /// optimizer hints (e.g. `/*+ INDEX(...) */`) where it has enough
    /// information to suggest one safely.
    #[serde(default)]
    pub include_hints: bool,

    /// When true, an unrecognized operator is a fatal [`Error::UnknownOperator`].
    /// When false, the owning stage is dropped and a warning is recorded
    /// instead — see §7 error-handling policy.
    #[serde(default = "default_strict_mode")]
    pub strict_mode: bool,

    /// Overrides [`Configuration::data_column_name`] for this translation
    /// only; `None` defers to the configuration.
    #[serde(default)]
    pub data_column_name: Option<String>,
}

fn default_strict_mode() -> bool {
    true
}

impl Default for Options {
    fn default() -> Self {
        Self {
            inline_bind_variables: false,
            pretty_print: false,
            include_hints: false,
            strict_mode: default_strict_mode(),
            data_column_name: None,
        }
    }
}

impl Options {
    /// The effective data column name for this translation: the per-call
    /// override if present, else the configuration's.
    pub fn effective_data_column_name<'a>(&'a self, config: &'a Configuration) -> &'a str {
        self.data_column_name
            .as_deref()
            .unwrap_or(&config.data_column_name)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.data_column_name {
            validator::validate_field_name(name)?;
        }
        Ok(())
    }
}

/// A `Configuration` plus `Options`, loadable from a TOML document the way
/// a host would load it from a config file on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct TranslatorConfig {
    pub configuration: Configuration,
    #[serde(default)]
    pub options: Options,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            configuration: Configuration::default(),
            options: Options::default(),
        }
    }
}

impl TranslatorConfig {
    /// Load configuration from a TOML file. A missing file is not an error —
    /// it falls back to `TranslatorConfig::default()`; only a file that
    /// exists but fails to parse as TOML is fatal.
    pub fn load_from_file(path: &str) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::load_from_str(&contents),
            Err(_e) => Ok(Self::default()),
        }
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        let cfg: TranslatorConfig = toml::from_str(contents)
            .map_err(|e| Error::Msg(format!("failed to parse configuration: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.configuration.validate()?;
        self.options.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_data_column_is_data() {
        let cfg = Configuration::new("orders");
        assert_eq!(cfg.data_column_name, "data");
        assert_eq!(cfg.qualified_table_name().unwrap(), "orders");
    }

    #[test]
    fn qualified_table_name_includes_schema() {
        let cfg = Configuration::new("orders").with_schema("app");
        assert_eq!(cfg.qualified_table_name().unwrap(), "app.orders");
    }

    #[test]
    fn rejects_invalid_collection_name() {
        let cfg = Configuration::new("orders; drop table users");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn strict_mode_defaults_true() {
        let opts = Options::default();
        assert!(opts.strict_mode);
    }

    #[test]
    fn load_from_file_falls_back_to_defaults_when_missing() {
        let cfg = TranslatorConfig::load_from_file("/nonexistent/path/to/config.toml").unwrap();
        assert_eq!(cfg.configuration.collection_name, "");
        assert!(cfg.options.strict_mode);
    }

    #[test]
    fn load_from_file_rejects_malformed_toml() {
        let dir = std::env::temp_dir();
        let path = dir.join("aggora_malformed_config_test.toml");
        std::fs::write(&path, "not valid toml [[[").unwrap();
        let result = TranslatorConfig::load_from_file(path.to_str().unwrap());
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn load_from_str_parses_toml() {
        let toml = r#"
            [configuration]
            collection_name = "orders"
            schema_name = "app"

            [options]
            inline_bind_variables = true
        "#;
        let cfg = TranslatorConfig::load_from_str(toml).unwrap();
        assert_eq!(cfg.configuration.collection_name, "orders");
        assert!(cfg.options.inline_bind_variables);
        assert!(cfg.options.strict_mode);
    }
}
