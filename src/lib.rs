//! Translates a MongoDB aggregation pipeline into Oracle SQL over a
//! JSON-typed column.
//!
//! The entry point is [`translate`]: parse the pipeline's BSON documents
//! into the AST (`ast`/`parser`), rewrite it to a fixed point (`optimize`),
//! assemble one SQL statement in canonical clause order (`compose`,
//! `render`), and report what had to be emulated or dropped along the way
//! (`warnings`).

pub mod ast;
pub mod compose;
pub mod config;
pub mod context;
pub mod dialect;
pub mod error;
pub mod optimize;
pub mod parser;
pub mod render;
pub mod validator;
pub mod warnings;

use bson::{Bson, Document};

pub use config::{Configuration, Options, TranslatorConfig};
pub use dialect::Dialect;
pub use error::{Error, Result};
pub use warnings::{Capability, Warning};

use ast::stage::Pipeline;

/// The outcome of a single [`translate`] call.
#[derive(Debug, Clone)]
pub struct TranslationResult {
    /// The generated SQL statement.
    pub sql: String,
    /// Bind values in `:1, :2, ...` order; empty when
    /// [`Options::inline_bind_variables`] is set.
    pub binds: Vec<Bson>,
    /// Every warning accumulated while rendering, in emission order.
    pub warnings: Vec<Warning>,
    /// The overall capability grade derived from `warnings` (§warnings).
    pub capability: Capability,
}

/// Translates a MongoDB aggregation pipeline (a list of stage documents, as
/// they'd arrive from a driver's `aggregate()` call) into one Oracle SQL
/// statement.
pub fn translate(
    pipeline_docs: &[Document],
    config: &Configuration,
    options: &Options,
) -> Result<TranslationResult> {
    config.validate()?;
    options.validate()?;

    let dialect = Dialect::oracle();
    let data_column = options.effective_data_column_name(config).to_string();
    let mut ctx = context::Context::new(dialect, options.inline_bind_variables, data_column);

    let (stages, parse_warnings) = parser::parse_pipeline(pipeline_docs, options.strict_mode)?;
    for warning in parse_warnings {
        ctx.push_warning(warning.code, warning.message);
    }
    let stages = optimize::optimize(stages);

    let pipeline = Pipeline {
        source_collection: config.qualified_table_name()?,
        stages,
    };

    let sql = compose::compose(&pipeline, &mut ctx)?;
    let warnings = ctx.warnings();
    let capability = warnings::capability_from_warnings(&warnings);
    let binds = ctx.take_binds();

    tracing::info!(
        collection = %config.collection_name,
        stage_count = pipeline.stages.len(),
        capability = ?capability,
        bind_count = binds.len(),
        "translated aggregation pipeline to SQL",
    );

    Ok(TranslationResult {
        sql,
        binds,
        warnings,
        capability,
    })
}
