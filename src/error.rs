use std::result::Result as StdResult;

/// The crate-wide error type. Every public entry point returns `Result<T>`.
///
/// Variants map onto the error kinds a caller needs to branch on; everything
/// else collapses into [`Error::Msg`], the same way the rest of the codebase
/// this crate's idiom is drawn from keeps a single catch-all next to its
/// typed variants rather than minting a type per failure.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed pipeline structure, missing required operator field, or a
    /// BSON value of the wrong type where an operator expects something
    /// specific.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operator key was not recognized by any dispatch table. Fatal in
    /// `strict_mode`; downgraded to a warning and the owning stage dropped
    /// otherwise (see [`crate::config::Options::strict_mode`]).
    #[error("unknown operator: {operator}")]
    UnknownOperator { operator: String },

    /// An operator was recognized but cannot be translated to SQL, or only
    /// partially so. Always fatal — the capability grade only ever reflects
    /// operators the translator chose to emulate, never ones it refused.
    #[error("unsupported operator {operator}: {reason}")]
    UnsupportedOperator { operator: String, reason: String },

    /// A field name, field path, or table name was rejected by the
    /// validator in [`crate::validator`].
    #[error("validation error: {0}")]
    ValidationError(String),

    /// An internal invariant was violated — e.g. an accumulator expression
    /// encountered outside a grouping context. Indicates a bug in the
    /// parser or optimizer, not bad input.
    #[error("internal invariant violated: {0}")]
    IntegrityError(String),

    #[error("{0}")]
    Msg(String),
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn unknown_operator(operator: impl Into<String>) -> Self {
        Error::UnknownOperator {
            operator: operator.into(),
        }
    }

    pub fn unsupported(operator: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::UnsupportedOperator {
            operator: operator.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::ValidationError(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Error::IntegrityError(msg.into())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Msg(e.to_string())
    }
}

pub type Result<T> = StdResult<T, Error>;
