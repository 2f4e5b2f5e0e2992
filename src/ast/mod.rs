//! The Abstract Syntax Tree: a closed family of [`expr::Expr`] variants and
//! [`stage::Stage`] variants, each an immutable value object. This layer
//! owns no I/O and no SQL text — see `crate::parser` for how raw BSON
//! becomes these types and `crate::render` for how they become SQL.

pub mod expr;
pub mod stage;

pub use expr::Expr;
pub use stage::{Pipeline, Stage};
