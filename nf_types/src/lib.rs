// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms,
    unused
)]
//! nf_types
//!
//! Declared parameter surface of a Nextflow pipeline and the rule that turns
//! parameter values into runner command-line flags.
#![deny(missing_docs)]

pub mod flags;
pub mod schema;
pub mod value;

pub use flags::{get_flag, ParameterValues, ResolvedParameters};
pub use schema::{ParamKind, ParameterSchema, ParameterSpec, Requirement};
pub use value::{DataPath, ParamValue};

use thiserror::Error;

/// Errors raised while declaring parameters or binding values to them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParamError {
    /// A value was supplied for a name the schema does not declare.
    #[error("unknown parameter '{0}'")]
    Unknown(String),

    /// A required parameter has neither a supplied value nor a default.
    #[error("parameter '{0}' is required but no value was supplied")]
    MissingRequired(String),

    /// A value of the wrong kind was bound to a parameter.
    #[error("parameter '{name}' expects a {expected} value, got {found}")]
    KindMismatch {
        /// Parameter name.
        name: String,
        /// Kind declared by the schema.
        expected: ParamKind,
        /// Kind of the offending value.
        found: ParamKind,
    },

    /// The same name was declared twice.
    #[error("parameter '{0}' is declared more than once")]
    Duplicate(String),

    /// A raw string could not be parsed as the declared kind.
    #[error("invalid {kind} value for '{name}': {reason}")]
    InvalidValue {
        /// Parameter name.
        name: String,
        /// Kind declared by the schema.
        kind: ParamKind,
        /// Why parsing failed.
        reason: String,
    },
}
