//! Error type shared by the mapping core.
//!
//! Compile-time failures (unsupported shapes, constructor resolution) and
//! row-time failures (factories returning nothing, unconvertible values)
//! both surface as [`MapError`]. Command handlers wrap these in
//! `anyhow::Error` with additional context.

use thiserror::Error;

use crate::types::ValueType;

/// Convenience result type for mapping operations.
pub type Result<T, E = MapError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
pub enum MapError {
    /// Every compiler declined the requested target.
    #[error("cannot map to type {target}: no compiler supports this shape")]
    UnsupportedShape { target: String },

    /// No public constructor of the type can be satisfied from the columns in scope.
    #[error("no eligible constructor found for type '{type_name}'")]
    NoEligibleConstructor { type_name: String },

    /// A preferred constructor was configured but cannot be used for the type.
    #[error("invalid constructor for type '{type_name}': {reason}")]
    InvalidConstructor { type_name: String, reason: String },

    /// A registered factory produced no instance.
    #[error("factory for type '{type_name}' returned null")]
    FactoryReturnedNull { type_name: String },

    /// An abstract base type had subtype rules but none matched the row.
    #[error("no subtype rule matched for abstract type '{type_name}'")]
    NoMatchingSubtype { type_name: String },

    /// A conversion rule matched but the concrete value could not be converted.
    #[error("failed to convert column '{column}' from {from} to {to} (value='{value}')")]
    ConversionFailed {
        column: String,
        from: ValueType,
        to: String,
        value: String,
    },

    /// The underlying row cursor failed or was used out of order.
    #[error("cursor error: {message}")]
    Cursor { message: String },

    /// Row data does not agree with the declared columns.
    #[error("row shape mismatch: {message}")]
    RowShape { message: String },

    /// A mapped value could not be deserialized into the requested Rust type.
    #[error("failed to deserialize mapped value: {message}")]
    Deserialize { message: String },

    /// A subtype predicate expression could not be evaluated.
    #[error("failed to evaluate expression '{expression}': {message}")]
    Expression { expression: String, message: String },

    /// A type expression or shape definition is malformed.
    #[error("invalid shape: {message}")]
    Shape { message: String },
}

impl MapError {
    pub(crate) fn unsupported(target: impl Into<String>) -> Self {
        MapError::UnsupportedShape {
            target: target.into(),
        }
    }

    pub(crate) fn shape(message: impl Into<String>) -> Self {
        MapError::Shape {
            message: message.into(),
        }
    }

    pub(crate) fn cursor(message: impl Into<String>) -> Self {
        MapError::Cursor {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for MapError {
    fn from(err: serde_json::Error) -> Self {
        MapError::Deserialize {
            message: err.to_string(),
        }
    }
}
