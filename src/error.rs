//! Error types for equation parsing and filter compilation.

use std::path::PathBuf;

use thiserror::Error;

use crate::token::Span;

/// Failures while parsing an arithmetic equation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArithmeticError {
    #[error("unable to parse equation: {message}")]
    Parse { message: String, span: Option<Span> },

    #[error("too many operators in equation: {count} exceeds the maximum of {max}")]
    MaxOperators { count: usize, max: usize },
}

impl ArithmeticError {
    pub(crate) fn parse(message: impl Into<String>, span: Option<Span>) -> Self {
        ArithmeticError::Parse {
            message: message.into(),
            span,
        }
    }
}

/// Failures while evaluating a parsed equation against bound field values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("no value bound for field '{0}'")]
    UnboundField(String),

    #[error("division by zero while evaluating '{0}'")]
    DivisionByZero(String),
}

/// Failures while lowering search terms into conditions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid value for {field} condition: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{0}")]
    Unresolved(String),

    #[error("{0} is not supported in filter compilation")]
    UnsupportedField(String),

    #[error("invalid filter params: {0}")]
    InvalidParams(String),

    #[error("lookup failed: {0}")]
    Lookup(String),
}

impl FilterError {
    pub(crate) fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        FilterError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failures while loading a dataset configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
