//! AQL compiler error types

use crate::ErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Broad classification of a compile failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// The analyzed query has a shape the compiler does not implement
    UnsupportedShape,
    /// A path or owner referenced by the query could not be resolved
    UnresolvedReference,
    /// A literal value or pattern is malformed
    InvalidValue,
    /// Engine configuration problem
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::UnsupportedShape => write!(f, "unsupported query shape"),
            ErrorCategory::UnresolvedReference => write!(f, "unresolved reference"),
            ErrorCategory::InvalidValue => write!(f, "invalid value"),
            ErrorCategory::Configuration => write!(f, "configuration"),
        }
    }
}

/// Main compiler error type
///
/// All failures are raised synchronously while building the query tree and are not
/// retryable: the same input always fails the same way.
#[derive(Debug, Clone, Error)]
pub enum AqlError {
    /// The upstream analysis produced a query shape this compiler does not implement
    #[error("{code}: {message}")]
    UnsupportedShape {
        code: ErrorCode,
        message: String,
        context: Option<String>,
    },

    /// A path, containment or field could not be resolved
    #[error("{code}: {message} ({reference})")]
    UnresolvedReference {
        code: ErrorCode,
        message: String,
        reference: String,
    },

    /// A literal operand could not be interpreted
    #[error("{code}: {message}: {value}")]
    InvalidValue {
        code: ErrorCode,
        message: String,
        value: String,
    },

    /// Engine configuration error
    #[error("{code}: {message}")]
    Configuration {
        code: ErrorCode,
        message: String,
        context: Option<String>,
    },

    /// Multiple errors collected
    #[error("Multiple errors: {}", .0.len())]
    Multiple(Vec<AqlError>),
}

impl AqlError {
    /// Create an unsupported query shape error
    pub fn unsupported(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::UnsupportedShape {
            code,
            message: message.into(),
            context: None,
        }
    }

    /// Create an unresolved reference error naming the offending reference
    pub fn unresolved(code: ErrorCode, message: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            code,
            message: message.into(),
            reference: reference.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(code: ErrorCode, message: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            code,
            message: message.into(),
            value: value.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Configuration {
            code,
            message: message.into(),
            context: None,
        }
    }

    /// Attach context to errors that carry it
    pub fn with_context(self, ctx: impl Into<String>) -> Self {
        match self {
            Self::UnsupportedShape { code, message, .. } => Self::UnsupportedShape {
                code,
                message,
                context: Some(ctx.into()),
            },
            Self::Configuration { code, message, .. } => Self::Configuration {
                code,
                message,
                context: Some(ctx.into()),
            },
            other => other,
        }
    }

    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedShape { code, .. } => *code,
            Self::UnresolvedReference { code, .. } => *code,
            Self::InvalidValue { code, .. } => *code,
            Self::Configuration { code, .. } => *code,
            Self::Multiple(errors) => errors.first().map(|e| e.code()).unwrap_or(ErrorCode::new(0)),
        }
    }

    /// Get the error category
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::UnsupportedShape { .. } => Some(ErrorCategory::UnsupportedShape),
            Self::UnresolvedReference { .. } => Some(ErrorCategory::UnresolvedReference),
            Self::InvalidValue { .. } => Some(ErrorCategory::InvalidValue),
            Self::Configuration { .. } => Some(ErrorCategory::Configuration),
            Self::Multiple(errors) => errors.first().and_then(|e| e.category()),
        }
    }

    /// Additional context, if any
    pub fn context(&self) -> Option<&str> {
        match self {
            Self::UnsupportedShape { context, .. } | Self::Configuration { context, .. } => context.as_deref(),
            _ => None,
        }
    }
}
