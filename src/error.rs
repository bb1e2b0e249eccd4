//! Error types for tagweave.
//!
//! Uses thiserror for derive macros. Every variant is fatal to a template run;
//! the template language has no recovery construct, so nothing is swallowed.

use crate::exit_codes;
use crate::llm::Feature;
use thiserror::Error;

/// Main error type for tagweave operations.
#[derive(Error, Debug)]
pub enum WeaveError {
    /// The template source is malformed. Raised before any execution.
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },

    /// Invalid or conflicting tag arguments, raised when the tag is evaluated.
    #[error("invalid tag configuration: {0}")]
    Configuration(String),

    /// The bound model provider cannot honour a requested capability.
    #[error("model provider '{provider}' does not support {feature}")]
    UnsupportedFeature { provider: String, feature: Feature },

    /// The provider kept rejecting calls as rate limited.
    #[error("too many (more than {max_retries}) rate limit rejections in a row")]
    RetryExhausted { max_retries: u32 },

    /// Any other provider failure, propagated unmodified.
    #[error("model provider error: {0}")]
    Provider(#[source] anyhow::Error),

    /// The response cache could not be read or written.
    #[error("response cache error: {0}")]
    Cache(String),

    /// Bad input outside a template: config files, CLI arguments, I/O.
    #[error("{0}")]
    UserError(String),
}

impl WeaveError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            WeaveError::Syntax { .. } => exit_codes::TEMPLATE_ERROR,
            WeaveError::Configuration(_) => exit_codes::TEMPLATE_ERROR,
            WeaveError::UnsupportedFeature { .. } => exit_codes::TEMPLATE_ERROR,
            WeaveError::RetryExhausted { .. } => exit_codes::MODEL_FAILURE,
            WeaveError::Provider(_) => exit_codes::MODEL_FAILURE,
            WeaveError::Cache(_) => exit_codes::USER_ERROR,
            WeaveError::UserError(_) => exit_codes::USER_ERROR,
        }
    }

    /// Build a syntax error, translating a byte offset into a line and column.
    pub fn syntax_at(source: &str, offset: usize, message: impl Into<String>) -> Self {
        let offset = offset.min(source.len());
        let before = &source[..offset];
        let line = before.matches('\n').count() + 1;
        let column = match before.rfind('\n') {
            Some(nl) => before[nl + 1..].chars().count() + 1,
            None => before.chars().count() + 1,
        };
        WeaveError::Syntax {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Result type alias for tagweave operations.
pub type Result<T> = std::result::Result<T, WeaveError>;
