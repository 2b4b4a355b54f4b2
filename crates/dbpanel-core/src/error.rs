//! Error types for dbpanel core

use thiserror::Error;

/// Every failure the core reports to the dialog layer.
///
/// Messages name the target and the operation but never carry statement
/// text or bound values.
#[derive(Error, Debug)]
pub enum PanelError {
    /// Malformed or missing input, detected before any statement is sent.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The report catalog or strategy table is inconsistent.
    #[error("Configuration error for `{key}`: {message}")]
    Configuration { key: String, message: String },

    /// A catalog query failed or the target does not exist.
    #[error("Introspection of `{target}` failed: {message}")]
    Introspection { target: String, message: String },

    /// A single attempt lost a write-write race; retryable.
    #[error("Serialization conflict: {0}")]
    SerializationConflict(String),

    #[error("{operation} on `{target}` gave up after {attempts} attempts: {message}")]
    RetryExhausted {
        target: String,
        operation: String,
        attempts: u32,
        message: String,
    },

    /// Non-transient failure: constraint violation, type error, or a
    /// business rule raised by a stored procedure.
    #[error("{operation} on `{target}` failed: {message}")]
    Execution {
        target: String,
        operation: String,
        message: String,
    },

    #[error("Connection error: {0}")]
    Connection(String),
}

pub type Result<T> = std::result::Result<T, PanelError>;

impl PanelError {
    pub fn validation(message: impl Into<String>) -> Self {
        PanelError::Validation(message.into())
    }

    pub fn configuration(key: impl Into<String>, message: impl Into<String>) -> Self {
        PanelError::Configuration {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn introspection(target: impl Into<String>, message: impl Into<String>) -> Self {
        PanelError::Introspection {
            target: target.into(),
            message: message.into(),
        }
    }

    /// True for errors the user can fix by changing their input.
    pub fn is_user_error(&self) -> bool {
        matches!(self, PanelError::Validation(_))
    }
}

impl From<config::ConfigError> for PanelError {
    fn from(err: config::ConfigError) -> Self {
        PanelError::configuration("catalog", err.to_string())
    }
}
