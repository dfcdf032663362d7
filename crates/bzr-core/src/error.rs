//! Error types for bzreport.
//!
//! Only conditions that end a report request live here. Everything that
//! degrades gracefully is a [`crate::diagnostics::Diagnostic`] instead.

use thiserror::Error;

/// Top-level result type for bzreport operations.
pub type Result<T> = std::result::Result<T, ReportError>;

/// Fatal errors for a single report request.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("unable to connect to the bug database: {0}")]
    ConnectionFailed(String),

    #[error("query failed: {message} [SQL: {sql}]")]
    QueryFailed { sql: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for ReportError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}
