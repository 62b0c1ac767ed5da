//! Error types for the verification core

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Request-level errors. Per-constraint failures (compile errors,
/// extraction warnings, indeterminate verdicts) never surface here —
/// they are folded into a report's `violations`/`warnings` instead
/// (see [`crate::verify::Violation`]).
#[derive(Error, Debug)]
pub enum Error {
    #[error("ontology '{name}' failed to load: {reason}")]
    LoadError { name: String, reason: String },

    #[error("unknown ontology: {0}")]
    UnknownOntology(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("solver error: {0}")]
    Solver(String),

    #[error("{0}")]
    Internal(String),
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}
