//! Error types for yieldscan

use thiserror::Error;

/// yieldscan error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid run configuration (bad glob, unknown process, empty binning, ...)
    #[error("configuration error: {0}")]
    Config(String),

    /// Expression compile error (unknown field, bad syntax, ...)
    #[error("expression error: {0}")]
    Expression(String),

    /// Event source could not be opened or is malformed
    #[error("event source error: {0}")]
    Source(String),

    /// Figure could not be rendered
    #[error("figure error: {0}")]
    Figure(String),

    /// A worker task panicked or was dropped before producing a result
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// Statistical computation has no valid result for the given inputs
    #[error("degenerate input: {0}")]
    Degenerate(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.json");
        let err: Error = io.into();
        assert!(err.to_string().contains("missing.json"));
    }

    #[test]
    fn display_names_category() {
        let err = Error::Degenerate("all 100 toys discarded".into());
        assert_eq!(err.to_string(), "degenerate input: all 100 toys discarded");
    }
}
