//! Error types for civicetl.
//!
//! Library crates use [`CivicError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all civicetl operations.
///
/// Every variant is terminal for the run that produced it: there is no
/// per-record skip-and-continue path.
#[derive(Debug, thiserror::Error)]
pub enum CivicError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Dataset catalog or dataset download could not be used.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Council API session bootstrap failed (missing CSRF cookie or token).
    #[error("authentication failure: {0}")]
    AuthenticationFailure(String),

    /// A result page claimed records but carried none.
    #[error("page {page} of {total_pages} returned no records")]
    EmptyPage { page: u32, total_pages: u32 },

    /// Non-success HTTP status or transport failure on the council API.
    #[error("request failed: {0}")]
    RequestFailure(String),

    /// CSV header contains a column outside the expected set.
    #[error("unexpected column \"{column}\"")]
    UnexpectedColumn { column: String },

    /// A canonical row is not fit for staging.
    #[error("invalid row shape (row {row}): {message}")]
    InvalidRowShape { row: i64, message: String },

    /// Contact first or last name is blank.
    #[error("incomplete identity \"{name}\"")]
    IncompleteIdentity { name: String },

    /// Blank text passed where content is required.
    #[error("cannot slugify empty input")]
    EmptyInput,

    /// Slug normalization left nothing of a non-blank input.
    #[error("slugifying \"{input}\" produced an empty slug")]
    SlugificationFailure { input: String },

    /// No `YYYY-YYYY` substring in a label.
    #[error("unable to find term in \"{label}\"")]
    TermNotFound { label: String },

    /// A statement touched a different number of rows than required.
    #[error("expected {expected} affected row(s) but got {actual}")]
    RowCountMismatch { expected: u64, actual: u64 },

    /// Another ETL run holds the run lock.
    #[error("another run is in progress (held by {holder})")]
    RunInProgress { holder: String },

    /// CSV or JSON payload could not be decoded.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Data validation error (missing required value, bad integer, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CivicError>;

impl CivicError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = CivicError::config("missing database path");
        assert_eq!(err.to_string(), "config error: missing database path");

        let err = CivicError::UnexpectedColumn {
            column: "Shoe Size".into(),
        };
        assert_eq!(err.to_string(), "unexpected column \"Shoe Size\"");

        let err = CivicError::TermNotFound {
            label: "Voting Record".into(),
        };
        assert!(err.to_string().contains("Voting Record"));
    }

    #[test]
    fn row_count_mismatch_names_both_counts() {
        let err = CivicError::RowCountMismatch {
            expected: 1,
            actual: 0,
        };
        assert_eq!(err.to_string(), "expected 1 affected row(s) but got 0");
    }
}
