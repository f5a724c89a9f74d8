//! Unified error types for the topolink crates
//!
//! [`TopoError`] is the common error at library boundaries. Store-specific and
//! parser-specific errors convert into it so sync, repair and stitch passes can
//! report a single type.
//!
//! # Example
//!
//! ```ignore
//! use topolink_core::{TopoError, TopoResult};
//!
//! fn reconcile(path: &str) -> TopoResult<()> {
//!     let model = parse_cim_file(path)?;
//!     repair_feeder(&model)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Unified error type for topolink operations.
#[derive(Error, Debug)]
pub enum TopoError {
    /// I/O errors (file access, snapshot persistence)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed source model
    #[error("Parse error: {0}")]
    Parse(String),

    /// Backing store query/update failure
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Topology that could not be made whole or stitched
    #[error("Unresolved topology: {0}")]
    Unresolved(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using TopoError.
pub type TopoResult<T> = Result<T, TopoError>;

impl From<anyhow::Error> for TopoError {
    fn from(err: anyhow::Error) -> Self {
        TopoError::Other(err.to_string())
    }
}

impl From<String> for TopoError {
    fn from(s: String) -> Self {
        TopoError::Other(s)
    }
}

impl From<&str> for TopoError {
    fn from(s: &str) -> Self {
        TopoError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for TopoError {
    fn from(err: serde_json::Error) -> Self {
        TopoError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TopoError::Unresolved("feeder F1 still has 2 islands".into());
        assert!(err.to_string().contains("Unresolved topology"));
        assert!(err.to_string().contains("2 islands"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "snapshot missing");
        let err: TopoError = io_err.into();
        assert!(matches!(err, TopoError::Io(_)));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> TopoResult<()> {
            Err(TopoError::Store("connection refused".into()))
        }

        fn outer() -> TopoResult<()> {
            inner()?;
            Ok(())
        }

        assert!(matches!(outer(), Err(TopoError::Store(_))));
    }
}
