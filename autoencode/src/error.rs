//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Download or upload failed or produced nothing usable.
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// The external encoder exited unsuccessfully.
    #[error("Encode failed for {quality} (exit code {code:?}): {diagnostics}")]
    Encode {
        quality: String,
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("Encoder reported success for {quality} but produced no output at {path}")]
    MissingOutput { quality: String, path: String },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Admission queue is closed")]
    QueueClosed,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Cancellation is a normal termination path, not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_error_display() {
        let err = Error::Encode {
            quality: "720".to_string(),
            code: Some(1),
            diagnostics: "Invalid data found when processing input".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Encode failed for 720 (exit code Some(1)): Invalid data found when processing input"
        );
    }

    #[test]
    fn test_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::transfer("empty path").is_cancelled());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
