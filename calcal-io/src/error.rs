//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding or encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A calibration file line that does not parse.
    #[error("invalid file format at line {line}: {msg}")]
    InvalidFormat {
        /// 1-based line number.
        line: usize,
        /// What was wrong with it.
        msg: String,
    },

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] calcal_core::Error),
}

impl Error {
    pub(crate) fn invalid(line: usize, msg: impl Into<String>) -> Self {
        Error::InvalidFormat {
            line,
            msg: msg.into(),
        }
    }
}
