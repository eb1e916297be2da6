//! Error types for calcal-core.

use thiserror::Error;

/// Result type alias for calcal operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for calibration processing.
///
/// `Format`, `DataQuality` and `Fit` follow the fault taxonomy used by every
/// stage: format faults are always fatal, data-quality faults are fatal only
/// when they leave an output channel unpopulated, and fit faults fall back to
/// robust estimates where a fallback exists.
#[derive(Error, Debug)]
pub enum Error {
    /// A coordinate component exceeds its cardinality.
    #[error("invalid {component} value {value} (must be < {limit})")]
    InvalidCoordinate {
        component: &'static str,
        value: usize,
        limit: usize,
    },

    /// Event or file shape mismatch.
    #[error("format fault: {0}")]
    Format(String),

    /// Non-physical derived value.
    #[error("data quality fault: {0}")]
    DataQuality(String),

    /// Underlying fit failed to converge.
    #[error("fit fault: {0}")]
    Fit(String),

    /// An output channel has no value when it must be written.
    #[error("channel {channel} is unpopulated in {table}")]
    UnpopulatedChannel { table: &'static str, channel: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Pipeline stage called out of order or after a failure.
    #[error("pipeline stage error: {0}")]
    Stage(String),
}

impl Error {
    /// Prefixes a fault raised while processing one event with the entry
    /// number and event id, keeping its category.
    #[must_use]
    pub fn in_event(self, entry: usize, id: u64) -> Self {
        let at = |msg: String| format!("entry {entry} (event {id}): {msg}");
        match self {
            Error::Format(msg) => Error::Format(at(msg)),
            Error::DataQuality(msg) => Error::DataQuality(at(msg)),
            Error::Fit(msg) => Error::Fit(at(msg)),
            Error::Stage(msg) => Error::Stage(at(msg)),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_context_keeps_category() {
        let err = Error::Format("hit (0, 1, 2) has 3 readouts, expected 4".into());
        let err = err.in_event(7, 4242);
        assert!(matches!(err, Error::Format(_)));
        assert_eq!(
            err.to_string(),
            "format fault: entry 7 (event 4242): hit (0, 1, 2) has 3 readouts, expected 4"
        );
        let err = Error::Config("x".into()).in_event(0, 1);
        assert!(matches!(err, Error::Config(_)));
    }
}
