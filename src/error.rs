use thiserror::Error;

/// Errors produced by the tile engine.
///
/// The enum is `Clone` because a single in-flight fetch hands its outcome to
/// every caller waiting on the same tile.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("FFT sizes {current} and {requested} are not integer multiples of each other")]
    SizeMismatch { current: usize, requested: usize },

    #[error("unsupported datatype: {0}")]
    InvalidDatatype(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("index {index} out of range (total {total})")]
    OutOfRange { index: usize, total: usize },

    #[error("cancelled")]
    Cancelled,

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl EngineError {
    /// Fetch failures that a later request may not hit again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound(_) | EngineError::Cancelled | EngineError::Io(_) | EngineError::Http(_)
        )
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::NotFound(e.to_string()),
            _ => EngineError::Io(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Json(e.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.status() == Some(reqwest::StatusCode::NOT_FOUND) {
            return EngineError::NotFound(e.to_string());
        }
        EngineError::Http(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err: EngineError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_fatal_errors_are_not_transient() {
        assert!(!EngineError::SizeMismatch { current: 16, requested: 30 }.is_transient());
        assert!(!EngineError::InvalidDatatype("ci12".into()).is_transient());
    }
}
