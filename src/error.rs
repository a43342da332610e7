use thiserror::Error;

/// Main error type for estante operations
#[derive(Error, Debug)]
pub enum EstanteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt segment data: {0}")]
    Corrupt(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Index error: {0}")]
    Index(String),
}

/// Result type alias for estante operations
pub type Result<T> = std::result::Result<T, EstanteError>;

impl EstanteError {
    /// Check whether the error is confined to a single segment, in which
    /// case a search may continue over the remaining segments.
    pub fn is_segment_local(&self) -> bool {
        matches!(self, EstanteError::Corrupt(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EstanteError::Corrupt("bad offsets record".to_string());
        assert_eq!(err.to_string(), "Corrupt segment data: bad offsets record");
    }

    #[test]
    fn test_segment_local_errors() {
        assert!(EstanteError::Corrupt("x".to_string()).is_segment_local());
        assert!(!EstanteError::InvalidArgument("x".to_string()).is_segment_local());
    }
}
