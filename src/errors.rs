use thiserror::Error;

/// Error types that can occur in the detection service
#[derive(Error, Debug)]
pub enum SentinelError {
    /// Invalid or missing configuration value
    #[error("Config error: {message}")]
    ConfigError {
        /// Error message
        message: String,
    },

    /// Event Store request failed (network, auth, or query error)
    #[error("Event store error: {message}")]
    StoreError {
        /// Error message
        message: String,
    },

    /// Model bundle could not be read from disk
    #[error("Model IO error: {0}")]
    ModelIoError(#[from] std::io::Error),

    /// Model bundle exists but could not be deserialized
    #[error("Model format error: {message}")]
    ModelFormatError {
        /// Error message
        message: String,
    },

    /// Too few feature windows to fit a meaningful model
    #[error("Insufficient training data: {windows} feature windows (need at least {required})")]
    InsufficientTrainingData {
        /// Number of windows actually generated
        windows: usize,
        /// Minimum required
        required: usize,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Error message
        message: String,
    },
}

impl From<reqwest::Error> for SentinelError {
    fn from(err: reqwest::Error) -> Self {
        SentinelError::StoreError {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SentinelError {
    fn from(err: serde_json::Error) -> Self {
        SentinelError::SerializationError {
            message: err.to_string(),
        }
    }
}

/// Convenient Result type alias for detection service operations
pub type Result<T> = std::result::Result<T, SentinelError>;
