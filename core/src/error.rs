use thiserror::Error;

/// Kiln error types
#[derive(Error, Debug)]
pub enum KilnError {
    /// An instruction value could not be interpreted (e.g. malformed ARG)
    #[error("Invalid instruction: {keyword} {value} - {message}")]
    InvalidInstruction {
        keyword: String,
        value: String,
        message: String,
    },

    /// A layer split mark points past the end of the instruction stream
    #[error("Layer split {mark} is bigger than number of instructions ({count})")]
    SplitMark { mark: usize, count: usize },

    /// Layer planning failed
    #[error("Plan error: {0}")]
    PlanError(String),

    /// Container runtime operation failed
    #[error("Client error: {operation} - {message}")]
    ClientError { operation: String, message: String },

    /// Layer cache failure
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Build context could not resolve a source
    #[error("Build context error: {0}")]
    ContextError(String),

    /// Archive creation or inspection failed
    #[error("Archive error: {0}")]
    ArchiveError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl KilnError {
    /// Shorthand for a container runtime failure.
    pub fn client(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        KilnError::ClientError {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

impl From<serde_json::Error> for KilnError {
    fn from(err: serde_json::Error) -> Self {
        KilnError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for KilnError {
    fn from(err: serde_yaml::Error) -> Self {
        KilnError::SerializationError(err.to_string())
    }
}

/// Result type alias for Kiln operations
pub type Result<T> = std::result::Result<T, KilnError>;
