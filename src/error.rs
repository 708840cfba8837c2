use crate::embedding::EmbeddingError;
use crate::storage::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for AstroNews
#[derive(Error, Debug)]
pub enum AstroError {
    /// Malformed input: empty text, invalid k, invalid article record
    #[error("Invalid input: {0}")]
    Input(String),

    /// Embedding model unavailable or input could not be embedded
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Query vectors and indexed vectors come from different embedding spaces
    #[error("Model version mismatch: index holds '{indexed}', query uses '{requested}'")]
    Consistency { indexed: String, requested: String },

    /// Persistence layer failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Operation was cancelled before it committed
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation exceeded its deadline before it committed
    #[error("Operation timed out after {secs}s")]
    TimedOut { secs: u64 },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse error classification for callers that map faults to responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Embedding,
    Consistency,
    Store,
    Config,
    Cancelled,
    Internal,
}

impl AstroError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AstroError::Input(_) => ErrorKind::Input,
            AstroError::Embedding(EmbeddingError::InvalidInput(_)) => ErrorKind::Input,
            AstroError::Embedding(_) => ErrorKind::Embedding,
            AstroError::Consistency { .. } => ErrorKind::Consistency,
            AstroError::Store(_) => ErrorKind::Store,
            AstroError::Config(_)
            | AstroError::ConfigValidation { .. }
            | AstroError::ConfigNotFound { .. }
            | AstroError::InvalidConfigValue { .. }
            | AstroError::Toml(_)
            | AstroError::TomlSerialization(_) => ErrorKind::Config,
            AstroError::Cancelled | AstroError::TimedOut { .. } => ErrorKind::Cancelled,
            AstroError::Io { .. } | AstroError::Json { .. } | AstroError::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub(crate) fn input(message: impl Into<String>) -> Self {
        AstroError::Input(message.into())
    }
}

impl From<rusqlite::Error> for AstroError {
    fn from(e: rusqlite::Error) -> Self {
        AstroError::Store(StoreError::Sqlite(e))
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for AstroNews operations
pub type Result<T> = std::result::Result<T, AstroError>;
