//! Error types for driftwatch

use std::fmt;

/// Result type alias for driftwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for driftwatch
#[derive(Debug)]
pub enum Error {
    /// Arrow-related errors
    Arrow(arrow_schema::ArrowError),
    /// Object store errors
    ObjectStore(object_store::Error),
    /// HTTP transport errors
    Http(reqwest::Error),
    /// IO errors
    Io(std::io::Error),
    /// Serialization errors
    Serialization(String),
    /// Configuration errors
    Config(String),
    /// Invalid schema
    InvalidSchema(String),
    /// Values that fit the schema but cannot be represented
    InvalidData(String),
    /// No factory registered for a model type
    UnknownModel(String),
    /// Model fit or predict failure
    Model(String),
    /// Artifact could not be decoded or does not match the requested model
    Artifact(String),
    /// TSDB read failure
    Read(String),
    /// TSDB write failure
    Write(String),
    /// Internal error
    Internal(String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Arrow(e) => Some(e),
            Error::ObjectStore(e) => Some(e),
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Arrow(e) => write!(f, "Arrow error: {}", e),
            Error::ObjectStore(e) => write!(f, "Object store error: {}", e),
            Error::Http(e) => write!(f, "HTTP error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::InvalidSchema(msg) => write!(f, "Invalid schema: {}", msg),
            Error::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
            Error::UnknownModel(name) => write!(f, "Unknown model type: {}", name),
            Error::Model(msg) => write!(f, "Model error: {}", msg),
            Error::Artifact(msg) => write!(f, "Artifact error: {}", msg),
            Error::Read(msg) => write!(f, "TSDB read error: {}", msg),
            Error::Write(msg) => write!(f, "TSDB write error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<arrow_schema::ArrowError> for Error {
    fn from(e: arrow_schema::ArrowError) -> Self {
        Error::Arrow(e)
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        Error::ObjectStore(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
