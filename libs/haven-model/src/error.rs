//! Model Substrate Error Types

use crate::address::Address;
use thiserror::Error;

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Model substrate errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// No model exists at the given address
    #[error("Model not found: {0}")]
    NotFound(Address),

    /// A model already exists at the given address
    #[error("Model already exists: {0}")]
    AlreadyExists(Address),

    /// A required attribute is missing from a model
    #[error("Required attribute missing: {0}")]
    AttributeMissing(String),

    /// An attribute holds a value of an unexpected type
    #[error("Attribute {key} is not a {expected}")]
    AttributeType {
        key: String,
        expected: &'static str,
    },

    /// Address string could not be parsed
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::SerializationError(err.to_string())
    }
}
