//! Error types for the memory core

use std::path::Path;
use thiserror::Error;

/// Result alias used across the memory core
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors raised by the memory core
///
/// Unknown ids are never errors: lookups return `None` and mutations return
/// `false`. Errors are reserved for I/O, serialization, invalid input and
/// lifecycle misuse.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Storage backend failure
    #[error("storage operation '{operation}' failed: {source}")]
    Storage {
        /// Operation that failed
        operation: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// (De)serialization failure
    #[error("serialization failed in '{context}': {source}")]
    Serialization {
        /// What was being (de)serialized
        context: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// Input rejected by validation
    #[error("validation failed for '{field}': {constraint} (got {value})")]
    Validation {
        /// Field or parameter name
        field: String,
        /// Violated constraint
        constraint: String,
        /// Offending value
        value: String,
    },

    /// A typed record was decoded from a payload with a different schema tag
    #[error("schema mismatch: expected '{expected}', found '{found}'")]
    Schema {
        /// Schema requested by the caller
        expected: String,
        /// Schema stored in the payload
        found: String,
    },

    /// A store is already open for this storage location
    #[error("memory store already open for {location}")]
    AlreadyOpen {
        /// Storage location
        location: String,
    },

    /// Operation attempted after shutdown
    #[error("memory store has been shut down")]
    Closed,

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem
        message: String,
    },
}

impl MemoryError {
    /// Create a storage error
    pub fn storage(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            operation: operation.into(),
            source,
        }
    }

    /// Create a storage error for a path
    pub fn storage_path(operation: &str, path: &Path, source: std::io::Error) -> Self {
        Self::Storage {
            operation: format!("{} {}", operation, path.display()),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    /// Create a validation error
    pub fn validation(
        field: impl Into<String>,
        constraint: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
            value: value.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
