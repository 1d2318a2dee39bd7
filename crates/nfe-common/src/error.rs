//! Error types for the nfe-drop pipeline
//!
//! This module provides user-friendly error types with actionable messages
//! that help diagnose and resolve ingestion issues.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, NfeError>;

/// Main error type shared across the pipeline
#[derive(Error, Debug)]
pub enum NfeError {
    /// File system operations failed (read, write, rename, create directory)
    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("Failed to process JSON data: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration is missing or invalid
    #[error("Configuration error: {message}. {suggestion}")]
    Config { message: String, suggestion: String },

    /// Failed to parse input data
    #[error("Failed to parse {data_type}: {reason}")]
    Parse { data_type: String, reason: String },

    /// Broker operation failed
    #[error("Queue operation failed: {operation} - {reason}")]
    Queue { operation: String, reason: String },

    /// Database operation failed
    #[error("Database operation failed: {operation} - {reason}")]
    Database { operation: String, reason: String },

    /// XML schema validation failed
    #[error("Schema validation failed for '{file}': {reason}")]
    SchemaValidation { file: String, reason: String },

    /// Filesystem change notification failed
    #[error("Filesystem watch error: {0}")]
    Watch(String),
}

impl NfeError {
    /// Create a configuration error with suggestion
    pub fn config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a parse error
    pub fn parse(data_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            data_type: data_type.into(),
            reason: reason.into(),
        }
    }

    /// Create a queue error
    pub fn queue(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Queue {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a database error
    pub fn database(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a schema validation error
    pub fn schema_validation(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaValidation {
            file: file.into(),
            reason: reason.into(),
        }
    }
}
