//! Common error types for QP Driver
//!
//! This module defines all error types used across the QP Driver xApp.
//! Handler-local failures are absorbed inside the handlers; these types
//! cover the configuration and I/O edges where errors do propagate.

use thiserror::Error;

/// Main error type for QP Driver
#[derive(Error, Debug)]
pub enum QpDriverError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared-data layer errors
    #[error("Shared-data error: {0}")]
    SharedData(String),

    /// Message transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QpDriverError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        QpDriverError::Config(msg.into())
    }

    /// Create a shared-data error
    pub fn shared_data(msg: impl Into<String>) -> Self {
        QpDriverError::SharedData(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        QpDriverError::Transport(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        QpDriverError::Timeout(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        QpDriverError::Internal(msg.into())
    }
}

/// Result type alias for QP Driver operations
pub type Result<T> = std::result::Result<T, QpDriverError>;
