//! Error types for chansync operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for chansync operations.
pub type Result<T> = std::result::Result<T, ChansyncError>;

/// Main error type for chansync operations.
#[derive(Error, Debug)]
pub enum ChansyncError {
    /// Malformed or missing input (empty name, dangling parent, oversized body).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller lacks publish or admin rights for the target channel.
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Referenced channel, message or token does not exist locally.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation is not valid in the current state (token not ready, double vote).
    #[error("State error: {0}")]
    State(String),

    /// Signature creation or verification errors
    #[error("Signature error: {0}")]
    Signature(String),

    /// Persistent storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChansyncError {
    /// Creates a new validation error.
    pub fn validation<T: ToString>(msg: T) -> Self {
        Self::Validation(msg.to_string())
    }

    /// Creates a new permission error.
    pub fn permission<T: ToString>(msg: T) -> Self {
        Self::Permission(msg.to_string())
    }

    /// Creates a new not-found error.
    pub fn not_found<T: ToString>(msg: T) -> Self {
        Self::NotFound(msg.to_string())
    }

    /// Creates a new state error.
    pub fn state<T: ToString>(msg: T) -> Self {
        Self::State(msg.to_string())
    }

    /// Creates a new signature error.
    pub fn signature<T: ToString>(msg: T) -> Self {
        Self::Signature(msg.to_string())
    }

    /// Creates a new storage error.
    pub fn storage<T: ToString>(msg: T) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Creates a new serialization error.
    pub fn serialization<T: ToString>(msg: T) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Creates a new configuration error.
    pub fn config<T: ToString>(msg: T) -> Self {
        Self::Config(msg.to_string())
    }

    /// Returns the boundary classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Permission(_) => ErrorKind::Permission,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::State(_) => ErrorKind::State,
            Self::Signature(_) => ErrorKind::Validation,
            Self::Storage(_) | Self::Serialization(_) | Self::Io(_) | Self::Config(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Coarse error taxonomy reported to callers at the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or missing input.
    Validation,
    /// Missing publish or admin rights.
    Permission,
    /// Unknown channel, message or token.
    NotFound,
    /// Operation not valid in the current state.
    State,
    /// Storage, serialization or configuration failure.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "ValidationError"),
            ErrorKind::Permission => write!(f, "PermissionError"),
            ErrorKind::NotFound => write!(f, "NotFoundError"),
            ErrorKind::State => write!(f, "StateError"),
            ErrorKind::Internal => write!(f, "InternalError"),
        }
    }
}
