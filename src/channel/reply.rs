//! Boundary reply shape.
//!
//! Gateways that cannot carry a Rust `Result` (JSON bridges, the CLI's
//! `--json` output) flatten one into a [`Reply`].

use crate::error::{ChansyncError, ErrorKind, Result};
use serde::{Deserialize, Serialize};

/// Flattened `Result`: `success` plus either a value or an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply<T> {
    pub success: bool,
    pub value: Option<T>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: String,
}

impl<T> Reply<T> {
    /// Successful reply carrying `value`.
    pub fn ok(value: T) -> Self {
        Self {
            success: true,
            value: Some(value),
            error_kind: None,
            error_message: String::new(),
        }
    }

    /// Failed reply describing `error`.
    pub fn err(error: &ChansyncError) -> Self {
        Self {
            success: false,
            value: None,
            error_kind: Some(error.kind()),
            error_message: error.to_string(),
        }
    }
}

impl<T> From<Result<T>> for Reply<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::err(&e),
        }
    }
}

impl<T: Serialize> Reply<T> {
    /// Encodes the reply as JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| ChansyncError::serialization(format!("Failed to encode reply: {}", e)))
    }
}
