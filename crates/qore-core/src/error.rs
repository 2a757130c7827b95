// SPDX-License-Identifier: Apache-2.0

//! Normalized driver error type
//!
//! Every failure raised by a wrapped driver is expressed as a `DriverError`.
//! The proxy layer never rewrites these: it reports them to listeners and
//! hands the same value back to the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by the underlying database driver
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum DriverError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Query syntax error: {message}")]
    SyntaxError { message: String },

    #[error("Query execution error: {message}")]
    ExecutionError { message: String },

    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("{object} is closed")]
    Closed { object: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Feature not supported: {message}")]
    NotSupported { message: String },

    #[error("Transaction error: {message}")]
    TransactionError { message: String },

    #[error("Driver error [{sql_state}]: {message}")]
    Vendor { sql_state: String, message: String },
}

impl DriverError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: msg.into() }
    }

    pub fn syntax_error(msg: impl Into<String>) -> Self {
        Self::SyntaxError { message: msg.into() }
    }

    pub fn execution_error(msg: impl Into<String>) -> Self {
        Self::ExecutionError { message: msg.into() }
    }

    pub fn constraint_violation(msg: impl Into<String>) -> Self {
        Self::ConstraintViolation { message: msg.into() }
    }

    pub fn closed(object: impl Into<String>) -> Self {
        Self::Closed { object: object.into() }
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported { message: msg.into() }
    }

    pub fn transaction_error(msg: impl Into<String>) -> Self {
        Self::TransactionError { message: msg.into() }
    }

    pub fn vendor(sql_state: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Vendor {
            sql_state: sql_state.into(),
            message: msg.into(),
        }
    }
}

/// Result type alias for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = DriverError::vendor("23505", "duplicate key");
        assert_eq!(err.to_string(), "Driver error [23505]: duplicate key");
        assert_eq!(DriverError::closed("Cursor").to_string(), "Cursor is closed");
    }

    #[test]
    fn test_serialize_roundtrip_keeps_variant() {
        let err = DriverError::syntax_error("near FROM");
        let json = serde_json::to_string(&err).unwrap();
        let back: DriverError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
