// SPDX-License-Identifier: Apache-2.0

//! Proxy error types
//!
//! Three families are kept apart:
//! - driver failures, forwarded untouched from the wrapped driver
//! - framework errors, raised by this crate for wiring/configuration defects
//! - listener errors, collected while fanning out notifications

use std::fmt;

use qore_core::DriverError;
use thiserror::Error;

use crate::interceptor::{CallResult, ConnectionReply, ProxyConnection};

/// Boxed error returned by listener callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Defect in how the proxy was configured or used
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameworkError {
    #[error("Missing proxy configuration: {0}")]
    MissingConfiguration(&'static str),

    #[error("Cursor wrapping failed: {message}")]
    CursorWrap { message: String },

    #[error("Call `{call}` is not supported by {target}")]
    UnsupportedCall {
        call: &'static str,
        target: &'static str,
    },

    #[error("Call `{call}` produced an unexpected result")]
    UnexpectedResult { call: &'static str },

    #[error("Invalid proxy settings: {message}")]
    InvalidSettings { message: String },
}

impl FrameworkError {
    pub fn cursor_wrap(msg: impl Into<String>) -> Self {
        Self::CursorWrap {
            message: msg.into(),
        }
    }

    pub fn invalid_settings(msg: impl Into<String>) -> Self {
        Self::InvalidSettings {
            message: msg.into(),
        }
    }
}

/// Notification phase in which a listener failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerPhase {
    AfterQuery,
    BeforeMethod,
    AfterMethod,
}

impl fmt::Display for ListenerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AfterQuery => f.write_str("after_query"),
            Self::BeforeMethod => f.write_str("before_method"),
            Self::AfterMethod => f.write_str("after_method"),
        }
    }
}

/// One listener callback that returned an error
#[derive(Debug, Error)]
#[error("listener `{listener}` failed in {phase}: {source}")]
pub struct ListenerFailure {
    pub listener: String,
    pub phase: ListenerPhase,
    #[source]
    pub source: BoxError,
}

/// Result of a driver call that succeeded before its listeners failed
#[derive(Debug)]
pub enum CompletedCall {
    Statement(CallResult),
    Connection(ConnectionReply),
    DataSource(ProxyConnection),
}

/// Every listener failure collected during one intercepted call
///
/// When the driver call itself succeeded, its result travels in `completed`
/// so the caller can still use it.
#[derive(Debug, Error)]
#[error("{} listener notification(s) failed", .failures.len())]
pub struct ListenerErrors {
    pub failures: Vec<ListenerFailure>,
    pub completed: Option<CompletedCall>,
}

impl ListenerErrors {
    pub fn new(failures: Vec<ListenerFailure>) -> Self {
        Self {
            failures,
            completed: None,
        }
    }

    pub fn with_completed(mut self, completed: CompletedCall) -> Self {
        self.completed = Some(completed);
        self
    }
}

/// Error returned by proxied calls
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Framework(#[from] FrameworkError),

    #[error(transparent)]
    Listener(#[from] ListenerErrors),
}

impl ProxyError {
    /// The untouched driver failure, if this is one
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Driver(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_driver_failure(&self) -> bool {
        matches!(self, Self::Driver(_))
    }

    /// Result of the driver call when only listeners failed
    pub fn into_completed(self) -> Option<CompletedCall> {
        match self {
            Self::Listener(errors) => errors.completed,
            _ => None,
        }
    }
}

/// Result type alias for proxied calls
pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_is_transparent() {
        let err = ProxyError::from(DriverError::syntax_error("near FROM"));
        assert_eq!(err.to_string(), "Query syntax error: near FROM");
        assert!(err.is_driver_failure());
        assert_eq!(err.driver_error(), Some(&DriverError::syntax_error("near FROM")));
    }

    #[test]
    fn test_listener_errors_display() {
        let errors = ListenerErrors::new(vec![ListenerFailure {
            listener: "audit".to_string(),
            phase: ListenerPhase::AfterQuery,
            source: "disk full".into(),
        }]);
        assert_eq!(errors.to_string(), "1 listener notification(s) failed");
        assert_eq!(
            errors.failures[0].to_string(),
            "listener `audit` failed in after_query: disk full"
        );
        assert!(errors.completed.is_none());
    }

    #[test]
    fn test_completed_call_recovered_from_listener_error() {
        let err = ProxyError::from(
            ListenerErrors::new(Vec::new()).with_completed(CompletedCall::Statement(CallResult::UpdateCount(3))),
        );
        match err.into_completed() {
            Some(CompletedCall::Statement(CallResult::UpdateCount(n))) => assert_eq!(n, 3),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(ProxyError::from(DriverError::syntax_error("x")).into_completed().is_none());
    }
}
