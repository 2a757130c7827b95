// SPDX-License-Identifier: Apache-2.0

//! Execution and method contexts handed to listeners

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use qore_core::{DriverError, Value};

use super::cursor::CursorHandle;
use super::recorder::QueryInfo;
use super::statement::CallResult;
use super::types::{ConnectionInfo, Method, StatementType};

/// Immutable record of one intercepted executing call
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub data_source_name: String,
    pub method: Method,
    /// Raw call arguments; absent for parameterized statements
    pub method_args: Option<Vec<Value>>,
    pub result: Option<CallResult>,
    pub elapsed: Duration,
    pub failure: Option<DriverError>,
    pub statement_type: StatementType,
    pub is_batch: bool,
    pub batch_size: usize,
    pub connection_id: String,
    pub queries: Vec<QueryInfo>,
    pub thread_id: String,
    pub thread_name: Option<String>,
    pub generated_keys: Option<CursorHandle>,
    pub started_at: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn builder() -> ExecutionContextBuilder {
        ExecutionContextBuilder::default()
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Fluent assembly of an [`ExecutionContext`]
///
/// `build()` never fails: anything not supplied gets a sentinel value.
#[derive(Debug, Default)]
pub struct ExecutionContextBuilder {
    data_source_name: Option<String>,
    method: Option<Method>,
    method_args: Option<Vec<Value>>,
    result: Option<CallResult>,
    elapsed: Option<Duration>,
    failure: Option<DriverError>,
    statement_type: Option<StatementType>,
    is_batch: bool,
    batch_size: usize,
    connection_id: Option<String>,
    queries: Vec<QueryInfo>,
    generated_keys: Option<CursorHandle>,
    started_at: Option<DateTime<Utc>>,
}

impl ExecutionContextBuilder {
    pub fn data_source_name(mut self, name: impl Into<String>) -> Self {
        self.data_source_name = Some(name.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn method_args(mut self, args: Option<Vec<Value>>) -> Self {
        self.method_args = args;
        self
    }

    pub fn result(mut self, result: Option<CallResult>) -> Self {
        self.result = result;
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    pub fn failure(mut self, failure: Option<DriverError>) -> Self {
        self.failure = failure;
        self
    }

    pub fn statement_type(mut self, statement_type: StatementType) -> Self {
        self.statement_type = Some(statement_type);
        self
    }

    pub fn batch(mut self, is_batch: bool, batch_size: usize) -> Self {
        self.is_batch = is_batch;
        self.batch_size = batch_size;
        self
    }

    pub fn connection_id(mut self, id: impl Into<String>) -> Self {
        self.connection_id = Some(id.into());
        self
    }

    pub fn queries(mut self, queries: Vec<QueryInfo>) -> Self {
        self.queries = queries;
        self
    }

    pub fn generated_keys(mut self, keys: Option<CursorHandle>) -> Self {
        self.generated_keys = keys;
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn build(self) -> ExecutionContext {
        let current = std::thread::current();
        ExecutionContext {
            data_source_name: self.data_source_name.unwrap_or_default(),
            method: self.method.unwrap_or(Method::UNKNOWN),
            method_args: self.method_args,
            result: self.result,
            elapsed: self.elapsed.unwrap_or_default(),
            failure: self.failure,
            statement_type: self.statement_type.unwrap_or(StatementType::Statement),
            is_batch: self.is_batch,
            batch_size: if self.is_batch { self.batch_size } else { 0 },
            connection_id: self.connection_id.unwrap_or_default(),
            queries: self.queries,
            thread_id: format!("{:?}", current.id()),
            thread_name: current.name().map(str::to_string),
            generated_keys: self.generated_keys,
            started_at: self.started_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Context of one delegate-facing call, used by method hooks
#[derive(Debug, Clone)]
pub struct MethodContext {
    pub method: Method,
    /// Type name of the driver object the call targets
    pub target_type: &'static str,
    pub target_description: String,
    pub args: Vec<Value>,
    pub connection: Option<Arc<ConnectionInfo>>,
    /// Zero in `before_method`
    pub elapsed: Duration,
    /// Always `None` in `before_method`
    pub failure: Option<DriverError>,
}

impl MethodContext {
    pub fn new(method: Method, target_type: &'static str, target_description: String) -> Self {
        Self {
            method,
            target_type,
            target_description,
            args: Vec::new(),
            connection: None,
            elapsed: Duration::ZERO,
            failure: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_connection(mut self, connection: Option<Arc<ConnectionInfo>>) -> Self {
        self.connection = connection;
        self
    }

    /// Fills in the outcome after the delegate returned
    pub fn complete(&mut self, elapsed: Duration, failure: Option<&DriverError>) {
        self.elapsed = elapsed;
        self.failure = failure.cloned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::types::ObjectKind;

    #[test]
    fn test_build_with_nothing_uses_sentinels() {
        let ctx = ExecutionContext::builder().build();
        assert_eq!(ctx.data_source_name, "");
        assert_eq!(ctx.method, Method::UNKNOWN);
        assert_eq!(ctx.batch_size, 0);
        assert!(!ctx.is_batch);
        assert!(ctx.queries.is_empty());
        assert!(ctx.is_success());
        assert_eq!(ctx.elapsed, Duration::ZERO);
    }

    #[test]
    fn test_batch_size_ignored_for_non_batch() {
        let ctx = ExecutionContext::builder().batch(false, 4).build();
        assert_eq!(ctx.batch_size, 0);

        let ctx = ExecutionContext::builder().batch(true, 4).build();
        assert_eq!(ctx.batch_size, 4);
    }

    #[test]
    fn test_failure_marks_unsuccessful() {
        let ctx = ExecutionContext::builder()
            .method(Method::new(ObjectKind::Statement, "execute"))
            .failure(Some(DriverError::syntax_error("oops")))
            .build();
        assert!(!ctx.is_success());
        assert_eq!(ctx.method.to_string(), "Statement.execute");
    }

    #[test]
    fn test_thread_information_is_captured() {
        let handle = std::thread::Builder::new()
            .name("worker-7".to_string())
            .spawn(|| ExecutionContext::builder().build())
            .unwrap();
        let ctx = handle.join().unwrap();
        assert_eq!(ctx.thread_name.as_deref(), Some("worker-7"));
        assert!(ctx.thread_id.starts_with("ThreadId("));
    }
}
