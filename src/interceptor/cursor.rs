// SPDX-License-Identifier: Apache-2.0

//! Cursor handles and cursor wrapping
//!
//! Cursors handed out by the proxy are shared handles so the generated-keys
//! cache, execution contexts and the caller can all refer to the same cursor.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use qore_core::{Cursor, DriverObject, DriverResult, Value};

use super::context::MethodContext;
use super::pipeline::{log_failures, FailureCollector, ListenerPipeline};
use super::types::{ConnectionInfo, Method, ObjectKind, StatementType};
use crate::error::FrameworkError;

/// Shared, cloneable handle to a cursor
///
/// Clones refer to the same underlying cursor; [`CursorHandle::ptr_eq`]
/// tells whether two handles are the same cursor.
#[derive(Clone)]
pub struct CursorHandle {
    inner: Arc<Mutex<Box<dyn Cursor>>>,
}

impl CursorHandle {
    pub fn new(cursor: Box<dyn Cursor>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cursor)),
        }
    }

    pub fn ptr_eq(&self, other: &CursorHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn next(&self) -> DriverResult<bool> {
        self.inner.lock().next()
    }

    pub fn get(&self, column: usize) -> DriverResult<Value> {
        self.inner.lock().get(column)
    }

    pub fn column_count(&self) -> usize {
        self.inner.lock().column_count()
    }

    pub fn before_first(&self) -> DriverResult<()> {
        self.inner.lock().before_first()
    }

    pub fn close(&self) -> DriverResult<()> {
        self.inner.lock().close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_closed()
    }

    pub fn type_name(&self) -> &'static str {
        self.inner.lock().type_name()
    }

    pub fn describe(&self) -> String {
        self.inner.lock().describe()
    }

    /// Whether the cursor is (or wraps) a cursor of the given type name
    pub fn is_wrapper_for(&self, type_name: &str) -> bool {
        self.inner.lock().is_wrapper_for(type_name)
    }

    /// Whether the cursor was wrapped by one of the proxy factories
    pub fn is_proxy(&self) -> bool {
        let guard = self.inner.lock();
        let any = guard.as_any();
        any.is::<ProxyCursor>() || any.is::<RepeatableReadCursor>()
    }

    /// Runs `f` against the concrete cursor type, if it matches
    pub fn with_downcast<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.inner.lock();
        guard.as_any().downcast_ref::<T>().map(f)
    }

    /// Reads every remaining row of the cursor
    pub fn read_all(&self) -> DriverResult<Vec<Vec<Value>>> {
        let mut cursor = self.inner.lock();
        drain_rows(cursor.as_mut())
    }
}

impl fmt::Debug for CursorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Some(cursor) => write!(f, "CursorHandle({})", cursor.describe()),
            None => f.write_str("CursorHandle(<in use>)"),
        }
    }
}

fn drain_rows(cursor: &mut dyn Cursor) -> DriverResult<Vec<Vec<Value>>> {
    let columns = cursor.column_count();
    let mut rows = Vec::new();
    while cursor.next()? {
        let row = (1..=columns)
            .map(|column| cursor.get(column))
            .collect::<DriverResult<Vec<_>>>()?;
        rows.push(row);
    }
    Ok(rows)
}

/// Which accessor produced a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    ResultSet,
    GeneratedKeys,
}

/// Where a cursor being wrapped came from
#[derive(Debug, Clone)]
pub struct CursorOrigin {
    pub kind: CursorKind,
    pub statement_type: StatementType,
    pub connection: Arc<ConnectionInfo>,
}

/// Wraps cursors returned by proxied statements
pub trait CursorProxyFactory: Send + Sync {
    fn wrap(
        &self,
        cursor: Box<dyn Cursor>,
        origin: &CursorOrigin,
    ) -> Result<Box<dyn Cursor>, FrameworkError>;
}

// ==================== Intercepting cursor ====================

/// Factory producing cursors that fire method hooks on every call
pub struct InterceptingCursorFactory {
    listeners: Arc<ListenerPipeline>,
}

impl InterceptingCursorFactory {
    pub fn new(listeners: Arc<ListenerPipeline>) -> Self {
        Self { listeners }
    }
}

impl CursorProxyFactory for InterceptingCursorFactory {
    fn wrap(
        &self,
        cursor: Box<dyn Cursor>,
        origin: &CursorOrigin,
    ) -> Result<Box<dyn Cursor>, FrameworkError> {
        Ok(Box::new(ProxyCursor {
            delegate: cursor,
            listeners: Arc::clone(&self.listeners),
            connection: Arc::clone(&origin.connection),
        }))
    }
}

/// Call made against a proxied cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorCall {
    Next,
    Get { column: usize },
    BeforeFirst,
    Close,
}

impl CursorCall {
    pub fn method(&self) -> Method {
        let name = match self {
            Self::Next => "next",
            Self::Get { .. } => "get",
            Self::BeforeFirst => "before_first",
            Self::Close => "close",
        };
        Method::new(ObjectKind::Cursor, name)
    }
}

/// Outcome of a [`CursorCall`]
#[derive(Debug, Clone, PartialEq)]
pub enum CursorReply {
    Unit,
    Bool(bool),
    Value(Value),
}

/// Cursor that reports every delegate call to the method hooks
///
/// Hook failures cannot travel through the cursor interface and are logged.
pub struct ProxyCursor {
    delegate: Box<dyn Cursor>,
    listeners: Arc<ListenerPipeline>,
    connection: Arc<ConnectionInfo>,
}

impl ProxyCursor {
    pub fn delegate(&self) -> &dyn Cursor {
        self.delegate.as_ref()
    }

    pub fn invoke(&mut self, call: CursorCall) -> DriverResult<CursorReply> {
        let mut ctx = MethodContext::new(
            call.method(),
            self.delegate.type_name(),
            self.delegate.describe(),
        )
        .with_connection(Some(Arc::clone(&self.connection)));
        if let CursorCall::Get { column } = call {
            ctx.args.push(Value::Int(column as i64));
        }

        let mut failures = FailureCollector::default();
        failures.absorb(self.listeners.before_method(&ctx));

        let start = Instant::now();
        let outcome = match call {
            CursorCall::Next => self.delegate.next().map(CursorReply::Bool),
            CursorCall::Get { column } => self.delegate.get(column).map(CursorReply::Value),
            CursorCall::BeforeFirst => self.delegate.before_first().map(|_| CursorReply::Unit),
            CursorCall::Close => self.delegate.close().map(|_| CursorReply::Unit),
        };
        ctx.complete(start.elapsed(), outcome.as_ref().err());

        failures.absorb(self.listeners.after_method(&ctx));
        log_failures(&failures.into_failures());
        outcome
    }
}

impl DriverObject for ProxyCursor {
    fn type_name(&self) -> &'static str {
        "ProxyCursor"
    }

    fn describe(&self) -> String {
        format!("ProxyCursor [{}]", self.delegate.describe())
    }

    fn is_wrapper_for(&self, type_name: &str) -> bool {
        type_name == "ProxyCursor" || self.delegate.is_wrapper_for(type_name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Cursor for ProxyCursor {
    fn next(&mut self) -> DriverResult<bool> {
        match self.invoke(CursorCall::Next)? {
            CursorReply::Bool(more) => Ok(more),
            _ => Ok(false),
        }
    }

    fn get(&self, column: usize) -> DriverResult<Value> {
        // reads do not mutate the cursor, so they bypass the hooks
        self.delegate.get(column)
    }

    fn column_count(&self) -> usize {
        self.delegate.column_count()
    }

    fn before_first(&mut self) -> DriverResult<()> {
        self.invoke(CursorCall::BeforeFirst).map(|_| ())
    }

    fn close(&mut self) -> DriverResult<()> {
        self.invoke(CursorCall::Close).map(|_| ())
    }

    fn is_closed(&self) -> bool {
        self.delegate.is_closed()
    }
}

// ==================== Repeatable-read cursor ====================

/// Factory buffering every row so the cursor can be rewound
///
/// Useful for generated keys: a listener may consume the keys and rewind
/// the cursor before the caller reads it.
#[derive(Debug, Default)]
pub struct RepeatableReadCursorFactory;

impl CursorProxyFactory for RepeatableReadCursorFactory {
    fn wrap(
        &self,
        mut cursor: Box<dyn Cursor>,
        _origin: &CursorOrigin,
    ) -> Result<Box<dyn Cursor>, FrameworkError> {
        let columns = cursor.column_count();
        let rows = drain_rows(cursor.as_mut())
            .map_err(|e| FrameworkError::cursor_wrap(format!("failed to buffer rows: {}", e)))?;
        Ok(Box::new(RepeatableReadCursor {
            delegate: cursor,
            rows,
            columns,
            position: None,
        }))
    }
}

/// Cursor replaying rows buffered from its delegate
pub struct RepeatableReadCursor {
    delegate: Box<dyn Cursor>,
    rows: Vec<Vec<Value>>,
    columns: usize,
    position: Option<usize>,
}

impl RepeatableReadCursor {
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }
}

impl DriverObject for RepeatableReadCursor {
    fn type_name(&self) -> &'static str {
        "RepeatableReadCursor"
    }

    fn describe(&self) -> String {
        format!("RepeatableReadCursor [{}]", self.delegate.describe())
    }

    fn is_wrapper_for(&self, type_name: &str) -> bool {
        type_name == "RepeatableReadCursor" || self.delegate.is_wrapper_for(type_name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Cursor for RepeatableReadCursor {
    fn next(&mut self) -> DriverResult<bool> {
        if self.delegate.is_closed() {
            return Err(qore_core::DriverError::closed(self.type_name()));
        }
        let next = self.position.map(|p| p + 1).unwrap_or(0);
        self.position = Some(next.min(self.rows.len()));
        Ok(next < self.rows.len())
    }

    fn get(&self, column: usize) -> DriverResult<Value> {
        let row = self
            .position
            .and_then(|p| self.rows.get(p))
            .ok_or_else(|| qore_core::DriverError::execution_error("cursor is not on a row"))?;
        column
            .checked_sub(1)
            .and_then(|idx| row.get(idx))
            .cloned()
            .ok_or_else(|| qore_core::DriverError::execution_error(format!("no column {}", column)))
    }

    fn column_count(&self) -> usize {
        self.columns
    }

    fn before_first(&mut self) -> DriverResult<()> {
        self.position = None;
        Ok(())
    }

    fn close(&mut self) -> DriverResult<()> {
        self.delegate.close()
    }

    fn is_closed(&self) -> bool {
        self.delegate.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::pipeline::{ListenerResult, QueryListener};
    use qore_core::mock::{MockCursor, MockState};

    fn origin() -> CursorOrigin {
        CursorOrigin {
            kind: CursorKind::GeneratedKeys,
            statement_type: StatementType::Prepared,
            connection: Arc::new(ConnectionInfo::new("ds", "1")),
        }
    }

    fn keys_cursor(state: &Arc<MockState>, keys: &[i64]) -> Box<dyn Cursor> {
        let rows = keys.iter().map(|k| vec![Value::Int(*k)]).collect();
        Box::new(MockCursor::new(Arc::clone(state), "MockKeysCursor", rows))
    }

    #[test]
    fn test_handle_clones_share_cursor() {
        let state = MockState::new();
        let handle = CursorHandle::new(keys_cursor(&state, &[5]));
        let other = handle.clone();

        assert!(handle.ptr_eq(&other));
        assert!(handle.next().unwrap());
        assert_eq!(other.get(1).unwrap(), Value::Int(5));
        other.close().unwrap();
        assert!(handle.is_closed());
        assert!(!handle.is_proxy());
    }

    #[test]
    fn test_repeatable_read_rewinds() {
        let state = MockState::new();
        let wrapped = RepeatableReadCursorFactory
            .wrap(keys_cursor(&state, &[1, 2]), &origin())
            .unwrap();
        let handle = CursorHandle::new(wrapped);

        assert_eq!(handle.read_all().unwrap(), vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
        handle.before_first().unwrap();
        assert!(handle.next().unwrap());
        assert_eq!(handle.get(1).unwrap(), Value::Int(1));
        assert!(handle.is_proxy());
        assert!(handle.is_wrapper_for("MockKeysCursor"));
    }

    #[test]
    fn test_repeatable_read_reports_buffering_failure() {
        let state = MockState::new();
        let mut cursor = keys_cursor(&state, &[1]);
        cursor.close().unwrap();

        let err = RepeatableReadCursorFactory.wrap(cursor, &origin()).err().unwrap();
        assert!(matches!(err, FrameworkError::CursorWrap { .. }));
    }

    #[test]
    fn test_intercepting_cursor_fires_hooks() {
        struct Methods(Mutex<Vec<String>>);
        impl QueryListener for Methods {
            fn before_method(&self, ctx: &MethodContext) -> ListenerResult {
                self.0.lock().push(format!("before {}", ctx.method));
                Ok(())
            }
            fn after_method(&self, ctx: &MethodContext) -> ListenerResult {
                self.0.lock().push(format!("after {}", ctx.method));
                Err("ignored".into())
            }
        }

        let listeners = Arc::new(ListenerPipeline::new());
        let methods = Arc::new(Methods(Mutex::new(Vec::new())));
        listeners.add_listener(methods.clone());

        let state = MockState::new();
        let factory = InterceptingCursorFactory::new(Arc::clone(&listeners));
        let handle = CursorHandle::new(factory.wrap(keys_cursor(&state, &[3]), &origin()).unwrap());

        assert!(handle.next().unwrap());
        assert_eq!(handle.get(1).unwrap(), Value::Int(3));
        handle.close().unwrap();

        assert_eq!(
            *methods.0.lock(),
            vec![
                "before Cursor.next",
                "after Cursor.next",
                "before Cursor.close",
                "after Cursor.close",
            ]
        );
        assert!(state.contains("close_cursor(MockKeysCursor)"));
        assert_eq!(handle.type_name(), "ProxyCursor");
        assert!(handle.with_downcast(|c: &ProxyCursor| c.delegate().type_name() == "MockKeysCursor").unwrap());
    }
}
