// SPDX-License-Identifier: Apache-2.0

//! Statement interception
//!
//! Every call on a proxied statement goes through [`StatementCall`] and one
//! dispatcher shared by plain and prepared statements. Executing calls are
//! timed, recorded into an [`ExecutionContext`] and reported to listeners
//! before the driver outcome is returned.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use qore_core::{
    Cursor, DriverObject, DriverResult, KeyRequest, ParameterKey, PreparedStatement, Statement,
    Value,
};
use tracing::debug;

use super::context::{ExecutionContext, MethodContext};
use super::cursor::{CursorHandle, CursorKind, CursorOrigin};
use super::generated_keys::GeneratedKeysCache;
use super::pipeline::{log_failures, FailureCollector};
use super::recorder::{ParameterRecorder, ParameterSetOperationBatch, QueryInfo};
use super::types::{ConnectionInfo, Method, ObjectKind, StatementType};
use crate::config::ProxyConfig;
use crate::error::{CompletedCall, FrameworkError, ProxyError, ProxyResult};

/// Call made against a proxied statement
///
/// Plain statements carry SQL on executing calls; prepared and callable
/// statements carry none.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementCall {
    SetParameter { key: ParameterKey, value: Value },
    ClearParameters,
    AddBatch { sql: Option<String> },
    ClearBatch,
    Execute { sql: Option<String>, keys: KeyRequest },
    ExecuteQuery { sql: Option<String> },
    ExecuteUpdate { sql: Option<String>, keys: KeyRequest },
    ExecuteBatch,
    GetGeneratedKeys,
    GetResultCursor,
    Close,
    IsClosed,
}

impl StatementCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetParameter { .. } => "set_parameter",
            Self::ClearParameters => "clear_parameters",
            Self::AddBatch { .. } => "add_batch",
            Self::ClearBatch => "clear_batch",
            Self::Execute { .. } => "execute",
            Self::ExecuteQuery { .. } => "execute_query",
            Self::ExecuteUpdate { .. } => "execute_update",
            Self::ExecuteBatch => "execute_batch",
            Self::GetGeneratedKeys => "generated_keys",
            Self::GetResultCursor => "result_cursor",
            Self::Close => "close",
            Self::IsClosed => "is_closed",
        }
    }

    pub fn method(&self, statement_type: StatementType) -> Method {
        Method::new(ObjectKind::from(statement_type), self.name())
    }

    /// Whether the call runs SQL against the database
    pub fn is_executing(&self) -> bool {
        matches!(
            self,
            Self::Execute { .. } | Self::ExecuteQuery { .. } | Self::ExecuteUpdate { .. } | Self::ExecuteBatch
        )
    }

    fn hook_args(&self) -> Vec<Value> {
        match self {
            Self::SetParameter { key, value } => vec![key_value(key), value.clone()],
            Self::AddBatch { sql: Some(sql) }
            | Self::ExecuteQuery { sql: Some(sql) } => vec![Value::Text(sql.clone())],
            Self::Execute { sql: Some(sql), keys } | Self::ExecuteUpdate { sql: Some(sql), keys } => {
                let mut args = vec![Value::Text(sql.clone())];
                if keys.requests_keys() {
                    args.push(Value::Text(keys.to_string()));
                }
                args
            }
            _ => Vec::new(),
        }
    }
}

fn key_value(key: &ParameterKey) -> Value {
    match key {
        ParameterKey::Index(i) => Value::Int(*i as i64),
        ParameterKey::Name(n) => Value::Text(n.clone()),
    }
}

/// Outcome of a [`StatementCall`]
#[derive(Debug, Clone)]
pub enum CallResult {
    Unit,
    Bool(bool),
    UpdateCount(i64),
    BatchCounts(Vec<i64>),
    Cursor(CursorHandle),
    OptionalCursor(Option<CursorHandle>),
}

impl CallResult {
    pub fn into_unit(self, call: &'static str) -> ProxyResult<()> {
        match self {
            Self::Unit => Ok(()),
            _ => Err(FrameworkError::UnexpectedResult { call }.into()),
        }
    }

    pub fn into_bool(self, call: &'static str) -> ProxyResult<bool> {
        match self {
            Self::Bool(v) => Ok(v),
            _ => Err(FrameworkError::UnexpectedResult { call }.into()),
        }
    }

    pub fn into_update_count(self, call: &'static str) -> ProxyResult<i64> {
        match self {
            Self::UpdateCount(v) => Ok(v),
            _ => Err(FrameworkError::UnexpectedResult { call }.into()),
        }
    }

    pub fn into_batch_counts(self, call: &'static str) -> ProxyResult<Vec<i64>> {
        match self {
            Self::BatchCounts(v) => Ok(v),
            _ => Err(FrameworkError::UnexpectedResult { call }.into()),
        }
    }

    pub fn into_cursor(self, call: &'static str) -> ProxyResult<CursorHandle> {
        match self {
            Self::Cursor(c) => Ok(c),
            _ => Err(FrameworkError::UnexpectedResult { call }.into()),
        }
    }

    pub fn into_optional_cursor(self, call: &'static str) -> ProxyResult<Option<CursorHandle>> {
        match self {
            Self::OptionalCursor(c) => Ok(c),
            _ => Err(FrameworkError::UnexpectedResult { call }.into()),
        }
    }
}

// ==================== Delegates ====================

/// Raw driver answer before cursors are wrapped
pub(crate) enum DelegateReply {
    Unit,
    Bool(bool),
    UpdateCount(i64),
    BatchCounts(Vec<i64>),
    Cursor(Box<dyn Cursor>),
    OptionalCursor(Option<Box<dyn Cursor>>),
}

/// Uniform view of the statement shapes the dispatcher can drive
pub(crate) trait StatementDelegate: DriverObject {
    /// Whether bind parameters belong to the statement (prepared/callable)
    fn is_parameterized(&self) -> bool;

    fn supports(&self, call: &StatementCall) -> bool;

    fn apply(&mut self, call: &StatementCall) -> Option<DriverResult<DelegateReply>>;
}

impl StatementDelegate for dyn Statement {
    fn is_parameterized(&self) -> bool {
        false
    }

    fn supports(&self, call: &StatementCall) -> bool {
        use StatementCall::*;
        match call {
            SetParameter { .. } | ClearParameters => false,
            AddBatch { sql } | ExecuteQuery { sql } => sql.is_some(),
            Execute { sql, .. } | ExecuteUpdate { sql, .. } => sql.is_some(),
            _ => true,
        }
    }

    fn apply(&mut self, call: &StatementCall) -> Option<DriverResult<DelegateReply>> {
        use StatementCall::*;
        let reply = match call {
            AddBatch { sql: Some(sql) } => self.add_batch(sql).map(|_| DelegateReply::Unit),
            ClearBatch => self.clear_batch().map(|_| DelegateReply::Unit),
            Execute { sql: Some(sql), keys } => self.execute(sql, keys).map(DelegateReply::Bool),
            ExecuteQuery { sql: Some(sql) } => self.execute_query(sql).map(DelegateReply::Cursor),
            ExecuteUpdate { sql: Some(sql), keys } => {
                self.execute_update(sql, keys).map(DelegateReply::UpdateCount)
            }
            ExecuteBatch => self.execute_batch().map(DelegateReply::BatchCounts),
            GetGeneratedKeys => self.generated_keys().map(DelegateReply::Cursor),
            GetResultCursor => self.result_cursor().map(DelegateReply::OptionalCursor),
            Close => Statement::close(self).map(|_| DelegateReply::Unit),
            IsClosed => Ok(DelegateReply::Bool(Statement::is_closed(self))),
            _ => return None,
        };
        Some(reply)
    }
}

impl StatementDelegate for dyn PreparedStatement {
    fn is_parameterized(&self) -> bool {
        true
    }

    fn supports(&self, call: &StatementCall) -> bool {
        use StatementCall::*;
        match call {
            AddBatch { sql } | ExecuteQuery { sql } => sql.is_none(),
            Execute { sql, keys } | ExecuteUpdate { sql, keys } => {
                sql.is_none() && !keys.requests_keys()
            }
            _ => true,
        }
    }

    fn apply(&mut self, call: &StatementCall) -> Option<DriverResult<DelegateReply>> {
        use StatementCall::*;
        let reply = match call {
            SetParameter { key, value } => self.set_parameter(key, value).map(|_| DelegateReply::Unit),
            ClearParameters => self.clear_parameters().map(|_| DelegateReply::Unit),
            AddBatch { sql: None } => self.add_batch().map(|_| DelegateReply::Unit),
            ClearBatch => self.clear_batch().map(|_| DelegateReply::Unit),
            Execute { sql: None, .. } => self.execute().map(DelegateReply::Bool),
            ExecuteQuery { sql: None } => self.execute_query().map(DelegateReply::Cursor),
            ExecuteUpdate { sql: None, .. } => self.execute_update().map(DelegateReply::UpdateCount),
            ExecuteBatch => self.execute_batch().map(DelegateReply::BatchCounts),
            GetGeneratedKeys => self.generated_keys().map(DelegateReply::Cursor),
            GetResultCursor => self.result_cursor().map(DelegateReply::OptionalCursor),
            Close => PreparedStatement::close(self).map(|_| DelegateReply::Unit),
            IsClosed => Ok(DelegateReply::Bool(PreparedStatement::is_closed(self))),
            _ => return None,
        };
        Some(reply)
    }
}

// ==================== Dispatcher ====================

/// Per-statement interception state
pub(crate) struct StatementInterceptor<T: ?Sized + StatementDelegate> {
    target: Box<T>,
    statement_type: StatementType,
    /// SQL of a prepared/callable statement
    query: String,
    /// Whether the statement was created with a key request
    generate_keys: bool,
    connection: Arc<ConnectionInfo>,
    config: Arc<ProxyConfig>,
    recorder: ParameterRecorder,
    batch_queries: Vec<String>,
    keys: GeneratedKeysCache,
}

impl<T: ?Sized + StatementDelegate> StatementInterceptor<T> {
    fn new(
        target: Box<T>,
        statement_type: StatementType,
        query: String,
        generate_keys: bool,
        connection: Arc<ConnectionInfo>,
        config: Arc<ProxyConfig>,
    ) -> Self {
        Self {
            target,
            statement_type,
            query,
            generate_keys,
            connection,
            config,
            recorder: ParameterRecorder::new(),
            batch_queries: Vec::new(),
            keys: GeneratedKeysCache::new(),
        }
    }

    fn invoke(&mut self, call: StatementCall) -> ProxyResult<CallResult> {
        if !self.target.supports(&call) {
            return Err(self.unsupported(&call).into());
        }

        let method = call.method(self.statement_type);
        debug!(
            method = %method,
            connection_id = self.connection.connection_id(),
            "Intercepted statement call"
        );

        if call.is_executing() {
            self.execute(call, method)
        } else {
            self.passthrough(call, method)
        }
    }

    fn unsupported(&self, call: &StatementCall) -> FrameworkError {
        FrameworkError::UnsupportedCall {
            call: call.name(),
            target: self.target.type_name(),
        }
    }

    fn method_context(&self, method: Method, args: Vec<Value>) -> MethodContext {
        MethodContext::new(method, self.target.type_name(), self.target.describe())
            .with_args(args)
            .with_connection(Some(Arc::clone(&self.connection)))
    }

    fn delegate(&mut self, call: &StatementCall) -> ProxyResult<DriverResult<DelegateReply>> {
        match self.target.apply(call) {
            Some(reply) => Ok(reply),
            None => Err(self.unsupported(call).into()),
        }
    }

    /// Non-executing calls: record, forward, fire method hooks
    fn passthrough(&mut self, call: StatementCall, method: Method) -> ProxyResult<CallResult> {
        let mut method_ctx = self.method_context(method, call.hook_args());
        let mut failures = FailureCollector::default();
        failures.absorb(self.config.listeners.before_method(&method_ctx));

        match &call {
            StatementCall::SetParameter { key, value } => {
                self.recorder.record(key.clone(), "set_parameter", value.clone());
            }
            StatementCall::ClearParameters => self.recorder.clear_current_batch(),
            StatementCall::AddBatch { sql: Some(sql) } => self.batch_queries.push(sql.clone()),
            StatementCall::AddBatch { sql: None } => self.recorder.start_new_batch(),
            StatementCall::ClearBatch => {
                self.batch_queries.clear();
                self.recorder.clear_all_batches();
            }
            _ => {}
        }

        let start = Instant::now();
        let outcome = match &call {
            StatementCall::GetGeneratedKeys => self.generated_keys(),
            _ => match self.delegate(&call) {
                Ok(Ok(reply)) => self.adopt(reply),
                Ok(Err(e)) => Err(ProxyError::Driver(e)),
                Err(e) => Err(e),
            },
        };
        method_ctx.complete(
            start.elapsed(),
            outcome.as_ref().err().and_then(ProxyError::driver_error),
        );
        failures.absorb(self.config.listeners.after_method(&method_ctx));

        self.finish(outcome, failures)
    }

    /// Executing calls: time the delegate, build the context, notify listeners
    fn execute(&mut self, call: StatementCall, method: Method) -> ProxyResult<CallResult> {
        let method_args = self.method_args(&call);
        let mut method_ctx = self.method_context(method, call.hook_args());
        let mut failures = FailureCollector::default();
        failures.absorb(self.config.listeners.before_method(&method_ctx));

        let is_batch = call == StatementCall::ExecuteBatch;
        let queries = self.queries_for(&call);
        let batch_size = if is_batch { self.batch_size() } else { 0 };
        let key_generating = self.is_key_generating(&call);
        // keys of an earlier execution never describe this one
        self.keys.invalidate();

        let started_at = Utc::now();
        let start = Instant::now();
        let raw = self.delegate(&call);
        let elapsed = start.elapsed();

        // outer error: framework failure, inner: what the driver answered
        let mut outcome = match raw {
            Ok(Ok(reply)) => self.adopt(reply).map(Ok),
            Ok(Err(e)) => Ok(Err(e)),
            Err(e) => Err(e),
        };

        let mut generated_keys = None;
        let mut key_failure = None;
        if matches!(outcome, Ok(Ok(_))) && key_generating && self.config.generated_keys.auto_retrieve {
            match self.acquire_generated_keys() {
                Ok(handle) => generated_keys = Some(handle),
                Err(ProxyError::Driver(e)) => key_failure = Some(e),
                Err(other) => outcome = Err(other),
            }
        }

        // framework failures have no query outcome to report
        if let Ok(reported) = &outcome {
            let (result, failure) = match reported {
                Ok(result) => (Some(result.clone()), None),
                Err(e) => (None, Some(e.clone())),
            };
            let ctx = ExecutionContext::builder()
                .data_source_name(self.config.data_source_name.as_str())
                .method(method)
                .method_args(method_args)
                .result(result)
                .elapsed(elapsed)
                .failure(failure)
                .statement_type(self.statement_type)
                .batch(is_batch, batch_size)
                .connection_id(self.connection.connection_id())
                .queries(queries)
                .generated_keys(generated_keys)
                .started_at(started_at)
                .build();
            failures.absorb(self.config.listeners.after_query(&ctx));
        }

        if self.config.generated_keys.auto_close {
            self.keys.close_cached();
        }
        if is_batch {
            // executing a batch empties it, whatever the outcome
            self.recorder.finish_batch_execution();
            self.batch_queries.clear();
        }

        let driver_failure = match &outcome {
            Ok(Err(e)) => Some(e),
            _ => None,
        };
        method_ctx.complete(elapsed, driver_failure);
        failures.absorb(self.config.listeners.after_method(&method_ctx));

        let outcome = match (outcome, key_failure) {
            (Err(e), _) => Err(e),
            (Ok(Err(e)), _) | (Ok(Ok(_)), Some(e)) => Err(ProxyError::Driver(e)),
            (Ok(Ok(result)), None) => Ok(result),
        };
        self.finish(outcome, failures)
    }

    /// Applies the listener failure policy; a call failure takes precedence
    ///
    /// Under [`ListenerFailurePolicy::Propagate`](super::ListenerFailurePolicy::Propagate)
    /// the successful result rides along in the listener error.
    fn finish(
        &self,
        outcome: ProxyResult<CallResult>,
        failures: FailureCollector,
    ) -> ProxyResult<CallResult> {
        let failures = failures.into_failures();
        match outcome {
            Ok(result) => match self.config.failure_policy.resolve(failures) {
                Ok(()) => Ok(result),
                Err(errors) => Err(errors.with_completed(CompletedCall::Statement(result)).into()),
            },
            Err(e) => {
                log_failures(&failures);
                Err(e)
            }
        }
    }

    /// Wraps cursors contained in a driver reply
    fn adopt(&self, reply: DelegateReply) -> ProxyResult<CallResult> {
        Ok(match reply {
            DelegateReply::Unit => CallResult::Unit,
            DelegateReply::Bool(v) => CallResult::Bool(v),
            DelegateReply::UpdateCount(v) => CallResult::UpdateCount(v),
            DelegateReply::BatchCounts(v) => CallResult::BatchCounts(v),
            DelegateReply::Cursor(c) => CallResult::Cursor(self.wrap_cursor(c, CursorKind::ResultSet)?),
            DelegateReply::OptionalCursor(c) => CallResult::OptionalCursor(
                c.map(|c| self.wrap_cursor(c, CursorKind::ResultSet))
                    .transpose()?,
            ),
        })
    }

    fn wrap_cursor(&self, cursor: Box<dyn Cursor>, kind: CursorKind) -> ProxyResult<CursorHandle> {
        let factory = match kind {
            CursorKind::ResultSet => self.config.result_cursor_factory.as_ref(),
            CursorKind::GeneratedKeys => self.config.generated_keys.factory.as_ref(),
        };
        let cursor = match factory {
            Some(factory) => {
                let origin = CursorOrigin {
                    kind,
                    statement_type: self.statement_type,
                    connection: Arc::clone(&self.connection),
                };
                factory.wrap(cursor, &origin)?
            }
            None => cursor,
        };
        Ok(CursorHandle::new(cursor))
    }

    /// Fetches the keys cursor from the driver and caches it
    fn acquire_generated_keys(&mut self) -> ProxyResult<CursorHandle> {
        let raw = match self.delegate(&StatementCall::GetGeneratedKeys)? {
            Ok(DelegateReply::Cursor(cursor)) => cursor,
            Ok(_) => {
                return Err(FrameworkError::UnexpectedResult {
                    call: "generated_keys",
                }
                .into())
            }
            Err(e) => return Err(e.into()),
        };
        let handle = self.wrap_cursor(raw, CursorKind::GeneratedKeys)?;
        self.keys.store(handle.clone());
        Ok(handle)
    }

    /// Generated-keys accessor
    fn generated_keys(&mut self) -> ProxyResult<CallResult> {
        if !self.config.generated_keys.auto_retrieve {
            let raw = match self.delegate(&StatementCall::GetGeneratedKeys)? {
                Ok(DelegateReply::Cursor(cursor)) => cursor,
                Ok(_) => {
                    return Err(FrameworkError::UnexpectedResult {
                        call: "generated_keys",
                    }
                    .into())
                }
                Err(e) => return Err(e.into()),
            };
            return Ok(CallResult::Cursor(self.wrap_cursor(raw, CursorKind::GeneratedKeys)?));
        }

        if let Some(cached) = self.keys.reusable() {
            return Ok(CallResult::Cursor(cached));
        }
        self.keys.invalidate();
        self.acquire_generated_keys().map(CallResult::Cursor)
    }

    fn is_key_generating(&self, call: &StatementCall) -> bool {
        let settings = &self.config.generated_keys;
        match call {
            StatementCall::ExecuteQuery { .. } => false,
            StatementCall::Execute { keys, .. } | StatementCall::ExecuteUpdate { keys, .. } => {
                if self.target.is_parameterized() {
                    self.generate_keys
                } else {
                    keys.requests_keys()
                }
            }
            StatementCall::ExecuteBatch => {
                if self.target.is_parameterized() {
                    self.generate_keys && settings.retrieve_for_batch_prepared_or_callable
                } else {
                    settings.retrieve_for_batch_statement
                }
            }
            _ => false,
        }
    }

    /// Arguments reported in the execution context
    fn method_args(&self, call: &StatementCall) -> Option<Vec<Value>> {
        if self.target.is_parameterized() {
            None
        } else {
            Some(call.hook_args())
        }
    }

    fn queries_for(&self, call: &StatementCall) -> Vec<QueryInfo> {
        let sql = match call {
            StatementCall::ExecuteBatch if self.target.is_parameterized() => {
                return vec![QueryInfo::new(
                    self.query.as_str(),
                    self.recorder.batches().to_vec(),
                )];
            }
            StatementCall::ExecuteBatch => {
                return self
                    .batch_queries
                    .iter()
                    .map(|q| QueryInfo::new(q.as_str(), Vec::new()))
                    .collect();
            }
            StatementCall::Execute { sql, .. }
            | StatementCall::ExecuteQuery { sql }
            | StatementCall::ExecuteUpdate { sql, .. } => sql.as_deref(),
            _ => return Vec::new(),
        };

        match sql {
            Some(sql) => vec![QueryInfo::new(sql, vec![ParameterSetOperationBatch::default()])],
            None => vec![QueryInfo::new(
                self.query.as_str(),
                vec![self.recorder.current_batch().clone()],
            )],
        }
    }

    fn batch_size(&self) -> usize {
        if self.target.is_parameterized() {
            self.recorder.batches().len()
        } else {
            self.batch_queries.len()
        }
    }

    fn delegate_addr(&self) -> usize {
        self.target.as_any() as *const dyn Any as *const () as usize
    }

    fn display(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.target.type_name(), self.target.describe())
    }
}

// ==================== Facades ====================

/// Proxied plain statement
pub struct ProxyStatement {
    inner: StatementInterceptor<dyn Statement>,
}

impl ProxyStatement {
    pub fn wrap(
        target: Box<dyn Statement>,
        connection: Arc<ConnectionInfo>,
        config: Arc<ProxyConfig>,
    ) -> Self {
        Self {
            inner: StatementInterceptor::new(
                target,
                StatementType::Statement,
                String::new(),
                false,
                connection,
                config,
            ),
        }
    }

    pub fn invoke(&mut self, call: StatementCall) -> ProxyResult<CallResult> {
        self.inner.invoke(call)
    }

    pub fn execute(&mut self, sql: &str, keys: KeyRequest) -> ProxyResult<bool> {
        self.invoke(StatementCall::Execute {
            sql: Some(sql.to_string()),
            keys,
        })?
        .into_bool("execute")
    }

    pub fn execute_query(&mut self, sql: &str) -> ProxyResult<CursorHandle> {
        self.invoke(StatementCall::ExecuteQuery {
            sql: Some(sql.to_string()),
        })?
        .into_cursor("execute_query")
    }

    pub fn execute_update(&mut self, sql: &str, keys: KeyRequest) -> ProxyResult<i64> {
        self.invoke(StatementCall::ExecuteUpdate {
            sql: Some(sql.to_string()),
            keys,
        })?
        .into_update_count("execute_update")
    }

    pub fn add_batch(&mut self, sql: &str) -> ProxyResult<()> {
        self.invoke(StatementCall::AddBatch {
            sql: Some(sql.to_string()),
        })?
        .into_unit("add_batch")
    }

    pub fn clear_batch(&mut self) -> ProxyResult<()> {
        self.invoke(StatementCall::ClearBatch)?.into_unit("clear_batch")
    }

    pub fn execute_batch(&mut self) -> ProxyResult<Vec<i64>> {
        self.invoke(StatementCall::ExecuteBatch)?
            .into_batch_counts("execute_batch")
    }

    pub fn generated_keys(&mut self) -> ProxyResult<CursorHandle> {
        self.invoke(StatementCall::GetGeneratedKeys)?
            .into_cursor("generated_keys")
    }

    pub fn result_cursor(&mut self) -> ProxyResult<Option<CursorHandle>> {
        self.invoke(StatementCall::GetResultCursor)?
            .into_optional_cursor("result_cursor")
    }

    pub fn close(&mut self) -> ProxyResult<()> {
        self.invoke(StatementCall::Close)?.into_unit("close")
    }

    pub fn is_closed(&mut self) -> ProxyResult<bool> {
        self.invoke(StatementCall::IsClosed)?.into_bool("is_closed")
    }

    /// The wrapped driver statement
    pub fn target(&self) -> &dyn Statement {
        self.inner.target.as_ref()
    }

    pub fn downcast_target<S: Any>(&self) -> Option<&S> {
        self.inner.target.as_any().downcast_ref::<S>()
    }

    pub fn is_wrapper_for(&self, type_name: &str) -> bool {
        type_name == "ProxyStatement" || self.inner.target.is_wrapper_for(type_name)
    }

    pub fn connection_info(&self) -> &Arc<ConnectionInfo> {
        &self.inner.connection
    }
}

impl PartialEq for ProxyStatement {
    fn eq(&self, other: &Self) -> bool {
        self.inner.delegate_addr() == other.inner.delegate_addr()
    }
}

impl Eq for ProxyStatement {}

impl Hash for ProxyStatement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.delegate_addr().hash(state);
    }
}

impl fmt::Display for ProxyStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.display(f)
    }
}

impl fmt::Debug for ProxyStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyStatement({})", self)
    }
}

/// Proxied prepared or callable statement
pub struct ProxyPreparedStatement {
    inner: StatementInterceptor<dyn PreparedStatement>,
}

impl ProxyPreparedStatement {
    pub fn builder() -> ProxyPreparedStatementBuilder {
        ProxyPreparedStatementBuilder::default()
    }

    pub fn invoke(&mut self, call: StatementCall) -> ProxyResult<CallResult> {
        self.inner.invoke(call)
    }

    pub fn set_parameter(
        &mut self,
        key: impl Into<ParameterKey>,
        value: impl Into<Value>,
    ) -> ProxyResult<()> {
        self.invoke(StatementCall::SetParameter {
            key: key.into(),
            value: value.into(),
        })?
        .into_unit("set_parameter")
    }

    pub fn clear_parameters(&mut self) -> ProxyResult<()> {
        self.invoke(StatementCall::ClearParameters)?
            .into_unit("clear_parameters")
    }

    pub fn add_batch(&mut self) -> ProxyResult<()> {
        self.invoke(StatementCall::AddBatch { sql: None })?
            .into_unit("add_batch")
    }

    pub fn clear_batch(&mut self) -> ProxyResult<()> {
        self.invoke(StatementCall::ClearBatch)?.into_unit("clear_batch")
    }

    pub fn execute(&mut self) -> ProxyResult<bool> {
        self.invoke(StatementCall::Execute {
            sql: None,
            keys: KeyRequest::None,
        })?
        .into_bool("execute")
    }

    pub fn execute_query(&mut self) -> ProxyResult<CursorHandle> {
        self.invoke(StatementCall::ExecuteQuery { sql: None })?
            .into_cursor("execute_query")
    }

    pub fn execute_update(&mut self) -> ProxyResult<i64> {
        self.invoke(StatementCall::ExecuteUpdate {
            sql: None,
            keys: KeyRequest::None,
        })?
        .into_update_count("execute_update")
    }

    pub fn execute_batch(&mut self) -> ProxyResult<Vec<i64>> {
        self.invoke(StatementCall::ExecuteBatch)?
            .into_batch_counts("execute_batch")
    }

    pub fn generated_keys(&mut self) -> ProxyResult<CursorHandle> {
        self.invoke(StatementCall::GetGeneratedKeys)?
            .into_cursor("generated_keys")
    }

    pub fn result_cursor(&mut self) -> ProxyResult<Option<CursorHandle>> {
        self.invoke(StatementCall::GetResultCursor)?
            .into_optional_cursor("result_cursor")
    }

    pub fn close(&mut self) -> ProxyResult<()> {
        self.invoke(StatementCall::Close)?.into_unit("close")
    }

    pub fn is_closed(&mut self) -> ProxyResult<bool> {
        self.invoke(StatementCall::IsClosed)?.into_bool("is_closed")
    }

    pub fn statement_type(&self) -> StatementType {
        self.inner.statement_type
    }

    pub fn query(&self) -> &str {
        &self.inner.query
    }

    /// Bindings recorded since the last add-to-batch or clear
    pub fn current_parameters(&self) -> &ParameterSetOperationBatch {
        self.inner.recorder.current_batch()
    }

    /// Batches queued since the last batch execution or clear
    pub fn pending_batches(&self) -> &[ParameterSetOperationBatch] {
        self.inner.recorder.batches()
    }

    /// The wrapped driver statement
    pub fn target(&self) -> &dyn PreparedStatement {
        self.inner.target.as_ref()
    }

    pub fn downcast_target<S: Any>(&self) -> Option<&S> {
        self.inner.target.as_any().downcast_ref::<S>()
    }

    pub fn is_wrapper_for(&self, type_name: &str) -> bool {
        type_name == "ProxyPreparedStatement" || self.inner.target.is_wrapper_for(type_name)
    }

    pub fn connection_info(&self) -> &Arc<ConnectionInfo> {
        &self.inner.connection
    }
}

impl PartialEq for ProxyPreparedStatement {
    fn eq(&self, other: &Self) -> bool {
        self.inner.delegate_addr() == other.inner.delegate_addr()
    }
}

impl Eq for ProxyPreparedStatement {}

impl Hash for ProxyPreparedStatement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.delegate_addr().hash(state);
    }
}

impl fmt::Display for ProxyPreparedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.display(f)
    }
}

impl fmt::Debug for ProxyPreparedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyPreparedStatement({})", self)
    }
}

/// Assembles a [`ProxyPreparedStatement`]
#[derive(Default)]
pub struct ProxyPreparedStatementBuilder {
    target: Option<Box<dyn PreparedStatement>>,
    statement_type: Option<StatementType>,
    query: Option<String>,
    generate_keys: bool,
    connection: Option<Arc<ConnectionInfo>>,
    config: Option<Arc<ProxyConfig>>,
}

impl ProxyPreparedStatementBuilder {
    pub fn target(mut self, target: Box<dyn PreparedStatement>) -> Self {
        self.target = Some(target);
        self
    }

    /// `Prepared` unless set; `Statement` is not a parameterized shape
    pub fn statement_type(mut self, statement_type: StatementType) -> Self {
        self.statement_type = Some(statement_type);
        self
    }

    pub fn query(mut self, sql: impl Into<String>) -> Self {
        self.query = Some(sql.into());
        self
    }

    pub fn key_request(mut self, keys: &KeyRequest) -> Self {
        self.generate_keys = keys.requests_keys();
        self
    }

    pub fn connection(mut self, connection: Arc<ConnectionInfo>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn config(mut self, config: Arc<ProxyConfig>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<ProxyPreparedStatement, FrameworkError> {
        let target = self
            .target
            .ok_or(FrameworkError::MissingConfiguration("target statement"))?;
        let query = self
            .query
            .ok_or(FrameworkError::MissingConfiguration("query"))?;
        let connection = self
            .connection
            .ok_or(FrameworkError::MissingConfiguration("connection info"))?;
        let config = self
            .config
            .ok_or(FrameworkError::MissingConfiguration("proxy config"))?;
        let statement_type = match self.statement_type.unwrap_or(StatementType::Prepared) {
            StatementType::Statement => {
                return Err(FrameworkError::UnsupportedCall {
                    call: "prepare_statement",
                    target: "plain statement type",
                })
            }
            other => other,
        };

        Ok(ProxyPreparedStatement {
            inner: StatementInterceptor::new(
                target,
                statement_type,
                query,
                self.generate_keys,
                connection,
                config,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qore_core::mock::{MockPreparedStatement, MockState, MockStatement};

    fn config() -> Arc<ProxyConfig> {
        Arc::new(ProxyConfig::builder().data_source_name("ds").build())
    }

    fn connection() -> Arc<ConnectionInfo> {
        Arc::new(ConnectionInfo::new("ds", "1"))
    }

    #[test]
    fn test_builder_reports_missing_configuration() {
        let state = MockState::new();
        let err = ProxyPreparedStatement::builder()
            .target(Box::new(MockPreparedStatement::new(state, "select 1", KeyRequest::None)))
            .query("select 1")
            .config(config())
            .build()
            .unwrap_err();
        assert_eq!(err, FrameworkError::MissingConfiguration("connection info"));
    }

    #[test]
    fn test_plain_statement_rejects_binding() {
        let state = MockState::new();
        let mut stmt = ProxyStatement::wrap(Box::new(MockStatement::new(Arc::clone(&state))), connection(), config());

        let err = stmt
            .invoke(StatementCall::SetParameter {
                key: ParameterKey::Index(1),
                value: Value::Int(1),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Framework(FrameworkError::UnsupportedCall { call: "set_parameter", .. })
        ));
        assert!(state.journal().is_empty());
    }

    #[test]
    fn test_prepared_statement_rejects_sql_text() {
        let state = MockState::new();
        let mut stmt = ProxyPreparedStatement::builder()
            .target(Box::new(MockPreparedStatement::new(Arc::clone(&state), "select 1", KeyRequest::None)))
            .query("select 1")
            .connection(connection())
            .config(config())
            .build()
            .unwrap();

        let err = stmt
            .invoke(StatementCall::ExecuteQuery {
                sql: Some("select 2".to_string()),
            })
            .unwrap_err();
        assert!(matches!(err, ProxyError::Framework(_)));
        assert!(state.journal().is_empty());
    }

    #[test]
    fn test_identity_uses_delegate() {
        let state = MockState::new();
        let stmt = ProxyStatement::wrap(Box::new(MockStatement::new(state)), connection(), config());

        assert_eq!(stmt.to_string(), "MockStatement [MockStatement]");
        assert!(stmt.is_wrapper_for("ProxyStatement"));
        assert!(stmt.is_wrapper_for("MockStatement"));
        assert!(!stmt.is_wrapper_for("PgStatement"));
        assert!(stmt.downcast_target::<MockStatement>().is_some());
        assert_eq!(stmt, stmt);
    }

    #[test]
    fn test_call_result_shape_mismatch_is_framework_error() {
        let err = CallResult::Unit.into_bool("execute").unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Framework(FrameworkError::UnexpectedResult { call: "execute" })
        ));
    }

    #[test]
    fn test_statement_type_cannot_be_plain() {
        let state = MockState::new();
        let err = ProxyPreparedStatement::builder()
            .target(Box::new(MockPreparedStatement::new(state, "x", KeyRequest::None)))
            .statement_type(StatementType::Statement)
            .query("x")
            .connection(connection())
            .config(config())
            .build()
            .unwrap_err();
        assert!(matches!(err, FrameworkError::UnsupportedCall { .. }));
    }
}
