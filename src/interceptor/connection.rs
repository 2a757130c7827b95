// SPDX-License-Identifier: Apache-2.0

//! Data source and connection proxies
//!
//! A proxied data source hands out proxied connections, which in turn hand
//! out proxied statements. Each connection gets an identifier from the
//! configured [`ConnectionIdManager`] when it is wrapped.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use qore_core::{Connection, DataSource, KeyRequest, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::context::MethodContext;
use super::pipeline::{log_failures, FailureCollector};
use super::statement::{ProxyPreparedStatement, ProxyStatement};
use super::types::{ConnectionInfo, Method, ObjectKind, StatementType};
use crate::config::ProxyConfig;
use crate::error::{CompletedCall, FrameworkError, ProxyError, ProxyResult};

/// Source of connection identifiers
pub trait ConnectionIdManager: Send + Sync {
    /// A new identifier, never handed out before in this process
    fn next_id(&self) -> String;
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide increasing counter ("1", "2", ...)
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalConnectionIds;

impl ConnectionIdManager for GlobalConnectionIds {
    fn next_id(&self) -> String {
        NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

/// Random v4 UUIDs
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidConnectionIds;

impl ConnectionIdManager for UuidConnectionIds {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

// ==================== Data source ====================

/// Proxied data source
pub struct ProxyDataSource {
    target: Box<dyn DataSource>,
    config: Arc<ProxyConfig>,
}

impl ProxyDataSource {
    pub fn new(target: Box<dyn DataSource>, config: Arc<ProxyConfig>) -> Self {
        info!(
            data_source = %config.data_source_name,
            target = target.type_name(),
            "Proxy data source created"
        );
        Self { target, config }
    }

    pub fn config(&self) -> &Arc<ProxyConfig> {
        &self.config
    }

    /// Opens a connection on the driver and wraps it
    pub fn get_connection(&self) -> ProxyResult<ProxyConnection> {
        let mut ctx = MethodContext::new(
            Method::new(ObjectKind::DataSource, "get_connection"),
            self.target.type_name(),
            self.target.describe(),
        );
        let mut failures = FailureCollector::default();
        failures.absorb(self.config.listeners.before_method(&ctx));

        let start = Instant::now();
        let outcome = self.target.get_connection();

        let outcome = outcome.map(|connection| {
            let id = self.config.connection_ids.next_id();
            let info = Arc::new(ConnectionInfo::new(self.config.data_source_name.as_str(), id));
            debug!(
                data_source = info.data_source_name(),
                connection_id = info.connection_id(),
                "Connection acquired"
            );
            ProxyConnection::wrap(connection, info, Arc::clone(&self.config))
        });
        ctx.connection = outcome.as_ref().ok().map(|c| Arc::clone(&c.info));
        ctx.complete(start.elapsed(), outcome.as_ref().err());
        failures.absorb(self.config.listeners.after_method(&ctx));

        match outcome {
            Ok(connection) => match self.config.failure_policy.resolve(failures.into_failures()) {
                Ok(()) => Ok(connection),
                Err(errors) => Err(errors.with_completed(CompletedCall::DataSource(connection)).into()),
            },
            Err(e) => {
                log_failures(&failures.into_failures());
                Err(ProxyError::Driver(e))
            }
        }
    }

    pub fn target(&self) -> &dyn DataSource {
        self.target.as_ref()
    }

    pub fn downcast_target<S: Any>(&self) -> Option<&S> {
        self.target.as_any().downcast_ref::<S>()
    }

    pub fn is_wrapper_for(&self, type_name: &str) -> bool {
        type_name == "ProxyDataSource" || self.target.is_wrapper_for(type_name)
    }
}

impl fmt::Display for ProxyDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.target.type_name(), self.target.describe())
    }
}

impl fmt::Debug for ProxyDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyDataSource({})", self)
    }
}

// ==================== Connection ====================

/// Call made against a proxied connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionCall {
    CreateStatement,
    PrepareStatement { sql: String, keys: KeyRequest },
    PrepareCall { sql: String },
    Commit,
    Rollback,
    Close,
    IsClosed,
}

impl ConnectionCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateStatement => "create_statement",
            Self::PrepareStatement { .. } => "prepare_statement",
            Self::PrepareCall { .. } => "prepare_call",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::Close => "close",
            Self::IsClosed => "is_closed",
        }
    }

    pub fn method(&self) -> Method {
        Method::new(ObjectKind::Connection, self.name())
    }

    fn hook_args(&self) -> Vec<Value> {
        match self {
            Self::PrepareStatement { sql, keys } => {
                let mut args = vec![Value::Text(sql.clone())];
                if keys.requests_keys() {
                    args.push(Value::Text(keys.to_string()));
                }
                args
            }
            Self::PrepareCall { sql } => vec![Value::Text(sql.clone())],
            _ => Vec::new(),
        }
    }
}

/// Outcome of a [`ConnectionCall`]
#[derive(Debug)]
pub enum ConnectionReply {
    Unit,
    Bool(bool),
    Statement(ProxyStatement),
    Prepared(ProxyPreparedStatement),
}

impl ConnectionReply {
    fn unexpected(call: &'static str) -> ProxyError {
        FrameworkError::UnexpectedResult { call }.into()
    }

    pub fn into_unit(self, call: &'static str) -> ProxyResult<()> {
        match self {
            Self::Unit => Ok(()),
            _ => Err(Self::unexpected(call)),
        }
    }

    pub fn into_bool(self, call: &'static str) -> ProxyResult<bool> {
        match self {
            Self::Bool(v) => Ok(v),
            _ => Err(Self::unexpected(call)),
        }
    }

    pub fn into_statement(self, call: &'static str) -> ProxyResult<ProxyStatement> {
        match self {
            Self::Statement(s) => Ok(s),
            _ => Err(Self::unexpected(call)),
        }
    }

    pub fn into_prepared(self, call: &'static str) -> ProxyResult<ProxyPreparedStatement> {
        match self {
            Self::Prepared(s) => Ok(s),
            _ => Err(Self::unexpected(call)),
        }
    }
}

/// Proxied connection
pub struct ProxyConnection {
    target: Box<dyn Connection>,
    info: Arc<ConnectionInfo>,
    config: Arc<ProxyConfig>,
}

impl ProxyConnection {
    pub fn wrap(
        target: Box<dyn Connection>,
        info: Arc<ConnectionInfo>,
        config: Arc<ProxyConfig>,
    ) -> Self {
        Self {
            target,
            info,
            config,
        }
    }

    pub fn info(&self) -> &Arc<ConnectionInfo> {
        &self.info
    }

    pub fn invoke(&mut self, call: ConnectionCall) -> ProxyResult<ConnectionReply> {
        let method = call.method();
        debug!(
            method = %method,
            connection_id = self.info.connection_id(),
            "Intercepted connection call"
        );

        let mut ctx = MethodContext::new(method, self.target.type_name(), self.target.describe())
            .with_args(call.hook_args())
            .with_connection(Some(Arc::clone(&self.info)));
        let mut failures = FailureCollector::default();
        failures.absorb(self.config.listeners.before_method(&ctx));

        let start = Instant::now();
        let outcome = self.dispatch(call);
        ctx.complete(
            start.elapsed(),
            outcome.as_ref().err().and_then(ProxyError::driver_error),
        );
        failures.absorb(self.config.listeners.after_method(&ctx));

        match outcome {
            Ok(reply) => match self.config.failure_policy.resolve(failures.into_failures()) {
                Ok(()) => Ok(reply),
                Err(errors) => Err(errors.with_completed(CompletedCall::Connection(reply)).into()),
            },
            Err(e) => {
                log_failures(&failures.into_failures());
                Err(e)
            }
        }
    }

    fn dispatch(&mut self, call: ConnectionCall) -> ProxyResult<ConnectionReply> {
        match call {
            ConnectionCall::CreateStatement => {
                let statement = self.target.create_statement()?;
                Ok(ConnectionReply::Statement(ProxyStatement::wrap(
                    statement,
                    Arc::clone(&self.info),
                    Arc::clone(&self.config),
                )))
            }
            ConnectionCall::PrepareStatement { sql, keys } => {
                let statement = self.target.prepare_statement(&sql, &keys)?;
                let proxy = ProxyPreparedStatement::builder()
                    .target(statement)
                    .statement_type(StatementType::Prepared)
                    .query(sql)
                    .key_request(&keys)
                    .connection(Arc::clone(&self.info))
                    .config(Arc::clone(&self.config))
                    .build()?;
                Ok(ConnectionReply::Prepared(proxy))
            }
            ConnectionCall::PrepareCall { sql } => {
                let statement = self.target.prepare_call(&sql)?;
                let proxy = ProxyPreparedStatement::builder()
                    .target(statement)
                    .statement_type(StatementType::Callable)
                    .query(sql)
                    .connection(Arc::clone(&self.info))
                    .config(Arc::clone(&self.config))
                    .build()?;
                Ok(ConnectionReply::Prepared(proxy))
            }
            ConnectionCall::Commit => {
                self.target.commit()?;
                self.info.increment_commit();
                Ok(ConnectionReply::Unit)
            }
            ConnectionCall::Rollback => {
                self.target.rollback()?;
                self.info.increment_rollback();
                Ok(ConnectionReply::Unit)
            }
            ConnectionCall::Close => {
                self.target.close()?;
                self.info.mark_closed();
                debug!(connection_id = self.info.connection_id(), "Connection closed");
                Ok(ConnectionReply::Unit)
            }
            ConnectionCall::IsClosed => Ok(ConnectionReply::Bool(self.target.is_closed())),
        }
    }

    pub fn create_statement(&mut self) -> ProxyResult<ProxyStatement> {
        self.invoke(ConnectionCall::CreateStatement)?
            .into_statement("create_statement")
    }

    pub fn prepare_statement(
        &mut self,
        sql: &str,
        keys: KeyRequest,
    ) -> ProxyResult<ProxyPreparedStatement> {
        self.invoke(ConnectionCall::PrepareStatement {
            sql: sql.to_string(),
            keys,
        })?
        .into_prepared("prepare_statement")
    }

    pub fn prepare_call(&mut self, sql: &str) -> ProxyResult<ProxyPreparedStatement> {
        self.invoke(ConnectionCall::PrepareCall {
            sql: sql.to_string(),
        })?
        .into_prepared("prepare_call")
    }

    pub fn commit(&mut self) -> ProxyResult<()> {
        self.invoke(ConnectionCall::Commit)?.into_unit("commit")
    }

    pub fn rollback(&mut self) -> ProxyResult<()> {
        self.invoke(ConnectionCall::Rollback)?.into_unit("rollback")
    }

    pub fn close(&mut self) -> ProxyResult<()> {
        self.invoke(ConnectionCall::Close)?.into_unit("close")
    }

    pub fn is_closed(&mut self) -> ProxyResult<bool> {
        self.invoke(ConnectionCall::IsClosed)?.into_bool("is_closed")
    }

    pub fn target(&self) -> &dyn Connection {
        self.target.as_ref()
    }

    pub fn downcast_target<S: Any>(&self) -> Option<&S> {
        self.target.as_any().downcast_ref::<S>()
    }

    pub fn is_wrapper_for(&self, type_name: &str) -> bool {
        type_name == "ProxyConnection" || self.target.is_wrapper_for(type_name)
    }

    fn delegate_addr(&self) -> usize {
        self.target.as_any() as *const dyn Any as *const () as usize
    }
}

impl PartialEq for ProxyConnection {
    fn eq(&self, other: &Self) -> bool {
        self.delegate_addr() == other.delegate_addr()
    }
}

impl Eq for ProxyConnection {}

impl Hash for ProxyConnection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.delegate_addr().hash(state);
    }
}

impl fmt::Display for ProxyConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.target.type_name(), self.target.describe())
    }
}

impl fmt::Debug for ProxyConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyConnection(#{} {})", self.info.connection_id(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qore_core::mock::MockDataSource;
    use qore_core::DriverError;

    #[test]
    fn test_global_ids_increase() {
        let ids = GlobalConnectionIds;
        let first: u64 = ids.next_id().parse().unwrap();
        let second: u64 = ids.next_id().parse().unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_uuid_ids_are_unique() {
        let ids = UuidConnectionIds;
        let a = ids.next_id();
        assert_ne!(a, ids.next_id());
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_transaction_counters() {
        let ds = ProxyDataSource::new(
            Box::new(MockDataSource::new("orders")),
            Arc::new(ProxyConfig::builder().data_source_name("orders").build()),
        );
        let mut conn = ds.get_connection().unwrap();
        conn.commit().unwrap();
        conn.commit().unwrap();
        conn.rollback().unwrap();
        conn.close().unwrap();

        let info = conn.info();
        assert_eq!(info.commit_count(), 2);
        assert_eq!(info.rollback_count(), 1);
        assert!(info.is_closed());
        assert_eq!(info.data_source_name(), "orders");
        assert!(conn.is_closed().unwrap());
    }

    #[test]
    fn test_failed_commit_not_counted() {
        let mock = MockDataSource::new("orders");
        let state = mock.state();
        let ds = ProxyDataSource::new(Box::new(mock), Arc::new(ProxyConfig::default()));
        let mut conn = ds.get_connection().unwrap();

        state.fail_on("commit", DriverError::transaction_error("serialization failure"));
        let err = conn.commit().unwrap_err();
        assert_eq!(
            err.driver_error(),
            Some(&DriverError::transaction_error("serialization failure"))
        );
        assert_eq!(conn.info().commit_count(), 0);
    }

    #[test]
    fn test_identity_of_connection() {
        let ds = ProxyDataSource::new(
            Box::new(MockDataSource::new("orders")),
            Arc::new(ProxyConfig::default()),
        );
        let conn = ds.get_connection().unwrap();
        assert_eq!(conn.to_string(), "MockConnection [MockConnection]");
        assert!(conn.is_wrapper_for("MockConnection"));
        assert!(conn.is_wrapper_for("ProxyConnection"));
        assert_eq!(conn, conn);
        assert_eq!(ds.to_string(), "MockDataSource [mock://orders]");
        assert!(ds.downcast_target::<MockDataSource>().is_some());
    }
}
