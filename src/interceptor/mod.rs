//! Driver-Call Interceptor
//!
//! Wraps data sources, connections, statements and cursors of a driver and
//! reports every call to registered listeners:
//! - **Dispatch**: proxies forward each call unchanged and time executing calls
//! - **Recording**: bind parameters and batches are captured per statement
//! - **Generated keys**: a per-statement cache hands out a stable keys cursor
//! - **Query counts**: a reference listener aggregating per data source metrics

pub mod classifier;
pub mod connection;
pub mod context;
pub mod cursor;
pub mod generated_keys;
pub mod pipeline;
pub mod profiling;
pub mod recorder;
pub mod statement;
pub mod types;

pub use classifier::classify;
pub use connection::{
    ConnectionCall, ConnectionIdManager, ConnectionReply, GlobalConnectionIds, ProxyConnection,
    ProxyDataSource, UuidConnectionIds,
};
pub use context::{ExecutionContext, ExecutionContextBuilder, MethodContext};
pub use cursor::{
    CursorCall, CursorHandle, CursorKind, CursorOrigin, CursorProxyFactory, CursorReply,
    InterceptingCursorFactory, ProxyCursor, RepeatableReadCursor, RepeatableReadCursorFactory,
};
pub use generated_keys::GeneratedKeysCache;
pub use pipeline::{ListenerFailurePolicy, ListenerPipeline, ListenerResult, QueryListener};
pub use profiling::{
    export_query_counts, log_query_counts, QueryCount, QueryCountListener, QueryCountScope,
    QueryCountSnapshot, QueryCountStrategy, SingleQueryCountHolder, ThreadQueryCountHolder,
};
pub use recorder::{ParameterRecorder, ParameterSetOperation, ParameterSetOperationBatch, QueryInfo};
pub use statement::{
    CallResult, ProxyPreparedStatement, ProxyPreparedStatementBuilder, ProxyStatement,
    StatementCall,
};
pub use types::*;
