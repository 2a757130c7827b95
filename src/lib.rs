// QoreDB Proxy - driver-call interception
// Core library

pub mod config;
pub mod error;
pub mod interceptor;
pub mod observability;

pub use config::{ConnectionIdKind, GeneratedKeysConfig, ProxyConfig, ProxyConfigBuilder, ProxySettings};
pub use error::{
    BoxError, CompletedCall, FrameworkError, ListenerErrors, ListenerFailure, ListenerPhase, ProxyError,
    ProxyResult,
};
pub use interceptor::{
    ExecutionContext, ListenerFailurePolicy, ProxyConnection, ProxyDataSource,
    ProxyPreparedStatement, ProxyStatement, QueryListener,
};
pub use observability::{init_tracing, TracingOptions};
