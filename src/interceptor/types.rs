//! Interceptor Types
//!
//! Shared vocabulary of the interception core: query and statement kinds,
//! method descriptors and per-connection information.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Coarse SQL operation category used for metrics tallying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    #[default]
    Other,
}

impl QueryType {
    pub const ALL: [QueryType; 5] = [
        Self::Select,
        Self::Insert,
        Self::Update,
        Self::Delete,
        Self::Other,
    ];

    /// Returns true if this operation modifies data
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the statement an execution went through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementType {
    /// Ad-hoc SQL text
    Statement,
    /// Parameterized statement
    Prepared,
    /// Stored procedure call
    Callable,
}

impl StatementType {
    pub const ALL: [StatementType; 3] = [Self::Statement, Self::Prepared, Self::Callable];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Statement => "statement",
            Self::Prepared => "prepared",
            Self::Callable => "callable",
        }
    }
}

/// Kind of driver object a call was made against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    DataSource,
    Connection,
    Statement,
    PreparedStatement,
    CallableStatement,
    Cursor,
    Unknown,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataSource => "DataSource",
            Self::Connection => "Connection",
            Self::Statement => "Statement",
            Self::PreparedStatement => "PreparedStatement",
            Self::CallableStatement => "CallableStatement",
            Self::Cursor => "Cursor",
            Self::Unknown => "Unknown",
        }
    }
}

impl From<StatementType> for ObjectKind {
    fn from(statement_type: StatementType) -> Self {
        match statement_type {
            StatementType::Statement => Self::Statement,
            StatementType::Prepared => Self::PreparedStatement,
            StatementType::Callable => Self::CallableStatement,
        }
    }
}

/// Descriptor of an intercepted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Method {
    pub declaring: ObjectKind,
    pub name: &'static str,
}

impl Method {
    pub const UNKNOWN: Method = Method {
        declaring: ObjectKind::Unknown,
        name: "unknown",
    };

    pub const fn new(declaring: ObjectKind, name: &'static str) -> Self {
        Self { declaring, name }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring.as_str(), self.name)
    }
}

/// Information about one proxied connection
///
/// Shared (behind an `Arc`) by the connection proxy and every statement it
/// creates, so transaction counters are visible from execution contexts.
#[derive(Debug)]
pub struct ConnectionInfo {
    data_source_name: String,
    connection_id: String,
    commit_count: AtomicU64,
    rollback_count: AtomicU64,
    closed: AtomicBool,
}

impl ConnectionInfo {
    pub fn new(data_source_name: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            data_source_name: data_source_name.into(),
            connection_id: connection_id.into(),
            commit_count: AtomicU64::new(0),
            rollback_count: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn data_source_name(&self) -> &str {
        &self.data_source_name
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn commit_count(&self) -> u64 {
        self.commit_count.load(Ordering::Relaxed)
    }

    pub fn rollback_count(&self) -> u64 {
        self.rollback_count.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_commit(&self) {
        self.commit_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_rollback(&self) {
        self.rollback_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}
