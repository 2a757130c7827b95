// SPDX-License-Identifier: Apache-2.0

//! Driver capability traits
//!
//! The proxy layer treats a database driver as an opaque set of objects:
//! a data source hands out connections, connections create statements,
//! statements execute SQL and return cursors. Each driver implements these
//! traits; the proxy implements nothing beyond forwarding to them.

use std::any::Any;

use crate::error::{DriverError, DriverResult};
use crate::value::{KeyRequest, ParameterKey, Value};

/// Identity capabilities shared by every driver object
pub trait DriverObject: Any + Send {
    /// Simple type name used in string forms (e.g. "PgStatement")
    fn type_name(&self) -> &'static str;

    /// Driver-provided string form of the object
    fn describe(&self) -> String {
        self.type_name().to_string()
    }

    /// Whether this object wraps (or is) an object of the given type name
    fn is_wrapper_for(&self, type_name: &str) -> bool {
        self.type_name() == type_name
    }

    fn as_any(&self) -> &dyn Any;
}

/// Factory of physical connections
pub trait DataSource: DriverObject + Sync {
    fn get_connection(&self) -> DriverResult<Box<dyn Connection>>;
}

/// A session with the database
pub trait Connection: DriverObject {
    fn create_statement(&mut self) -> DriverResult<Box<dyn Statement>>;

    /// Prepares a parameterized statement; `keys` states whether executions
    /// of it should make generated keys available
    fn prepare_statement(
        &mut self,
        sql: &str,
        keys: &KeyRequest,
    ) -> DriverResult<Box<dyn PreparedStatement>>;

    /// Prepares a stored procedure call
    fn prepare_call(&mut self, sql: &str) -> DriverResult<Box<dyn PreparedStatement>>;

    fn commit(&mut self) -> DriverResult<()>;

    fn rollback(&mut self) -> DriverResult<()>;

    fn close(&mut self) -> DriverResult<()>;

    fn is_closed(&self) -> bool;
}

/// A statement executing ad-hoc SQL text
pub trait Statement: DriverObject {
    fn execute(&mut self, sql: &str, keys: &KeyRequest) -> DriverResult<bool>;

    fn execute_query(&mut self, sql: &str) -> DriverResult<Box<dyn Cursor>>;

    fn execute_update(&mut self, sql: &str, keys: &KeyRequest) -> DriverResult<i64>;

    fn add_batch(&mut self, sql: &str) -> DriverResult<()>;

    fn clear_batch(&mut self) -> DriverResult<()>;

    fn execute_batch(&mut self) -> DriverResult<Vec<i64>>;

    /// Cursor over the keys generated by the last execution
    fn generated_keys(&mut self) -> DriverResult<Box<dyn Cursor>>;

    /// Cursor produced by the last `execute`, if any
    fn result_cursor(&mut self) -> DriverResult<Option<Box<dyn Cursor>>>;

    fn close(&mut self) -> DriverResult<()>;

    fn is_closed(&self) -> bool;
}

/// A precompiled statement with bind parameters (also used for calls)
pub trait PreparedStatement: DriverObject {
    fn set_parameter(&mut self, key: &ParameterKey, value: &Value) -> DriverResult<()>;

    fn clear_parameters(&mut self) -> DriverResult<()>;

    fn add_batch(&mut self) -> DriverResult<()>;

    fn clear_batch(&mut self) -> DriverResult<()>;

    fn execute(&mut self) -> DriverResult<bool>;

    fn execute_query(&mut self) -> DriverResult<Box<dyn Cursor>>;

    fn execute_update(&mut self) -> DriverResult<i64>;

    fn execute_batch(&mut self) -> DriverResult<Vec<i64>>;

    fn generated_keys(&mut self) -> DriverResult<Box<dyn Cursor>>;

    fn result_cursor(&mut self) -> DriverResult<Option<Box<dyn Cursor>>>;

    fn close(&mut self) -> DriverResult<()>;

    fn is_closed(&self) -> bool;
}

/// A forward-only cursor over rows
pub trait Cursor: DriverObject {
    /// Advances to the next row; false once exhausted
    fn next(&mut self) -> DriverResult<bool>;

    /// Reads a column (1-based) of the current row
    fn get(&self, column: usize) -> DriverResult<Value>;

    fn column_count(&self) -> usize;

    /// Moves back before the first row, when the driver supports it
    fn before_first(&mut self) -> DriverResult<()> {
        Err(DriverError::not_supported(format!(
            "{} is forward-only",
            self.type_name()
        )))
    }

    fn close(&mut self) -> DriverResult<()>;

    fn is_closed(&self) -> bool;
}
