// SPDX-License-Identifier: Apache-2.0

//! Scripted in-memory driver
//!
//! Every call that reaches a mock object is appended to a shared journal so
//! tests can verify what was forwarded. Failures can be scripted per method
//! name. Any executed `INSERT` allocates a generated key from a shared
//! sequence, and each `generated_keys()` call returns a brand new cursor
//! (like drivers that re-create the key cursor on every request).

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{DriverError, DriverResult};
use crate::traits::{Connection, Cursor, DataSource, DriverObject, PreparedStatement, Statement};
use crate::value::{KeyRequest, ParameterKey, Value};

/// State shared by every object created from one mock data source
#[derive(Debug)]
pub struct MockState {
    journal: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, DriverError>>,
    query_rows: Mutex<Vec<Vec<Value>>>,
    batch_result: Mutex<Option<Vec<i64>>>,
    update_count: AtomicI64,
    next_key: AtomicI64,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            journal: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            query_rows: Mutex::new(Vec::new()),
            batch_result: Mutex::new(None),
            update_count: AtomicI64::new(1),
            next_key: AtomicI64::new(1),
        }
    }
}

impl MockState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All journal entries in call order
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    /// Number of journal entries equal to `entry`
    pub fn count(&self, entry: &str) -> usize {
        self.journal.lock().iter().filter(|e| *e == entry).count()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.count(entry) > 0
    }

    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    /// Make every call of `method` fail with `error` until cleared
    pub fn fail_on(&self, method: &str, error: DriverError) {
        self.failures.lock().insert(method.to_string(), error);
    }

    pub fn clear_failure(&self, method: &str) {
        self.failures.lock().remove(method);
    }

    /// Rows returned by every query cursor
    pub fn set_query_rows(&self, rows: Vec<Vec<Value>>) {
        *self.query_rows.lock() = rows;
    }

    /// Overrides the update counts returned by batch execution
    pub fn set_batch_result(&self, counts: Vec<i64>) {
        *self.batch_result.lock() = Some(counts);
    }

    pub fn set_update_count(&self, count: i64) {
        self.update_count.store(count, Ordering::SeqCst);
    }

    fn record(&self, entry: impl Into<String>) {
        self.journal.lock().push(entry.into());
    }

    fn check(&self, method: &str) -> DriverResult<()> {
        match self.failures.lock().get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn keys_for(&self, sql: &str) -> Vec<i64> {
        if is_insert(sql) {
            vec![self.next_key.fetch_add(1, Ordering::SeqCst)]
        } else {
            Vec::new()
        }
    }

    fn batch_counts(&self, entries: usize) -> Vec<i64> {
        self.batch_result
            .lock()
            .clone()
            .unwrap_or_else(|| vec![1; entries])
    }

    fn query_cursor(self: &Arc<Self>) -> Box<dyn Cursor> {
        Box::new(MockCursor::new(
            Arc::clone(self),
            "MockCursor",
            self.query_rows.lock().clone(),
        ))
    }

    fn keys_cursor(self: &Arc<Self>, keys: &[i64]) -> Box<dyn Cursor> {
        let rows = keys.iter().map(|k| vec![Value::Int(*k)]).collect();
        Box::new(MockCursor::new(Arc::clone(self), "MockKeysCursor", rows))
    }
}

fn is_insert(sql: &str) -> bool {
    sql.trim_start()
        .get(..6)
        .map(|head| head.eq_ignore_ascii_case("insert"))
        .unwrap_or(false)
}

fn is_select(sql: &str) -> bool {
    sql.trim_start()
        .get(..6)
        .map(|head| head.eq_ignore_ascii_case("select"))
        .unwrap_or(false)
}

// ==================== Data source ====================

#[derive(Debug)]
pub struct MockDataSource {
    name: String,
    state: Arc<MockState>,
}

impl MockDataSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: MockState::new(),
        }
    }

    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

impl DriverObject for MockDataSource {
    fn type_name(&self) -> &'static str {
        "MockDataSource"
    }

    fn describe(&self) -> String {
        format!("mock://{}", self.name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl DataSource for MockDataSource {
    fn get_connection(&self) -> DriverResult<Box<dyn Connection>> {
        self.state.record("get_connection");
        self.state.check("get_connection")?;
        Ok(Box::new(MockConnection::new(Arc::clone(&self.state))))
    }
}

// ==================== Connection ====================

#[derive(Debug)]
pub struct MockConnection {
    state: Arc<MockState>,
    closed: bool,
}

impl MockConnection {
    pub fn new(state: Arc<MockState>) -> Self {
        Self {
            state,
            closed: false,
        }
    }
}

impl DriverObject for MockConnection {
    fn type_name(&self) -> &'static str {
        "MockConnection"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Connection for MockConnection {
    fn create_statement(&mut self) -> DriverResult<Box<dyn Statement>> {
        self.state.record("create_statement");
        self.state.check("create_statement")?;
        Ok(Box::new(MockStatement::new(Arc::clone(&self.state))))
    }

    fn prepare_statement(
        &mut self,
        sql: &str,
        keys: &KeyRequest,
    ) -> DriverResult<Box<dyn PreparedStatement>> {
        self.state.record(format!("prepare_statement({})", sql));
        self.state.check("prepare_statement")?;
        Ok(Box::new(MockPreparedStatement::new(
            Arc::clone(&self.state),
            sql,
            keys.clone(),
        )))
    }

    fn prepare_call(&mut self, sql: &str) -> DriverResult<Box<dyn PreparedStatement>> {
        self.state.record(format!("prepare_call({})", sql));
        self.state.check("prepare_call")?;
        Ok(Box::new(MockPreparedStatement::new(
            Arc::clone(&self.state),
            sql,
            KeyRequest::None,
        )))
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.state.record("commit");
        self.state.check("commit")
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.state.record("rollback");
        self.state.check("rollback")
    }

    fn close(&mut self) -> DriverResult<()> {
        self.state.record("close_connection");
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

// ==================== Statement ====================

#[derive(Debug)]
pub struct MockStatement {
    state: Arc<MockState>,
    batch: Vec<String>,
    last_keys: Vec<i64>,
    last_was_query: bool,
    closed: bool,
}

impl MockStatement {
    pub fn new(state: Arc<MockState>) -> Self {
        Self {
            state,
            batch: Vec::new(),
            last_keys: Vec::new(),
            last_was_query: false,
            closed: false,
        }
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::closed("MockStatement"));
        }
        Ok(())
    }
}

impl DriverObject for MockStatement {
    fn type_name(&self) -> &'static str {
        "MockStatement"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Statement for MockStatement {
    fn execute(&mut self, sql: &str, _keys: &KeyRequest) -> DriverResult<bool> {
        self.state.record(format!("execute({})", sql));
        self.ensure_open()?;
        self.state.check("execute")?;
        self.last_keys = self.state.keys_for(sql);
        self.last_was_query = is_select(sql);
        Ok(self.last_was_query)
    }

    fn execute_query(&mut self, sql: &str) -> DriverResult<Box<dyn Cursor>> {
        self.state.record(format!("execute_query({})", sql));
        self.ensure_open()?;
        self.state.check("execute_query")?;
        self.last_keys.clear();
        self.last_was_query = true;
        Ok(self.state.query_cursor())
    }

    fn execute_update(&mut self, sql: &str, _keys: &KeyRequest) -> DriverResult<i64> {
        self.state.record(format!("execute_update({})", sql));
        self.ensure_open()?;
        self.state.check("execute_update")?;
        self.last_keys = self.state.keys_for(sql);
        self.last_was_query = false;
        Ok(self.state.update_count.load(Ordering::SeqCst))
    }

    fn add_batch(&mut self, sql: &str) -> DriverResult<()> {
        self.state.record(format!("add_batch({})", sql));
        self.state.check("add_batch")?;
        self.batch.push(sql.to_string());
        Ok(())
    }

    fn clear_batch(&mut self) -> DriverResult<()> {
        self.state.record("clear_batch");
        self.state.check("clear_batch")?;
        self.batch.clear();
        Ok(())
    }

    fn execute_batch(&mut self) -> DriverResult<Vec<i64>> {
        self.state.record("execute_batch");
        self.ensure_open()?;
        let entries = std::mem::take(&mut self.batch);
        self.state.check("execute_batch")?;
        self.last_keys = entries
            .iter()
            .flat_map(|sql| self.state.keys_for(sql))
            .collect();
        self.last_was_query = false;
        Ok(self.state.batch_counts(entries.len()))
    }

    fn generated_keys(&mut self) -> DriverResult<Box<dyn Cursor>> {
        self.state.record("generated_keys");
        self.state.check("generated_keys")?;
        Ok(self.state.keys_cursor(&self.last_keys))
    }

    fn result_cursor(&mut self) -> DriverResult<Option<Box<dyn Cursor>>> {
        self.state.record("result_cursor");
        self.state.check("result_cursor")?;
        Ok(self.last_was_query.then(|| self.state.query_cursor()))
    }

    fn close(&mut self) -> DriverResult<()> {
        self.state.record("close_statement");
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

// ==================== Prepared statement ====================

#[derive(Debug)]
pub struct MockPreparedStatement {
    state: Arc<MockState>,
    sql: String,
    keys: KeyRequest,
    parameters: BTreeMap<String, Value>,
    batch_entries: usize,
    last_keys: Vec<i64>,
    last_was_query: bool,
    closed: bool,
}

impl MockPreparedStatement {
    pub fn new(state: Arc<MockState>, sql: impl Into<String>, keys: KeyRequest) -> Self {
        Self {
            state,
            sql: sql.into(),
            keys,
            parameters: BTreeMap::new(),
            batch_entries: 0,
            last_keys: Vec::new(),
            last_was_query: false,
            closed: false,
        }
    }

    /// Parameters currently bound, keyed by their display form
    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.parameters
    }

    pub fn key_request(&self) -> &KeyRequest {
        &self.keys
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::closed("MockPreparedStatement"));
        }
        Ok(())
    }
}

impl DriverObject for MockPreparedStatement {
    fn type_name(&self) -> &'static str {
        "MockPreparedStatement"
    }

    fn describe(&self) -> String {
        format!("MockPreparedStatement: {}", self.sql)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PreparedStatement for MockPreparedStatement {
    fn set_parameter(&mut self, key: &ParameterKey, value: &Value) -> DriverResult<()> {
        self.state.record(format!("set_parameter({}, {})", key, value));
        self.state.check("set_parameter")?;
        self.parameters.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn clear_parameters(&mut self) -> DriverResult<()> {
        self.state.record("clear_parameters");
        self.state.check("clear_parameters")?;
        self.parameters.clear();
        Ok(())
    }

    fn add_batch(&mut self) -> DriverResult<()> {
        self.state.record("add_batch");
        self.state.check("add_batch")?;
        self.batch_entries += 1;
        Ok(())
    }

    fn clear_batch(&mut self) -> DriverResult<()> {
        self.state.record("clear_batch");
        self.state.check("clear_batch")?;
        self.batch_entries = 0;
        Ok(())
    }

    fn execute(&mut self) -> DriverResult<bool> {
        self.state.record("execute");
        self.ensure_open()?;
        self.state.check("execute")?;
        self.last_keys = self.state.keys_for(&self.sql);
        self.last_was_query = is_select(&self.sql);
        Ok(self.last_was_query)
    }

    fn execute_query(&mut self) -> DriverResult<Box<dyn Cursor>> {
        self.state.record("execute_query");
        self.ensure_open()?;
        self.state.check("execute_query")?;
        self.last_keys.clear();
        self.last_was_query = true;
        Ok(self.state.query_cursor())
    }

    fn execute_update(&mut self) -> DriverResult<i64> {
        self.state.record("execute_update");
        self.ensure_open()?;
        self.state.check("execute_update")?;
        self.last_keys = self.state.keys_for(&self.sql);
        self.last_was_query = false;
        Ok(self.state.update_count.load(Ordering::SeqCst))
    }

    fn execute_batch(&mut self) -> DriverResult<Vec<i64>> {
        self.state.record("execute_batch");
        self.ensure_open()?;
        let entries = std::mem::take(&mut self.batch_entries);
        self.state.check("execute_batch")?;
        self.last_keys = (0..entries)
            .flat_map(|_| self.state.keys_for(&self.sql))
            .collect();
        self.last_was_query = false;
        Ok(self.state.batch_counts(entries))
    }

    fn generated_keys(&mut self) -> DriverResult<Box<dyn Cursor>> {
        self.state.record("generated_keys");
        self.state.check("generated_keys")?;
        Ok(self.state.keys_cursor(&self.last_keys))
    }

    fn result_cursor(&mut self) -> DriverResult<Option<Box<dyn Cursor>>> {
        self.state.record("result_cursor");
        self.state.check("result_cursor")?;
        Ok(self.last_was_query.then(|| self.state.query_cursor()))
    }

    fn close(&mut self) -> DriverResult<()> {
        self.state.record("close_statement");
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

// ==================== Cursor ====================

#[derive(Debug)]
pub struct MockCursor {
    state: Arc<MockState>,
    label: &'static str,
    rows: Vec<Vec<Value>>,
    position: Option<usize>,
    closed: bool,
}

impl MockCursor {
    pub fn new(state: Arc<MockState>, label: &'static str, rows: Vec<Vec<Value>>) -> Self {
        Self {
            state,
            label,
            rows,
            position: None,
            closed: false,
        }
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::closed(self.label));
        }
        Ok(())
    }
}

impl DriverObject for MockCursor {
    fn type_name(&self) -> &'static str {
        self.label
    }

    fn describe(&self) -> String {
        format!("{}({} rows)", self.label, self.rows.len())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Cursor for MockCursor {
    fn next(&mut self) -> DriverResult<bool> {
        self.ensure_open()?;
        let next = self.position.map(|p| p + 1).unwrap_or(0);
        self.position = Some(next.min(self.rows.len()));
        Ok(next < self.rows.len())
    }

    fn get(&self, column: usize) -> DriverResult<Value> {
        self.ensure_open()?;
        let row = self
            .position
            .and_then(|p| self.rows.get(p))
            .ok_or_else(|| DriverError::execution_error("cursor is not on a row"))?;
        column
            .checked_sub(1)
            .and_then(|idx| row.get(idx))
            .cloned()
            .ok_or_else(|| DriverError::execution_error(format!("no column {}", column)))
    }

    fn column_count(&self) -> usize {
        self.rows.first().map(|row| row.len()).unwrap_or(0)
    }

    fn before_first(&mut self) -> DriverResult<()> {
        self.ensure_open()?;
        self.position = None;
        Ok(())
    }

    fn close(&mut self) -> DriverResult<()> {
        self.state.record(format!("close_cursor({})", self.label));
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_allocates_keys() {
        let ds = MockDataSource::new("mock");
        let state = ds.state();
        let mut conn = ds.get_connection().unwrap();
        let mut stmt = conn.create_statement().unwrap();

        stmt.execute_update("insert into t values (1)", &KeyRequest::Auto)
            .unwrap();
        let mut keys = stmt.generated_keys().unwrap();
        assert!(keys.next().unwrap());
        assert_eq!(keys.get(1).unwrap(), Value::Int(1));
        assert!(!keys.next().unwrap());
        assert!(state.contains("execute_update(insert into t values (1))"));
    }

    #[test]
    fn test_scripted_failure() {
        let state = MockState::new();
        state.fail_on("execute_query", DriverError::syntax_error("boom"));
        let mut stmt = MockStatement::new(Arc::clone(&state));

        let err = stmt.execute_query("select 1").err().unwrap();
        assert_eq!(err, DriverError::syntax_error("boom"));
        assert_eq!(state.count("execute_query(select 1)"), 1);
    }

    #[test]
    fn test_batch_counts_default_to_one_per_entry() {
        let state = MockState::new();
        let mut stmt = MockPreparedStatement::new(Arc::clone(&state), "update t set a = ?", KeyRequest::None);
        stmt.add_batch().unwrap();
        stmt.add_batch().unwrap();
        assert_eq!(stmt.execute_batch().unwrap(), vec![1, 1]);
        assert_eq!(stmt.execute_batch().unwrap(), Vec::<i64>::new());
    }
}
