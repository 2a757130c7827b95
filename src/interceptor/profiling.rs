// SPDX-License-Identifier: Apache-2.0

//! Query Counts
//!
//! Per data source counters of intercepted executions: calls, successes,
//! failures, elapsed time, operation kinds and statement shapes.
//! Counts are kept either per thread or in one shared holder.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use super::classifier::classify;
use super::context::ExecutionContext;
use super::pipeline::{ListenerResult, QueryListener};
use super::types::{QueryType, StatementType};

/// Counters for one data source
#[derive(Debug, Default)]
pub struct QueryCount {
    select: AtomicU64,
    insert: AtomicU64,
    update: AtomicU64,
    delete: AtomicU64,
    other: AtomicU64,
    statement: AtomicU64,
    prepared: AtomicU64,
    callable: AtomicU64,
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    elapsed_nanos: AtomicU64,
    max_elapsed_nanos: AtomicU64,
}

impl QueryCount {
    pub fn new() -> Self {
        Self::default()
    }

    fn kind_counter(&self, kind: QueryType) -> &AtomicU64 {
        match kind {
            QueryType::Select => &self.select,
            QueryType::Insert => &self.insert,
            QueryType::Update => &self.update,
            QueryType::Delete => &self.delete,
            QueryType::Other => &self.other,
        }
    }

    fn statement_counter(&self, statement_type: StatementType) -> &AtomicU64 {
        match statement_type {
            StatementType::Statement => &self.statement,
            StatementType::Prepared => &self.prepared,
            StatementType::Callable => &self.callable,
        }
    }

    pub fn increment_kind(&self, kind: QueryType) {
        self.kind_counter(kind).fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_statement_type(&self, statement_type: StatementType) {
        self.statement_counter(statement_type)
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_total(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failure(&self) {
        self.failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_elapsed(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_nanos.fetch_add(nanos, Ordering::Relaxed);

        let mut current = self.max_elapsed_nanos.load(Ordering::Relaxed);
        while nanos > current {
            match self.max_elapsed_nanos.compare_exchange(
                current,
                nanos,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(next) => current = next,
            }
        }
    }

    pub fn kind(&self, kind: QueryType) -> u64 {
        self.kind_counter(kind).load(Ordering::Relaxed)
    }

    pub fn statement_type(&self, statement_type: StatementType) -> u64 {
        self.statement_counter(statement_type).load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn success(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn failure(&self) -> u64 {
        self.failure.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::Relaxed))
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_nanos(self.max_elapsed_nanos.load(Ordering::Relaxed))
    }

    /// Number of classified queries of every kind
    pub fn queries(&self) -> u64 {
        QueryType::ALL.iter().map(|k| self.kind(*k)).sum()
    }

    pub fn snapshot(&self) -> QueryCountSnapshot {
        QueryCountSnapshot {
            select: self.kind(QueryType::Select),
            insert: self.kind(QueryType::Insert),
            update: self.kind(QueryType::Update),
            delete: self.kind(QueryType::Delete),
            other: self.kind(QueryType::Other),
            statement: self.statement_type(StatementType::Statement),
            prepared: self.statement_type(StatementType::Prepared),
            callable: self.statement_type(StatementType::Callable),
            total: self.total(),
            success: self.success(),
            failure: self.failure(),
            elapsed_ms: self.elapsed().as_secs_f64() * 1000.0,
            max_elapsed_ms: self.max_elapsed().as_secs_f64() * 1000.0,
        }
    }
}

/// Point-in-time copy of a [`QueryCount`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryCountSnapshot {
    pub select: u64,
    pub insert: u64,
    pub update: u64,
    pub delete: u64,
    pub other: u64,
    pub statement: u64,
    pub prepared: u64,
    pub callable: u64,
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub elapsed_ms: f64,
    pub max_elapsed_ms: f64,
}

impl QueryCountSnapshot {
    pub fn queries(&self) -> u64 {
        self.select + self.insert + self.update + self.delete + self.other
    }

    /// Adds another snapshot into this one
    pub fn merge(&mut self, other: &QueryCountSnapshot) {
        self.select += other.select;
        self.insert += other.insert;
        self.update += other.update;
        self.delete += other.delete;
        self.other += other.other;
        self.statement += other.statement;
        self.prepared += other.prepared;
        self.callable += other.callable;
        self.total += other.total;
        self.success += other.success;
        self.failure += other.failure;
        self.elapsed_ms += other.elapsed_ms;
        self.max_elapsed_ms = self.max_elapsed_ms.max(other.max_elapsed_ms);
    }

    /// One-line summary used by [`log_query_counts`]
    pub fn log_entry(&self, data_source_name: &str) -> String {
        format!(
            "DataSource:{} ElapsedTime:{:.3}ms Call:{} Success:{} Failure:{} Query:{} (Select:{} Insert:{} Update:{} Delete:{} Other:{})",
            data_source_name,
            self.elapsed_ms,
            self.total,
            self.success,
            self.failure,
            self.queries(),
            self.select,
            self.insert,
            self.update,
            self.delete,
            self.other
        )
    }
}

/// Where [`QueryCount`]s are kept
pub trait QueryCountStrategy: Send + Sync {
    fn get_or_create(&self, data_source_name: &str) -> Arc<QueryCount>;

    fn get(&self, data_source_name: &str) -> Option<Arc<QueryCount>>;

    /// Names with counts, sorted
    fn data_source_names(&self) -> Vec<String>;

    fn clear(&self);

    /// Sum of the counts of every data source
    fn grand_total(&self) -> QueryCountSnapshot {
        let mut total = QueryCountSnapshot::default();
        for name in self.data_source_names() {
            if let Some(count) = self.get(&name) {
                total.merge(&count.snapshot());
            }
        }
        total
    }
}

thread_local! {
    static THREAD_COUNTS: RefCell<HashMap<String, Arc<QueryCount>>> = RefCell::new(HashMap::new());
}

/// Counts kept in thread-local storage
///
/// Each thread sees only the executions it performed itself. Counts live
/// until [`QueryCountStrategy::clear`] is called on that thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadQueryCountHolder;

impl QueryCountStrategy for ThreadQueryCountHolder {
    fn get_or_create(&self, data_source_name: &str) -> Arc<QueryCount> {
        THREAD_COUNTS.with(|counts| {
            Arc::clone(
                counts
                    .borrow_mut()
                    .entry(data_source_name.to_string())
                    .or_default(),
            )
        })
    }

    fn get(&self, data_source_name: &str) -> Option<Arc<QueryCount>> {
        THREAD_COUNTS.with(|counts| counts.borrow().get(data_source_name).cloned())
    }

    fn data_source_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            THREAD_COUNTS.with(|counts| counts.borrow().keys().cloned().collect());
        names.sort();
        names
    }

    fn clear(&self) {
        THREAD_COUNTS.with(|counts| counts.borrow_mut().clear());
    }
}

/// Counts shared by every thread
#[derive(Debug, Default)]
pub struct SingleQueryCountHolder {
    counts: RwLock<HashMap<String, Arc<QueryCount>>>,
}

static GLOBAL_COUNTS: OnceLock<SingleQueryCountHolder> = OnceLock::new();

impl SingleQueryCountHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide holder, created on first use
    pub fn global() -> &'static SingleQueryCountHolder {
        GLOBAL_COUNTS.get_or_init(SingleQueryCountHolder::new)
    }
}

impl QueryCountStrategy for SingleQueryCountHolder {
    fn get_or_create(&self, data_source_name: &str) -> Arc<QueryCount> {
        if let Some(count) = self.counts.read().get(data_source_name) {
            return Arc::clone(count);
        }
        Arc::clone(
            self.counts
                .write()
                .entry(data_source_name.to_string())
                .or_default(),
        )
    }

    fn get(&self, data_source_name: &str) -> Option<Arc<QueryCount>> {
        self.counts.read().get(data_source_name).cloned()
    }

    fn data_source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.counts.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn clear(&self) {
        self.counts.write().clear();
    }
}

impl QueryCountStrategy for &'static SingleQueryCountHolder {
    fn get_or_create(&self, data_source_name: &str) -> Arc<QueryCount> {
        (**self).get_or_create(data_source_name)
    }

    fn get(&self, data_source_name: &str) -> Option<Arc<QueryCount>> {
        (**self).get(data_source_name)
    }

    fn data_source_names(&self) -> Vec<String> {
        (**self).data_source_names()
    }

    fn clear(&self) {
        (**self).clear()
    }
}

/// Per-thread counting window
///
/// Brackets a unit of work (e.g. one request) on one thread. A scope starts
/// with empty counts; on drop, the counts that were active when it began are
/// put back, so a nested scope leaves its enclosing scope untouched. Queries
/// run inside a nested scope are not added to the enclosing one.
#[must_use = "counts are restored when the scope is dropped"]
#[derive(Debug)]
pub struct QueryCountScope {
    outer: HashMap<String, Arc<QueryCount>>,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl QueryCountScope {
    /// Starts a scope with empty counts for this thread
    pub fn begin() -> Self {
        let outer = THREAD_COUNTS.with(|counts| std::mem::take(&mut *counts.borrow_mut()));
        Self {
            outer,
            _not_send: std::marker::PhantomData,
        }
    }

    /// Counts gathered so far in this scope
    pub fn snapshot(&self, data_source_name: &str) -> Option<QueryCountSnapshot> {
        ThreadQueryCountHolder
            .get(data_source_name)
            .map(|count| count.snapshot())
    }
}

impl Drop for QueryCountScope {
    fn drop(&mut self) {
        let outer = std::mem::take(&mut self.outer);
        THREAD_COUNTS.with(|counts| *counts.borrow_mut() = outer);
    }
}

/// Listener tallying every execution into a [`QueryCountStrategy`]
pub struct QueryCountListener {
    strategy: Arc<dyn QueryCountStrategy>,
}

impl QueryCountListener {
    pub fn new(strategy: Arc<dyn QueryCountStrategy>) -> Self {
        Self { strategy }
    }

    /// Per-thread counts
    pub fn per_thread() -> Self {
        Self::new(Arc::new(ThreadQueryCountHolder))
    }

    /// Counts in the process-wide [`SingleQueryCountHolder`]
    pub fn global() -> Self {
        Self::new(Arc::new(SingleQueryCountHolder::global()))
    }

    pub fn strategy(&self) -> &Arc<dyn QueryCountStrategy> {
        &self.strategy
    }
}

impl Default for QueryCountListener {
    fn default() -> Self {
        Self::per_thread()
    }
}

impl QueryListener for QueryCountListener {
    fn name(&self) -> &str {
        "query-count"
    }

    fn after_query(&self, ctx: &ExecutionContext) -> ListenerResult {
        let count = self.strategy.get_or_create(&ctx.data_source_name);

        count.increment_total();
        if ctx.is_success() {
            count.increment_success();
        } else {
            count.increment_failure();
        }
        count.add_elapsed(ctx.elapsed);
        count.increment_statement_type(ctx.statement_type);
        for query in &ctx.queries {
            count.increment_kind(classify(query.query.as_str()));
        }
        Ok(())
    }
}

/// Emits one summary line per data source through `tracing`
pub fn log_query_counts(strategy: &dyn QueryCountStrategy) {
    for name in strategy.data_source_names() {
        if let Some(count) = strategy.get(&name) {
            let snapshot = count.snapshot();
            info!(
                data_source = %name,
                total = snapshot.total,
                failure = snapshot.failure,
                "{}",
                snapshot.log_entry(&name)
            );
        }
    }
}

/// Exports every data source's counts plus the grand total as JSON
pub fn export_query_counts(strategy: &dyn QueryCountStrategy) -> String {
    #[derive(Serialize)]
    struct QueryCountExport {
        data_sources: BTreeMap<String, QueryCountSnapshot>,
        total: QueryCountSnapshot,
    }

    let data_sources = strategy
        .data_source_names()
        .into_iter()
        .filter_map(|name| strategy.get(&name).map(|count| (name, count.snapshot())))
        .collect();
    let export = QueryCountExport {
        data_sources,
        total: strategy.grand_total(),
    };

    serde_json::to_string_pretty(&export).unwrap_or_else(|_| "{}".to_string())
}
