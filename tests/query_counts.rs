mod common;

use std::sync::Arc;

use common::proxied;
use qore_core::{DriverError, KeyRequest};
use qore_proxy::interceptor::{
    QueryCountListener, QueryCountScope, QueryCountStrategy, QueryType, SingleQueryCountHolder,
    StatementType,
};
use qore_proxy::{ConnectionIdKind, ListenerFailurePolicy, ProxyConfig, ProxySettings};

#[test]
fn test_counts_successes_and_failures() {
    let holder = Arc::new(SingleQueryCountHolder::new());
    let (ds, state, _recorder) = proxied(
        ProxyConfig::builder().listener(Arc::new(QueryCountListener::new(holder.clone()))),
    );
    let mut conn = ds.get_connection().unwrap();
    let mut stmt = conn.create_statement().unwrap();

    for i in 0..5 {
        stmt.execute_update(&format!("update t set a = {}", i), KeyRequest::None)
            .unwrap();
    }
    state.fail_on("execute_update", DriverError::constraint_violation("unique a"));
    for _ in 0..2 {
        assert!(stmt
            .execute_update("update t set a = 0", KeyRequest::None)
            .is_err());
    }

    let count = holder.get("orders").expect("counts for data source");
    assert_eq!(count.total(), 7);
    assert_eq!(count.success(), 5);
    assert_eq!(count.failure(), 2);
    assert_eq!(count.kind(QueryType::Update), 7);
    assert_eq!(count.statement_type(StatementType::Statement), 7);
    assert!(count.max_elapsed() <= count.elapsed());
    assert_eq!(holder.data_source_names(), vec!["orders".to_string()]);
}

#[test]
fn test_batch_entries_counted_by_kind() {
    let holder = Arc::new(SingleQueryCountHolder::new());
    let (ds, _state, _recorder) = proxied(
        ProxyConfig::builder().listener(Arc::new(QueryCountListener::new(holder.clone()))),
    );
    let mut conn = ds.get_connection().unwrap();
    let mut stmt = conn.create_statement().unwrap();

    stmt.add_batch("insert into t values (1)").unwrap();
    stmt.add_batch("delete from t").unwrap();
    stmt.execute_batch().unwrap();
    stmt.execute_query("select 1").unwrap();

    let snapshot = holder.grand_total();
    assert_eq!(snapshot.total, 2);
    assert_eq!(snapshot.queries(), 3);
    let count = holder.get("orders").unwrap();
    assert_eq!(count.kind(QueryType::Insert), 1);
    assert_eq!(count.kind(QueryType::Delete), 1);
    assert_eq!(count.kind(QueryType::Select), 1);
}

#[test]
fn test_per_thread_counts_within_scope() {
    let (ds, _state, _recorder) =
        proxied(ProxyConfig::builder().listener(Arc::new(QueryCountListener::per_thread())));
    let mut conn = ds.get_connection().unwrap();
    let mut stmt = conn.create_statement().unwrap();

    let scope = QueryCountScope::begin();
    stmt.execute("select 1", KeyRequest::None).unwrap();
    stmt.execute("select 2", KeyRequest::None).unwrap();
    let snapshot = scope.snapshot("orders").expect("counts in scope");
    assert_eq!(snapshot.total, 2);
    assert_eq!(snapshot.success, 2);
    drop(scope);

    let scope = QueryCountScope::begin();
    assert!(scope.snapshot("orders").is_none());
}

#[test]
fn test_settings_file_drives_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("proxy.json");
    std::fs::write(
        &path,
        r#"{
            "auto_retrieve_generated_keys": true,
            "repeatable_read_generated_keys": true,
            "intercept_result_cursors": true,
            "connection_ids": "uuid",
            "listener_failure_policy": "propagate"
        }"#,
    )
    .unwrap();

    let settings = ProxySettings::load(&path).unwrap();
    assert_eq!(settings.connection_ids, ConnectionIdKind::Uuid);
    assert_eq!(settings.listener_failure_policy, ListenerFailurePolicy::Propagate);
    assert!(settings.retrieve_generated_keys_for_batch_prepared_or_callable);

    let (ds, state, recorder) = proxied(ProxyConfig::builder().settings(&settings));
    let mut conn = ds.get_connection().unwrap();
    assert!(uuid::Uuid::parse_str(conn.info().connection_id()).is_ok());

    let mut stmt = conn.create_statement().unwrap();
    stmt.execute_update("insert into t values (1)", KeyRequest::Auto)
        .unwrap();
    let keys = stmt.generated_keys().unwrap();
    assert!(keys.is_proxy());
    assert_eq!(state.count("generated_keys"), 1);

    let rows = stmt.execute_query("select 1").unwrap();
    assert!(rows.is_proxy());
    rows.next().unwrap();
    assert!(recorder
        .methods()
        .contains(&"before Cursor.next".to_string()));
}

#[test]
fn test_settings_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("proxy.json");

    let settings = ProxySettings {
        data_source_name: "reporting".to_string(),
        auto_close_generated_keys: true,
        ..ProxySettings::default()
    };
    settings.save(&path).unwrap();

    let loaded = ProxySettings::load(&path).unwrap();
    assert_eq!(loaded.data_source_name, "reporting");
    assert!(loaded.auto_close_generated_keys);
    assert!(!loaded.auto_retrieve_generated_keys);
}
