use super::*;
use crate::DbManager;
use crate::test_support::{Level, MockDriver, RecordingSink, Reply, eventually, rows};
use dbwarden_core::{ConnectionConfig, DriverRows, NOT_CONNECTED_MESSAGE};
use futures::FutureExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

async fn connected(driver: &Arc<MockDriver>) -> (DbManager, Arc<RecordingSink>) {
    let sink = RecordingSink::new();
    let manager = DbManager::builder(driver.clone(), ConnectionConfig::new())
        .sink(sink.clone())
        .build()
        .unwrap();
    manager.wait_until_connected().await;
    (manager, sink)
}

fn users() -> DriverRows {
    rows(&["id"], vec![vec![Value::Int64(1)]])
}

#[test]
fn test_label_with_context() {
    let request = QueryRequest::new("getUsers", "SELECT id FROM users")
        .with_context(QueryContext::new("acme", "core", "2024"));
    assert_eq!(request.label(), "acme/core/2024/getUsers");

    let bare = QueryRequest::new("getUsers", "SELECT id FROM users");
    assert_eq!(bare.label(), "getUsers");
}

#[test]
fn test_debug_flag_from_name() {
    assert!(QueryRequest::new("getUsers_debug", "SELECT 1").is_debug());
    assert!(QueryRequest::new("debugOrders", "SELECT 1").is_debug());
    assert!(!QueryRequest::new("getUsers", "SELECT 1").is_debug());
    // Case-sensitive substring match
    assert!(!QueryRequest::new("getUsersDEBUG", "SELECT 1").is_debug());
}

#[test]
fn test_bind_appends_params() {
    let request = QueryRequest::new("byOrg", "SELECT * FROM t WHERE org = $1 AND active = $2")
        .bind("acme")
        .bind(true);
    assert_eq!(
        request.params,
        vec![Value::String("acme".into()), Value::Bool(true)]
    );
}

#[tokio::test]
async fn test_not_connected_fails_synchronously() {
    let driver = MockDriver::unreachable();
    let sink = RecordingSink::new();
    let manager = DbManager::builder(driver.clone(), ConnectionConfig::new())
        .sink(sink.clone())
        .build()
        .unwrap();

    let result = manager
        .query(QueryRequest::new("x", ""))
        .now_or_never()
        .expect("rejection should not wait on anything");

    let err = result.unwrap_err();
    assert_eq!(err, WardenError::NotConnected);
    assert_eq!(err.to_string(), NOT_CONNECTED_MESSAGE);
    assert_eq!(driver.total_query_calls(), 0);
    assert_eq!(manager.outstanding_queries(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_not_connected_while_retrying() {
    let driver = MockDriver::unreachable();
    let manager = DbManager::builder(driver.clone(), ConnectionConfig::new())
        .sink(RecordingSink::new())
        .build()
        .unwrap();
    eventually(|| driver.connect_attempts() >= 2).await;

    let err = manager
        .query_with("getUsers", "SELECT id FROM users", vec![], None)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "DB.query aborted, not connected yet");
    assert_eq!(driver.total_query_calls(), 0);
}

#[tokio::test]
async fn test_success_logs_one_summary_line() {
    let driver = MockDriver::new();
    driver.set_default_reply(Reply::Rows(Some(users())));
    let (manager, sink) = connected(&driver).await;

    let result = manager
        .query(QueryRequest::new("getUsers", "SELECT id FROM users"))
        .await
        .unwrap();

    assert_eq!(result.row_count(), 1);
    let info = sink.lines(Level::Info);
    let summaries: Vec<_> = info.iter().filter(|line| line.contains(" rows, rtt ")).collect();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].starts_with("getUsers: 1 rows, rtt "));
    assert!(summaries[0].ends_with("ms"));
    assert!(sink.lines(Level::Debug).is_empty());
    assert_eq!(manager.outstanding_queries(), 0);
}

#[tokio::test]
async fn test_context_label_in_summary() {
    let driver = MockDriver::new();
    driver.set_default_reply(Reply::Rows(Some(users())));
    let (manager, sink) = connected(&driver).await;

    let result = manager
        .query_with(
            "getUsers",
            "SELECT id FROM users WHERE org = $1",
            vec![Value::from("acme")],
            Some(QueryContext::new("acme", "core", "2024")),
        )
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        json!({ "rows": [{ "id": 1 }] })
    );
    assert_eq!(sink.count_containing("acme/core/2024/getUsers: 1 rows"), 1);
}

#[tokio::test]
async fn test_debug_query_logs_payload() {
    let driver = MockDriver::new();
    driver.set_default_reply(Reply::Rows(Some(users())));
    let (manager, sink) = connected(&driver).await;

    manager
        .query(QueryRequest::new("getUsers", "SELECT id FROM users"))
        .await
        .unwrap();
    assert!(sink.lines(Level::Debug).is_empty());

    manager
        .query(QueryRequest::new("getUsers_debug", "SELECT id FROM users"))
        .await
        .unwrap();

    let verbose = sink.lines(Level::Debug);
    assert_eq!(verbose.len(), 2);
    assert_eq!(verbose[0], "getUsers_debug: SELECT id FROM users");
    assert!(verbose[1].starts_with("getUsers_debug: "));
    assert!(verbose[1].contains("\"id\": 1"));
    assert_eq!(sink.count_containing(" rows, rtt "), 2);
}

#[tokio::test]
async fn test_missing_data_is_empty_result() {
    let driver = MockDriver::new();
    driver.set_default_reply(Reply::Rows(None));
    let (manager, sink) = connected(&driver).await;

    let result = manager
        .query(QueryRequest::new("touch", "UPDATE users SET seen = now()"))
        .await
        .unwrap();

    assert_eq!(result, QueryResult::empty());
    assert_eq!(sink.count_containing("touch: 0 rows, rtt "), 1);
}

#[tokio::test]
async fn test_empty_statement_is_dispatch_error() {
    let driver = MockDriver::new();
    let (manager, sink) = connected(&driver).await;

    let err = manager
        .query(QueryRequest::new("getUsers", "   "))
        .await
        .unwrap_err();

    assert!(matches!(err, WardenError::Dispatch(_)));
    assert_eq!(driver.total_query_calls(), 0);
    assert_eq!(sink.count_containing(" rows, rtt "), 0);
    assert_eq!(sink.lines(Level::Error).len(), 1);
    // No reconnect for a dispatch failure
    assert_eq!(driver.connect_attempts(), 1);
    assert!(manager.is_connected());
    assert_eq!(manager.outstanding_queries(), 0);
}

#[tokio::test]
async fn test_query_error_surfaces_without_reconnect() {
    let driver = MockDriver::new();
    let (manager, sink) = connected(&driver).await;
    driver
        .live_handle()
        .push_reply(Reply::Fail(WardenError::Query("relation \"nope\" does not exist".into())));

    let err = manager
        .query(QueryRequest::new("broken", "SELECT * FROM nope"))
        .await
        .unwrap_err();

    assert_eq!(err, WardenError::Query("relation \"nope\" does not exist".into()));
    assert_eq!(sink.count_containing(" rows, rtt "), 0);
    assert_eq!(driver.connect_attempts(), 1);
    assert!(manager.is_connected());

    // The handle is still usable
    manager
        .query(QueryRequest::new("fine", "SELECT 1"))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_runtime_error_rejects_outstanding_query() {
    let driver = MockDriver::new();
    driver.set_default_reply(Reply::Hang);
    let (manager, sink) = connected(&driver).await;

    let in_flight = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .query(QueryRequest::new("slow", "SELECT pg_sleep(60)"))
                .await
        })
    };
    driver.wait_for_queries(1).await;
    assert_eq!(manager.outstanding_queries(), 1);

    let error = WardenError::RuntimeHandle("terminating connection due to administrator command".into());
    driver.live_handle().emit_error(error.clone());

    let result = in_flight.await.unwrap();
    assert_eq!(result, Err(error));
    assert_eq!(manager.outstanding_queries(), 0);
    assert_eq!(sink.count_containing(" rows, rtt "), 0);

    // A later failure on the replacement handle finds nothing to reject
    eventually(|| driver.connect_attempts() == 2 && manager.is_connected()).await;
    driver
        .live_handle()
        .emit_error(WardenError::RuntimeHandle("again".into()));
    eventually(|| driver.connect_attempts() == 3 && manager.is_connected()).await;
    assert_eq!(manager.outstanding_queries(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_queries_all_rejected() {
    let driver = MockDriver::new();
    driver.set_default_reply(Reply::Hang);
    let (manager, _sink) = connected(&driver).await;

    let queries: Vec<_> = (0..3)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .query(QueryRequest::new(format!("q{}", i), "SELECT pg_sleep(60)"))
                    .await
            })
        })
        .collect();
    driver.wait_for_queries(3).await;
    assert_eq!(manager.outstanding_queries(), 3);

    let error = WardenError::RuntimeHandle("connection reset by peer".into());
    driver.live_handle().emit_error(error.clone());

    for query in queries {
        assert_eq!(query.await.unwrap(), Err(error.clone()));
    }
    assert_eq!(manager.outstanding_queries(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_query_clears_its_entry() {
    let driver = MockDriver::new();
    driver.set_default_reply(Reply::Hang);
    let (manager, _sink) = connected(&driver).await;

    let result = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        manager.query(QueryRequest::new("slow", "SELECT pg_sleep(60)")),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(manager.outstanding_queries(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_queries_use_replacement_handle() {
    let driver = MockDriver::failing_first(0);
    let (manager, _sink) = connected(&driver).await;

    driver
        .live_handle()
        .emit_error(WardenError::RuntimeHandle("reset".into()));
    eventually(|| driver.connect_attempts() == 2 && manager.is_connected()).await;

    // Queries go to the replacement handle
    manager
        .query(QueryRequest::new("after", "SELECT 1"))
        .await
        .unwrap();
    assert_eq!(driver.handles()[0].query_calls(), 0);
    assert_eq!(driver.handles()[1].query_calls(), 1);
}
