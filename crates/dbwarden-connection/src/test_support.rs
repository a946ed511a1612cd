//! Scripted driver and recording sink shared by the unit tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use dbwarden_core::{
    ClientHandle, ConnectionConfig, DatabaseDriver, DriverRows, DriverSession, HandleErrorSender,
    LogSink, Result, Value, WardenError, handle_error_channel,
};

/// What the next query on a mock handle does
#[derive(Clone)]
pub(crate) enum Reply {
    Rows(Option<DriverRows>),
    Fail(WardenError),
    /// Never completes; only a handle error can end it
    Hang,
}

pub(crate) struct MockHandle {
    replies: Mutex<VecDeque<Reply>>,
    default_reply: Reply,
    errors: Mutex<Option<HandleErrorSender>>,
    query_calls: AtomicU32,
    end_calls: AtomicU32,
    fail_end: AtomicBool,
}

impl MockHandle {
    fn new(default_reply: Reply, errors: HandleErrorSender, fail_end: bool) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply,
            errors: Mutex::new(Some(errors)),
            query_calls: AtomicU32::new(0),
            end_calls: AtomicU32::new(0),
            fail_end: AtomicBool::new(fail_end),
        }
    }

    pub(crate) fn push_reply(&self, reply: Reply) {
        self.replies.lock().push_back(reply);
    }

    /// Simulate the connection failing outside of any query
    pub(crate) fn emit_error(&self, error: WardenError) {
        if let Some(tx) = self.errors.lock().as_ref() {
            let _ = tx.send(error);
        }
    }

    /// Simulate the connection task exiting without an error value
    pub(crate) fn close(&self) {
        self.errors.lock().take();
    }

    pub(crate) fn query_calls(&self) -> u32 {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn end_calls(&self) -> u32 {
        self.end_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientHandle for MockHandle {
    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<Option<DriverRows>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());
        match reply {
            Reply::Rows(rows) => Ok(rows),
            Reply::Fail(error) => Err(error),
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn end(&self) -> Result<()> {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_end.load(Ordering::SeqCst) {
            return Err(WardenError::Io("end on a dead socket".into()));
        }
        Ok(())
    }
}

/// Driver that fails a scripted number of connects, then hands out mock handles
pub(crate) struct MockDriver {
    failures_left: AtomicU32,
    default_reply: Mutex<Reply>,
    fail_end: AtomicBool,
    attempts: Mutex<Vec<Instant>>,
    handles: Mutex<Vec<Arc<MockHandle>>>,
}

impl MockDriver {
    pub(crate) fn new() -> Arc<Self> {
        Self::failing_first(0)
    }

    /// Fail the first `failures` connects
    pub(crate) fn failing_first(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicU32::new(failures),
            default_reply: Mutex::new(Reply::Rows(Some(DriverRows::default()))),
            fail_end: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Never connect
    pub(crate) fn unreachable() -> Arc<Self> {
        Self::failing_first(u32::MAX)
    }

    /// Reply used by handles created after this call
    pub(crate) fn set_default_reply(&self, reply: Reply) {
        *self.default_reply.lock() = reply;
    }

    pub(crate) fn set_fail_end(&self, fail: bool) {
        self.fail_end.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn connect_attempts(&self) -> usize {
        self.attempts.lock().len()
    }

    pub(crate) fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }

    pub(crate) fn handles(&self) -> Vec<Arc<MockHandle>> {
        self.handles.lock().clone()
    }

    /// The most recently created handle
    pub(crate) fn live_handle(&self) -> Arc<MockHandle> {
        self.handles
            .lock()
            .last()
            .cloned()
            .expect("driver has not connected yet")
    }

    pub(crate) fn total_query_calls(&self) -> u32 {
        self.handles.lock().iter().map(|h| h.query_calls()).sum()
    }

    /// Wait until the live handle has received `count` queries
    pub(crate) async fn wait_for_queries(&self, count: u32) {
        for _ in 0..1_000 {
            if self.handles.lock().last().map(|h| h.query_calls()).unwrap_or(0) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("live handle never received {} queries", count);
    }
}

#[async_trait]
impl DatabaseDriver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self, _config: &ConnectionConfig) -> Result<DriverSession> {
        self.attempts.lock().push(Instant::now());

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(WardenError::Connect("connection refused".into()));
        }

        let (tx, rx) = handle_error_channel();
        let handle = Arc::new(MockHandle::new(
            self.default_reply.lock().clone(),
            tx,
            self.fail_end.load(Ordering::SeqCst),
        ));
        self.handles.lock().push(handle.clone());
        Ok(DriverSession::new(handle, rx))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Level {
    Info,
    Debug,
    Error,
}

/// Sink that keeps every line it is given
#[derive(Default)]
pub(crate) struct RecordingSink {
    lines: Mutex<Vec<(Level, String)>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn lines(&self, level: Level) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub(crate) fn count_containing(&self, needle: &str) -> usize {
        self.lines
            .lock()
            .iter()
            .filter(|(_, line)| line.contains(needle))
            .count()
    }
}

impl LogSink for RecordingSink {
    fn log(&self, _source: &str, message: &str) {
        self.lines.lock().push((Level::Info, message.to_string()));
    }

    fn log_debug(&self, _source: &str, message: &str, enabled: bool) {
        if enabled {
            self.lines.lock().push((Level::Debug, message.to_string()));
        }
    }

    fn log_error(&self, _source: &str, message: &str) {
        self.lines.lock().push((Level::Error, message.to_string()));
    }
}

pub(crate) fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> DriverRows {
    DriverRows::new(columns.iter().map(|c| c.to_string()).collect(), rows)
}

/// Let the runtime make progress until `condition` holds
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
