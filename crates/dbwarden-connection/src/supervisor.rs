//! Reconnect supervisor
//!
//! A single background task owns the connection lifecycle. It connects, waits
//! for the live handle to report an error, fails every outstanding query with
//! that error, and connects again. Connect failures are retried on a fixed
//! interval; handle failures reconnect immediately.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dbwarden_core::{
    ClientHandle, ConnectionConfig, DatabaseDriver, HandleErrors, LogSink, Result, WardenError,
};

use crate::pending::{PendingQueries, QueryToken, reject_all};
use crate::{ConnectionState, RetryPolicy};

const SOURCE: &str = "dbwarden::supervisor";

/// Invoked after every successful connect
pub type ConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Invoked with the error each time the live handle fails
pub type ErrorCallback = Arc<dyn Fn(&WardenError) + Send + Sync>;

#[derive(Default, Clone)]
pub(crate) struct Callbacks {
    pub(crate) on_connect: Option<ConnectCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
}

/// Everything guarded by the single state lock.
///
/// `connected` is true exactly when `handle` is the live connection and no
/// handle error has been observed since it was installed.
#[derive(Default)]
pub(crate) struct Slot {
    handle: Option<Arc<dyn ClientHandle>>,
    connected: bool,
    state: ConnectionState,
    pending: PendingQueries,
}

/// State shared between the supervisor task and the query gateway
pub(crate) struct Shared {
    slot: Mutex<Slot>,
    callbacks: Mutex<Callbacks>,
    state_tx: watch::Sender<ConnectionState>,
    pub(crate) sink: Arc<dyn LogSink>,
}

/// A query admitted by the gateway: the handle to run on and the channel that
/// fires if that handle fails first
pub(crate) struct Admission {
    pub(crate) handle: Arc<dyn ClientHandle>,
    pub(crate) token: QueryToken,
    pub(crate) aborted: oneshot::Receiver<WardenError>,
}

impl Shared {
    pub(crate) fn new(sink: Arc<dyn LogSink>, callbacks: Callbacks) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            slot: Mutex::new(Slot::default()),
            callbacks: Mutex::new(callbacks),
            state_tx,
            sink,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.slot.lock().state
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.slot.lock().connected
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.slot.lock().pending.len()
    }

    pub(crate) fn set_on_connect(&self, callback: ConnectCallback) {
        self.callbacks.lock().on_connect = Some(callback);
    }

    pub(crate) fn set_on_error(&self, callback: ErrorCallback) {
        self.callbacks.lock().on_error = Some(callback);
    }

    /// Admit a query against the live handle.
    ///
    /// The connected check and the pending registration happen under one lock,
    /// so a query is either refused or guaranteed to see the next handle error.
    pub(crate) fn admit(&self) -> Result<Admission> {
        let mut slot = self.slot.lock();
        let handle = match (&slot.handle, slot.connected) {
            (Some(handle), true) => handle.clone(),
            _ => return Err(WardenError::NotConnected),
        };
        let (token, aborted) = slot.pending.register();
        Ok(Admission {
            handle,
            token,
            aborted,
        })
    }

    pub(crate) fn settle(&self, token: QueryToken) {
        self.slot.lock().pending.remove(token);
    }

    fn set_state(&self, slot: &mut Slot, state: ConnectionState) {
        slot.state = state;
        self.state_tx.send_replace(state);
    }

    fn transition(&self, state: ConnectionState) {
        let mut slot = self.slot.lock();
        self.set_state(&mut slot, state);
    }

    fn install(&self, handle: Arc<dyn ClientHandle>) {
        let mut slot = self.slot.lock();
        slot.handle = Some(handle);
        slot.connected = true;
        self.set_state(&mut slot, ConnectionState::Connected);
    }

    fn take_handle(&self) -> Option<Arc<dyn ClientHandle>> {
        let mut slot = self.slot.lock();
        slot.connected = false;
        slot.handle.take()
    }

    /// Mark the live handle failed and hand back every query waiting on it
    fn fail_handle(&self) -> Vec<oneshot::Sender<WardenError>> {
        let mut slot = self.slot.lock();
        slot.connected = false;
        self.set_state(&mut slot, ConnectionState::Errored);
        slot.pending.drain()
    }

    fn callbacks(&self) -> Callbacks {
        self.callbacks.lock().clone()
    }
}

/// The background reconnect loop
pub(crate) struct Supervisor {
    driver: Arc<dyn DatabaseDriver>,
    config: Arc<ConnectionConfig>,
    retry: RetryPolicy,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub(crate) fn new(
        driver: Arc<dyn DatabaseDriver>,
        config: Arc<ConnectionConfig>,
        retry: RetryPolicy,
        shared: Arc<Shared>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            driver,
            config,
            retry,
            shared,
            shutdown,
        }
    }

    /// Start the loop on the current runtime.
    ///
    /// Nothing connects until `start` fires (or its sender is dropped), and the
    /// first attempt then waits one more scheduler turn. On a current-thread
    /// runtime that lets callbacks attached right after construction see the
    /// first connect; on a multi-thread runtime only builder callbacks are
    /// guaranteed to.
    pub(crate) fn spawn(self, start: oneshot::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let _ = start.await;
            tokio::task::yield_now().await;
            self.run().await;
        })
    }

    async fn run(self) {
        tracing::debug!(driver = self.driver.name(), "supervisor started");

        loop {
            let session = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                session = self.connect_once() => session,
            };

            match session {
                Some(mut errors) => {
                    let error = tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        error = errors.recv() => error.unwrap_or_else(|| {
                            WardenError::RuntimeHandle("connection closed".into())
                        }),
                    };
                    self.handle_runtime_error(error);
                }
                None => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.retry.delay()) => {}
                    }
                }
            }
        }

        self.release_handle().await;
        self.shared.transition(ConnectionState::Disconnected);
        tracing::debug!(driver = self.driver.name(), "supervisor stopped");
    }

    /// One connect attempt. Returns the handle's error subscription on success.
    async fn connect_once(&self) -> Option<HandleErrors> {
        self.release_handle().await;
        self.shared.transition(ConnectionState::Connecting);

        match self.driver.connect(&self.config).await {
            Ok(session) => {
                self.shared.install(session.handle);
                if let Some(on_connect) = self.shared.callbacks().on_connect {
                    on_connect();
                }
                self.shared.sink.log(SOURCE, "Connected to database");
                Some(session.errors)
            }
            Err(error) => {
                self.shared
                    .sink
                    .log_error(SOURCE, &format!("Couldn't connect to database - {}", error));
                self.shared.transition(ConnectionState::Disconnected);
                None
            }
        }
    }

    fn handle_runtime_error(&self, error: WardenError) {
        let waiting = self.shared.fail_handle();

        self.shared
            .sink
            .log_error(SOURCE, &format!("Database connection error - {}", error));
        if let Some(on_error) = self.shared.callbacks().on_error {
            on_error(&error);
        }

        let rejected = reject_all(waiting, &error);
        if rejected > 0 {
            tracing::debug!(rejected, "failed outstanding queries after handle error");
        }
    }

    /// Best-effort release of the previous handle; failures are ignored
    async fn release_handle(&self) {
        if let Some(handle) = self.shared.take_handle() {
            if let Err(error) = handle.end().await {
                tracing::debug!(%error, "ignoring error while releasing connection");
            }
        }
    }
}
