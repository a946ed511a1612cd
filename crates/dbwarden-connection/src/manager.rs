//! The connection manager handle
//!
//! A `DbManager` owns one supervised connection and exposes the query gateway
//! over it. Clones share the same connection; the supervisor stops when the
//! last clone is dropped.

use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use dbwarden_core::{
    ConnectionConfig, DatabaseDriver, LogSink, QueryResult, Result, TracingSink, Value,
    WardenError,
};

use crate::gateway::{self, QueryContext, QueryRequest};
use crate::supervisor::{Callbacks, ConnectCallback, ErrorCallback, Shared, Supervisor};
use crate::{ConnectionState, RetryPolicy};

struct ManagerInner {
    shared: Arc<Shared>,
    config: Arc<ConnectionConfig>,
    driver_name: &'static str,
    shutdown: CancellationToken,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Resilient connection manager.
///
/// Construction never connects synchronously: the first attempt is scheduled
/// on the runtime and retried until it succeeds. Queries issued before then
/// fail fast with [`WardenError::NotConnected`].
///
/// On a multi-thread runtime the first connect can complete before a callback
/// registered with [`DbManager::on_connect`] after construction is in place;
/// pass callbacks that must see every connect to [`DbManagerBuilder`] instead.
///
/// # Example
///
/// ```ignore
/// let manager = DbManager::new(PostgresDriver::new(), settings.db()?)?;
/// manager.on_connect(|| tracing::info!("ready"));
///
/// let users = manager
///     .query(QueryRequest::new("getUsers", "SELECT id FROM users WHERE org = $1").bind("acme"))
///     .await?;
/// ```
#[derive(Clone)]
pub struct DbManager {
    inner: Arc<ManagerInner>,
}

impl DbManager {
    /// Create a manager with the default retry policy and tracing sink.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<D>(driver: D, config: ConnectionConfig) -> Result<Self>
    where
        D: DatabaseDriver + 'static,
    {
        Self::builder(driver, config).build()
    }

    /// Configure callbacks, logging and retry cadence before the supervisor starts
    pub fn builder<D>(driver: D, config: ConnectionConfig) -> DbManagerBuilder
    where
        D: DatabaseDriver + 'static,
    {
        DbManagerBuilder::new(Arc::new(driver), config)
    }

    /// Run a query against the live connection
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResult> {
        gateway::execute(&self.inner.shared, request).await
    }

    /// Positional form of [`DbManager::query`]
    pub async fn query_with(
        &self,
        name: &str,
        sql: &str,
        params: Vec<Value>,
        context: Option<QueryContext>,
    ) -> Result<QueryResult> {
        let mut request = QueryRequest::new(name, sql).with_params(params);
        request.context = context;
        self.query(request).await
    }

    /// Register the connect callback, replacing any previous one
    pub fn on_connect<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.shared.set_on_connect(Arc::new(callback));
    }

    /// Register the runtime-error callback, replacing any previous one
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&WardenError) + Send + Sync + 'static,
    {
        self.inner.shared.set_on_error(Arc::new(callback));
    }

    pub fn is_connected(&self) -> bool {
        self.inner.shared.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.state()
    }

    /// Watch lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.subscribe()
    }

    /// Resolve once the manager reaches `Connected`
    pub async fn wait_until_connected(&self) {
        let mut states = self.subscribe_state();
        // The sender lives as long as `self`, so this only ends on a state match
        let _ = states.wait_for(|state| state.accepts_queries()).await;
    }

    pub fn driver_name(&self) -> &'static str {
        self.inner.driver_name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// True when both handles refer to the same underlying manager
    pub fn ptr_eq(&self, other: &DbManager) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[cfg(test)]
    pub(crate) fn outstanding_queries(&self) -> usize {
        self.inner.shared.pending_len()
    }
}

impl std::fmt::Debug for DbManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbManager")
            .field("driver", &self.inner.driver_name)
            .field("state", &self.state())
            .finish()
    }
}

/// Builder for [`DbManager`]
pub struct DbManagerBuilder {
    driver: Arc<dyn DatabaseDriver>,
    config: ConnectionConfig,
    retry: RetryPolicy,
    sink: Arc<dyn LogSink>,
    callbacks: Callbacks,
}

impl DbManagerBuilder {
    fn new(driver: Arc<dyn DatabaseDriver>, config: ConnectionConfig) -> Self {
        Self {
            driver,
            config,
            retry: RetryPolicy::default(),
            sink: Arc::new(TracingSink),
            callbacks: Callbacks::default(),
        }
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_connect = Some(Arc::new(callback) as ConnectCallback);
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&WardenError) + Send + Sync + 'static,
    {
        self.callbacks.on_error = Some(Arc::new(callback) as ErrorCallback);
        self
    }

    /// Start the supervisor and return the manager
    pub fn build(self) -> Result<DbManager> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(WardenError::Configuration(
                "DbManager must be created inside a tokio runtime".into(),
            ));
        }

        let driver_name = self.driver.name();
        let config = Arc::new(self.config);
        let shared = Arc::new(Shared::new(self.sink, self.callbacks));
        let shutdown = CancellationToken::new();
        let (start, started) = oneshot::channel();

        Supervisor::new(
            self.driver,
            config.clone(),
            self.retry,
            shared.clone(),
            shutdown.clone(),
        )
        .spawn(started);

        tracing::debug!(driver = driver_name, "connection manager created");

        let manager = DbManager {
            inner: Arc::new(ManagerInner {
                shared,
                config,
                driver_name,
                shutdown,
            }),
        };
        let _ = start.send(());
        Ok(manager)
    }
}
