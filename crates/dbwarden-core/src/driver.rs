//! Database driver capability

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::{ConnectionConfig, DriverRows, Result, Value, WardenError};

/// Receiving end of a handle's error notifications.
///
/// A driver sends on the paired sender whenever the live connection fails outside
/// of any particular query (socket reset, server shutdown, protocol error). The
/// channel closing is treated the same as an error: the handle is gone.
pub type HandleErrors = mpsc::UnboundedReceiver<WardenError>;

/// Sending end handed to the driver's background connection task
pub type HandleErrorSender = mpsc::UnboundedSender<WardenError>;

/// Create a connected error-notification pair
pub fn handle_error_channel() -> (HandleErrorSender, HandleErrors) {
    mpsc::unbounded_channel()
}

/// A live connection to the database.
///
/// Handles are replaced wholesale on reconnect and never repaired in place.
#[async_trait]
pub trait ClientHandle: Send + Sync {
    /// Run a statement with positional parameters.
    ///
    /// `Ok(None)` means the driver produced no data object at all; callers treat
    /// that as an empty row set.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Option<DriverRows>>;

    /// Release the connection. Called at most once, best-effort.
    async fn end(&self) -> Result<()>;
}

/// An established connection together with its error-notification subscription
pub struct DriverSession {
    pub handle: Arc<dyn ClientHandle>,
    pub errors: HandleErrors,
}

impl DriverSession {
    pub fn new(handle: Arc<dyn ClientHandle>, errors: HandleErrors) -> Self {
        Self { handle, errors }
    }
}

/// Factory for live handles
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Unique identifier for this driver (e.g., "postgres")
    fn name(&self) -> &'static str;

    /// Open a new connection using the given settings.
    ///
    /// Failures are reported as `WardenError::Connect`.
    async fn connect(&self, config: &ConnectionConfig) -> Result<DriverSession>;
}

#[async_trait]
impl<T: DatabaseDriver + ?Sized> DatabaseDriver for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<DriverSession> {
        (**self).connect(config).await
    }
}
