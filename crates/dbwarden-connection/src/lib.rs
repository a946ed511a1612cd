//! Resilient database connection manager
//!
//! `DbManager` keeps one live database handle per process. A background
//! supervisor connects on startup, retries failed connects on a fixed interval,
//! and reconnects immediately when the live handle reports an error. Queries go
//! through a gateway that fails fast while disconnected, times each round trip
//! and normalizes driver rows into plain records.
//!
//! # Example
//!
//! ```ignore
//! use dbwarden_connection::{QueryContext, QueryRequest, registry};
//!
//! let db = registry::get()?;
//! db.on_error(|err| tracing::warn!(%err, "database handle failed"));
//!
//! let result = db
//!     .query(
//!         QueryRequest::new("getUsers", "SELECT id, name FROM users WHERE org = $1")
//!             .bind("acme")
//!             .with_context(QueryContext::new("acme", "core", "2024")),
//!     )
//!     .await?;
//! ```

mod gateway;
mod manager;
mod pending;
pub mod registry;
mod retry;
mod state;
mod supervisor;

#[cfg(test)]
mod test_support;

pub use gateway::{QueryContext, QueryRequest};
pub use manager::{DbManager, DbManagerBuilder};
pub use registry::{ManagerFactory, ManagerRegistry};
pub use retry::{DEFAULT_RETRY_DELAY, RetryPolicy};
pub use state::ConnectionState;
pub use supervisor::{ConnectCallback, ErrorCallback};

pub use dbwarden_core::{
    ConnectionConfig, DatabaseDriver, LogSink, QueryResult, Record, Result, TracingSink, Value,
    WardenError,
};
