//! dbwarden core - shared abstractions for the resilient connection manager
//!
//! This crate provides the seams every other dbwarden crate builds on:
//!
//! - `DatabaseDriver` / `ClientHandle` - the driver capability (connect, query, end,
//!   runtime error notification)
//! - `ConnectionConfig` - the opaque settings object handed verbatim to a driver
//! - `LogSink` - where the manager writes its structured log lines
//! - `Value`, `Record`, `QueryResult` - plain result data, free of driver row types
//! - `WardenError` - the error taxonomy

mod config;
mod driver;
mod error;
mod log;
mod types;

pub use config::*;
pub use driver::*;
pub use error::*;
pub use log::*;
pub use types::*;
