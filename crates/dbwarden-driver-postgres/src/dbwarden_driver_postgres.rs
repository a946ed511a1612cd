//! PostgreSQL driver implementation

mod config;
mod connection;
mod driver;
mod tls;
mod value;
mod wire;

pub use config::{PostgresParams, SslMode};
pub use connection::PostgresHandle;
pub use driver::PostgresDriver;
pub use tls::{TlsError, build_connector};
