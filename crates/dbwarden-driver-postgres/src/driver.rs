//! PostgreSQL driver implementation

use async_trait::async_trait;

use dbwarden_core::{ConnectionConfig, DatabaseDriver, DriverSession, Result, WardenError};

use crate::PostgresHandle;
use crate::config::PostgresParams;

/// PostgreSQL database driver
#[derive(Debug, Clone, Copy)]
pub struct PostgresDriver;

impl PostgresDriver {
    /// Create a new PostgreSQL driver instance
    pub fn new() -> Self {
        tracing::debug!("PostgreSQL driver initialized");
        Self
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    fn name(&self) -> &'static str {
        "postgres"
    }

    #[tracing::instrument(skip(self, config), fields(host = config.get_string("host").as_deref(), database = config.get_string("database").as_deref()))]
    async fn connect(&self, config: &ConnectionConfig) -> Result<DriverSession> {
        // Bad settings surface as connect failures so the supervisor keeps retrying
        let params = PostgresParams::from_config(config)
            .map_err(|e| WardenError::Connect(e.to_string()))?;

        let session = PostgresHandle::connect(&params).await.map_err(|e| {
            tracing::error!(error = %e, "failed to connect to PostgreSQL database");
            match e {
                WardenError::Connect(_) => e,
                other => WardenError::Connect(other.to_string()),
            }
        })?;

        tracing::info!(addr = %params.target(), ssl_mode = ?params.ssl_mode, "PostgreSQL connection established");
        Ok(session)
    }
}
