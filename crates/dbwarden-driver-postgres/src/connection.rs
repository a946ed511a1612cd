//! PostgreSQL client handle

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use postgres_types::ToSql;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::{Client, NoTls, Socket};

use dbwarden_core::{
    ClientHandle, DriverRows, DriverSession, HandleErrorSender, Result, Value, WardenError,
    handle_error_channel,
};

use crate::config::PostgresParams;
use crate::tls::build_connector;
use crate::value::{PgParam, driver_rows};

/// Render a server error with its detail, hint and SQLSTATE
pub(crate) fn format_postgres_error(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let mut message = db_error.message().to_string();
    let extras = [
        ("detail", db_error.detail()),
        ("hint", db_error.hint()),
        ("column", db_error.column()),
    ];
    for (label, value) in extras {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            message.push_str(&format!(" ({}: {})", label, value));
        }
    }

    format!("{} (code: {})", message, db_error.code().code())
}

/// Map a tokio-postgres error from a query.
///
/// A closed connection is a handle-level failure; anything else is the
/// statement's own problem and leaves the handle usable.
fn query_error(error: tokio_postgres::Error) -> WardenError {
    if error.is_closed() {
        WardenError::RuntimeHandle(error.to_string())
    } else {
        WardenError::Query(format_postgres_error(&error))
    }
}

/// One live connection. `end` drops the client, which closes the socket and
/// lets the background connection task finish.
pub struct PostgresHandle {
    client: Mutex<Option<Arc<Client>>>,
}

impl PostgresHandle {
    /// Connect and spawn the task that drives the connection, forwarding its
    /// failure (or clean exit) to the returned session's error channel
    pub async fn connect(params: &PostgresParams) -> Result<DriverSession> {
        let pg = params.to_pg_config()?;
        let (errors_tx, errors) = handle_error_channel();

        let client = if params.ssl_mode.uses_tls() {
            let tls = build_connector(params)?;
            Self::open(&pg, tls, errors_tx).await?
        } else {
            Self::open(&pg, NoTls, errors_tx).await?
        };

        let handle = Arc::new(Self {
            client: Mutex::new(Some(Arc::new(client))),
        });
        Ok(DriverSession::new(handle, errors))
    }

    async fn open<T>(
        pg: &tokio_postgres::Config,
        tls: T,
        errors: HandleErrorSender,
    ) -> Result<Client>
    where
        T: MakeTlsConnect<Socket> + Send + 'static,
        T::Stream: Send + 'static,
        T::TlsConnect: Send,
        <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
    {
        let (client, connection) = pg
            .connect(tls)
            .await
            .map_err(|e| WardenError::Connect(format_postgres_error(&e)))?;

        tokio::spawn(async move {
            match connection.await {
                Ok(()) => tracing::debug!("postgres connection closed"),
                Err(e) => {
                    tracing::error!(error = %e, "postgres connection error");
                    let _ = errors.send(WardenError::RuntimeHandle(format_postgres_error(&e)));
                }
            }
            // Dropping `errors` closes the channel, which the supervisor also treats as a failure
        });

        Ok(client)
    }

    fn client(&self) -> Result<Arc<Client>> {
        self.client
            .lock()
            .clone()
            .ok_or_else(|| WardenError::Dispatch("connection has been released".into()))
    }
}

#[async_trait]
impl ClientHandle for PostgresHandle {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Option<DriverRows>> {
        let client = self.client()?;
        let statement = client.prepare(sql).await.map_err(query_error)?;

        let expected = statement.params().len();
        if expected != params.len() {
            return Err(WardenError::Dispatch(format!(
                "statement expects {} parameters, got {}",
                expected,
                params.len()
            )));
        }

        let bound: Vec<PgParam> = params
            .iter()
            .zip(statement.params())
            .map(|(value, ty)| PgParam::for_type(value, ty))
            .collect::<Result<_>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let rows = client.query(&statement, &refs).await.map_err(query_error)?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        Ok(Some(driver_rows(columns, &rows)?))
    }

    async fn end(&self) -> Result<()> {
        if self.client.lock().take().is_some() {
            tracing::debug!("released postgres client");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_after_end_is_dispatch_error() {
        let handle = PostgresHandle {
            client: Mutex::new(None),
        };
        let err = handle.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, WardenError::Dispatch(_)));
        handle.end().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connect_error() {
        let params = PostgresParams {
            host: "127.0.0.1".into(),
            port: 1,
            ssl_mode: crate::config::SslMode::Disable,
            connect_timeout: Some(std::time::Duration::from_secs(2)),
            ..PostgresParams::default()
        };
        let err = PostgresHandle::connect(&params).await.err().unwrap();
        assert!(matches!(err, WardenError::Connect(_)));
    }
}
