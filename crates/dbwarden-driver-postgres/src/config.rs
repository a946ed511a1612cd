//! Connection parameters read from the opaque `db` settings object

use std::str::FromStr;
use std::time::Duration;

use dbwarden_core::{ConnectionConfig, Result, WardenError};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;
const DEFAULT_DATABASE: &str = "postgres";

/// TLS negotiation mode, following libpq's `sslmode` names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn uses_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    pub(crate) fn to_pg(self) -> tokio_postgres::config::SslMode {
        use tokio_postgres::config::SslMode as Pg;
        match self {
            SslMode::Disable => Pg::Disable,
            SslMode::Prefer => Pg::Prefer,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => Pg::Require,
        }
    }
}

impl FromStr for SslMode {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "allow" | "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" | "verify_ca" => Ok(SslMode::VerifyCa),
            "verify-full" | "verify_full" => Ok(SslMode::VerifyFull),
            other => Err(WardenError::Configuration(format!(
                "unknown ssl_mode '{}'",
                other
            ))),
        }
    }
}

/// Parsed Postgres connection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PostgresParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: SslMode,
    pub ssl_ca_cert: Option<String>,
    pub ssl_client_cert: Option<String>,
    pub ssl_client_key: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub application_name: Option<String>,
    /// `postgres://` URL or key/value connection string; overrides host/port/database/user/password
    pub url: Option<String>,
}

impl Default for PostgresParams {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE.to_string(),
            user: None,
            password: None,
            ssl_mode: SslMode::default(),
            ssl_ca_cert: None,
            ssl_client_cert: None,
            ssl_client_key: None,
            connect_timeout: None,
            application_name: None,
            url: None,
        }
    }
}

impl PostgresParams {
    /// Read parameters from the settings object, applying defaults for anything missing
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        let defaults = Self::default();
        let ssl_mode = match config.get_string("ssl_mode") {
            Some(mode) => mode.parse()?,
            None => defaults.ssl_mode,
        };
        let port = match config.get("port") {
            Some(_) => config.get_port().ok_or_else(|| {
                WardenError::Configuration("port must be a number between 1 and 65535".into())
            })?,
            None => defaults.port,
        };

        Ok(Self {
            host: config.get_string("host").unwrap_or(defaults.host),
            port,
            database: config
                .get_string("database")
                .or_else(|| config.get_string("dbname"))
                .unwrap_or(defaults.database),
            user: config
                .get_string("user")
                .or_else(|| config.get_string("username")),
            password: config.get_string("password"),
            ssl_mode,
            ssl_ca_cert: non_empty(config.get_string("ssl_ca_cert")),
            ssl_client_cert: non_empty(config.get_string("ssl_client_cert")),
            ssl_client_key: non_empty(config.get_string("ssl_client_key")),
            connect_timeout: config
                .get_u64("connect_timeout_ms")
                .map(Duration::from_millis),
            application_name: config.get_string("application_name"),
            url: non_empty(
                config
                    .get_string("url")
                    .or_else(|| config.get_string("connection_string")),
            ),
        })
    }

    /// Build the tokio-postgres configuration
    pub fn to_pg_config(&self) -> Result<tokio_postgres::Config> {
        let mut pg = match &self.url {
            Some(url) => url.parse::<tokio_postgres::Config>().map_err(|e| {
                WardenError::Configuration(format!("invalid connection string: {}", e))
            })?,
            None => {
                let mut pg = tokio_postgres::Config::new();
                pg.host(&self.host).port(self.port).dbname(&self.database);
                if let Some(user) = &self.user {
                    pg.user(user);
                }
                if let Some(password) = &self.password {
                    pg.password(password);
                }
                pg
            }
        };

        pg.ssl_mode(self.ssl_mode.to_pg());
        if let Some(timeout) = self.connect_timeout {
            pg.connect_timeout(timeout);
        }
        if let Some(name) = &self.application_name {
            pg.application_name(name);
        }
        Ok(pg)
    }

    /// `host:port/database` for log fields; never includes credentials
    pub fn target(&self) -> String {
        if self.url.is_some() {
            return "<connection string>".to_string();
        }
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
