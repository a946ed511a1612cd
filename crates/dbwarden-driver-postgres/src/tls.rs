//! TLS connector construction for Postgres connections

use std::fs;
use std::path::Path;

use native_tls::{Certificate, Identity, TlsConnector, TlsConnectorBuilder};
use postgres_native_tls::MakeTlsConnector;
use tracing::debug;

use dbwarden_core::WardenError;

use crate::config::{PostgresParams, SslMode};

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {what} from {path}: {source}")]
    Read {
        what: &'static str,
        path: String,
        source: std::io::Error,
    },

    #[error("invalid CA certificate: {0}")]
    InvalidCaCert(String),

    #[error("invalid client identity (cert + key): {0}")]
    InvalidClientIdentity(String),

    #[error("client certificate and key must be given together")]
    IncompleteIdentity,

    #[error("TLS configuration error: {0}")]
    Build(String),
}

impl From<TlsError> for WardenError {
    fn from(err: TlsError) -> Self {
        WardenError::Connect(err.to_string())
    }
}

/// Build a connector for the given parameters.
///
/// `prefer` and `require` encrypt without verifying the server unless a CA
/// certificate is configured; `verify-ca` skips only the hostname check;
/// `verify-full` checks both.
pub fn build_connector(params: &PostgresParams) -> Result<MakeTlsConnector, TlsError> {
    let mut builder = TlsConnector::builder();

    match params.ssl_mode {
        SslMode::Disable => {}
        SslMode::Prefer | SslMode::Require => {
            if params.ssl_ca_cert.is_none() {
                builder.danger_accept_invalid_certs(true);
            }
            builder.danger_accept_invalid_hostnames(true);
        }
        SslMode::VerifyCa => {
            builder.danger_accept_invalid_hostnames(true);
        }
        SslMode::VerifyFull => {}
    }

    if let Some(path) = &params.ssl_ca_cert {
        apply_ca_cert(&mut builder, Path::new(path))?;
    }

    match (&params.ssl_client_cert, &params.ssl_client_key) {
        (Some(cert), Some(key)) => apply_client_cert(&mut builder, Path::new(cert), Path::new(key))?,
        (None, None) => {}
        _ => return Err(TlsError::IncompleteIdentity),
    }

    let connector = builder
        .build()
        .map_err(|e| TlsError::Build(e.to_string()))?;

    debug!(mode = ?params.ssl_mode, "TLS connector built");
    Ok(MakeTlsConnector::new(connector))
}

fn read(what: &'static str, path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Read {
        what,
        path: path.display().to_string(),
        source,
    })
}

fn apply_ca_cert(builder: &mut TlsConnectorBuilder, path: &Path) -> Result<(), TlsError> {
    debug!(path = %path.display(), "loading CA certificate");
    let pem = read("CA certificate", path)?;
    let cert = Certificate::from_pem(&pem).map_err(|e| TlsError::InvalidCaCert(e.to_string()))?;
    builder.add_root_certificate(cert);
    Ok(())
}

fn apply_client_cert(
    builder: &mut TlsConnectorBuilder,
    cert_path: &Path,
    key_path: &Path,
) -> Result<(), TlsError> {
    debug!(cert_path = %cert_path.display(), "loading client certificate");
    let cert = read("client certificate", cert_path)?;
    let key = read("client key", key_path)?;
    let identity = Identity::from_pkcs8(&cert, &key)
        .map_err(|e| TlsError::InvalidClientIdentity(e.to_string()))?;
    builder.identity(identity);
    Ok(())
}
