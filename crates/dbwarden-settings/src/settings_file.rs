//! Layered settings files
//!
//! Settings are read from a config directory in three layers, each optional
//! and each either TOML or JSON:
//!
//! 1. `default.{toml,json}`
//! 2. `{env}.{toml,json}` where `env` comes from `DBWARDEN_ENV` (default `development`)
//! 3. `local.{toml,json}`
//!
//! Later layers are deep-merged over earlier ones: tables merge key by key,
//! anything else replaces the earlier value. [`Settings::load_default`] adds
//! `DBWARDEN__*` environment variables on top (`DBWARDEN__DB__HOST` sets `db.host`).

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::de::DeserializeOwned;

use dbwarden_core::{ConnectionConfig, Result, WardenError};

pub const CONFIG_DIR_ENV: &str = "DBWARDEN_CONFIG_DIR";
pub const ENVIRONMENT_ENV: &str = "DBWARDEN_ENV";
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Prefix for environment overrides, joined to the key path with `__`
pub const ENV_PREFIX: &str = "DBWARDEN";

/// Key holding the database settings handed to the driver
pub const DB_KEY: &str = "db";

const EXTENSIONS: [&str; 2] = ["toml", "json"];

/// Config directory: `$DBWARDEN_CONFIG_DIR`, or `./config`
pub fn config_dir() -> PathBuf {
    std::env::var_os(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config"))
}

/// Deployment environment name: `$DBWARDEN_ENV`, or `development`
pub fn environment() -> String {
    environment_from(ENVIRONMENT_ENV)
}

fn environment_from(var: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|env| !env.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
}

fn env_overrides(vars: Option<config::Map<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .source(vars)
}

fn build_error(err: ConfigError) -> WardenError {
    WardenError::Configuration(format!("failed to load settings: {}", err))
}

fn setting_error(key: &str, err: ConfigError) -> WardenError {
    match err {
        ConfigError::NotFound(_) => {
            WardenError::Configuration(format!("missing setting '{}'", key))
        }
        other => WardenError::Configuration(format!("invalid setting '{}': {}", key, other)),
    }
}

/// Merged settings tree
#[derive(Debug, Clone)]
pub struct Settings {
    config: Config,
    sources: Vec<PathBuf>,
}

impl Settings {
    /// Load from the default directory and environment, plus `DBWARDEN__*` overrides
    pub fn load_default() -> Result<Self> {
        Self::load_layers(&config_dir(), &environment(), Some(env_overrides(None)))
    }

    /// Load the layered files for `environment` from `dir`.
    ///
    /// A missing directory or missing layer is not an error; a malformed file is.
    pub fn load(dir: &Path, environment: &str) -> Result<Self> {
        Self::load_layers(dir, environment, None)
    }

    fn load_layers(dir: &Path, environment: &str, overrides: Option<Environment>) -> Result<Self> {
        let mut builder = Config::builder();
        let mut sources = Vec::new();

        for layer in ["default", environment, "local"] {
            let stem = dir.join(layer);
            builder = builder.add_source(File::with_name(&stem.to_string_lossy()).required(false));
            sources.extend(
                EXTENSIONS
                    .iter()
                    .map(|ext| dir.join(format!("{}.{}", layer, ext)))
                    .filter(|path| path.is_file()),
            );
        }
        if let Some(overrides) = overrides {
            builder = builder.add_source(overrides);
        }

        let config = builder.build().map_err(build_error)?;

        tracing::debug!(
            dir = %dir.display(),
            environment,
            files = sources.len(),
            "settings loaded"
        );
        Ok(Self { config, sources })
    }

    /// Build directly from a JSON table
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(Self {
            config: overlay(None, &value)?,
            sources: Vec::new(),
        })
    }

    /// Deep-merge `value` on top of the current tree
    pub fn merge(&mut self, value: serde_json::Value) -> Result<()> {
        self.config = overlay(Some(&self.config), &value)?;
        Ok(())
    }

    /// Look up and deserialize a key; dots descend into nested tables (`db.host`)
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.config.get(key).map_err(|e| setting_error(key, e))
    }

    pub fn has(&self, key: &str) -> bool {
        self.config.get::<config::Value>(key).is_ok()
    }

    /// Database settings, passed verbatim to the driver
    pub fn db(&self) -> Result<ConnectionConfig> {
        ConnectionConfig::from_json(self.get(DB_KEY)?)
    }

    /// Optional `db.retry_delay_ms` override for the reconnect cadence
    pub fn db_retry_delay_ms(&self) -> Result<Option<u64>> {
        let key = "db.retry_delay_ms";
        match self.config.get::<u64>(key) {
            Ok(delay) => Ok(Some(delay)),
            Err(ConfigError::NotFound(_)) => Ok(None),
            Err(e) => Err(setting_error(key, e)),
        }
    }

    /// Files that contributed, in merge order
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }
}

fn overlay(base: Option<&Config>, value: &serde_json::Value) -> Result<Config> {
    if !value.is_object() {
        return Err(WardenError::Configuration(
            "settings must be a table at the top level".into(),
        ));
    }

    let mut builder = Config::builder();
    if let Some(base) = base {
        builder = builder.add_source(base.clone());
    }
    builder
        .add_source(File::from_str(&value.to_string(), FileFormat::Json))
        .build()
        .map_err(build_error)
}
