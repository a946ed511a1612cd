//! Connection configuration

use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::{Result, WardenError};

/// Driver settings, opaque to the connection manager.
///
/// The manager never interprets these; it keeps an immutable snapshot and hands it
/// to the driver verbatim on every connect attempt. Drivers read what they need
/// through the typed getters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionConfig {
    params: Map<String, serde_json::Value>,
}

impl ConnectionConfig {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an arbitrary JSON value, which must be an object
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(params) => Ok(Self { params }),
            other => Err(WardenError::Configuration(format!(
                "database settings must be a table, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Set a connection parameter
    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Get a raw parameter
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }

    /// Get a string parameter; numbers and booleans are rendered as text
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.params.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Get an unsigned integer parameter, accepting numeric strings
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.params.get(key)? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get port, if set and within range
    pub fn get_port(&self) -> Option<u16> {
        self.get_u64("port").and_then(|p| u16::try_from(p).ok())
    }

    /// Check whether a parameter is present
    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// Parameter names, for diagnostics that must not reveal values
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "a table",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_getters() {
        let config = ConnectionConfig::from_json(json!({
            "host": "db.internal",
            "port": "6432",
            "database": "wrms",
            "ssl": true,
        }))
        .unwrap();

        assert_eq!(config.get_string("host").as_deref(), Some("db.internal"));
        assert_eq!(config.get_port(), Some(6432));
        assert_eq!(config.get_string("ssl").as_deref(), Some("true"));
        assert_eq!(config.get_string("missing"), None);
    }

    #[test]
    fn test_port_out_of_range() {
        let config = ConnectionConfig::new().with_param("port", 70_000);
        assert_eq!(config.get_port(), None);
    }

    #[test]
    fn test_from_json_requires_object() {
        let err = ConnectionConfig::from_json(json!("postgres://localhost")).unwrap_err();
        assert!(matches!(err, WardenError::Configuration(msg) if msg.contains("a string")));
    }

    #[test]
    fn test_keys_listing() {
        let config = ConnectionConfig::new()
            .with_param("user", "app")
            .with_param("password", "secret");
        let mut keys: Vec<&str> = config.keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["password", "user"]);
    }
}
