//! Connection lifecycle states

use serde::{Deserialize, Serialize};

/// Where the supervisor is in its connect/reconnect cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No handle, or waiting out the retry delay after a failed connect
    #[default]
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// The handle is live and queries are accepted
    Connected,
    /// The live handle just failed; a reconnect follows immediately
    Errored,
}

impl ConnectionState {
    /// Only a live handle accepts queries
    pub fn accepts_queries(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Errored => "errored",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
