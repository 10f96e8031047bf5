//! Session configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::{duration_secs, duration_secs_opt};

/// Tunables for one orchestration session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to wait for the socket to open
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Interval between socket keepalives; disabled when unset
    #[serde(with = "duration_secs_opt", skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<Duration>,

    /// Connect with `wss` instead of `ws`
    pub secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            heartbeat_interval: None,
            secure: false,
        }
    }
}

impl SessionConfig {
    /// URL scheme for the socket
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }
}
