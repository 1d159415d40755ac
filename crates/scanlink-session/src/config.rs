//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use scanlink_protocol::{AppInfo, DEFAULT_CAPABILITIES, MESSAGE_TIMEOUT, SWEEP_INTERVAL};

/// Default connection timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default base delay for reconnect backoff.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default ceiling on scheduled reconnect attempts.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default per-item retry ceiling in the queue.
pub const QUEUE_MAX_RETRIES: u32 = 3;

/// Default auto-drain interval.
pub const QUEUE_DRAIN_INTERVAL: Duration = Duration::from_secs(10);

/// Storage key the queue persists under.
pub const QUEUE_STORAGE_KEY: &str = "scanlink.queue";

/// Configuration for the connection manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Identity advertised in the handshake.
    pub app_info: AppInfo,
    /// Capabilities advertised in the handshake.
    pub capabilities: Vec<String>,
    /// How long a connect attempt may sit in `Connecting`.
    pub connect_timeout: Duration,
    /// How long a request may wait for an acknowledgment.
    pub message_timeout: Duration,
    /// Interval between pending-request timeout sweeps.
    pub sweep_interval: Duration,
    /// Base delay for reconnect backoff.
    pub reconnect_base_delay: Duration,
    /// Ceiling on scheduled reconnect attempts.
    pub max_reconnect_attempts: u32,
    /// Whether classified failures schedule reconnects.
    pub auto_reconnect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            app_info: AppInfo {
                app_name: "scanlink".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: DEFAULT_CAPABILITIES.iter().map(|s| s.to_string()).collect(),
            connect_timeout: CONNECT_TIMEOUT,
            message_timeout: MESSAGE_TIMEOUT,
            sweep_interval: SWEEP_INTERVAL,
            reconnect_base_delay: RECONNECT_BASE_DELAY,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            auto_reconnect: true,
        }
    }
}

/// Configuration for the transmission queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Send failures tolerated per item before it is frozen.
    pub max_retries: u32,
    /// Whether the periodic auto-drain runs.
    pub auto_retry: bool,
    /// Interval between auto-drain passes.
    pub drain_interval: Duration,
    /// Storage key the queue persists under.
    pub storage_key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            max_retries: QUEUE_MAX_RETRIES,
            auto_retry: true,
            drain_interval: QUEUE_DRAIN_INTERVAL,
            storage_key: QUEUE_STORAGE_KEY.to_string(),
        }
    }
}
