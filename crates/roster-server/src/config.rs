//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the Roster server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Interval between delivery-loop scans, in milliseconds.
    pub delivery_tick_ms: u64,
    /// Bound on each connection's outbound send queue.
    pub send_queue: usize,
    /// How long the handshake waits for a credentials frame, in seconds.
    pub handshake_timeout_secs: u64,
    /// Interval between server-initiated Ping frames, in seconds.
    pub ping_interval_secs: u64,
    /// Disconnect a client after this long without a Pong, in seconds.
    pub pong_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            delivery_tick_ms: 100,
            send_queue: 256,
            handshake_timeout_secs: 30,
            ping_interval_secs: 30,
            pong_timeout_secs: 90,
        }
    }
}

impl ServerConfig {
    /// Delivery tick as a `Duration`.
    pub fn delivery_tick(&self) -> Duration {
        Duration::from_millis(self.delivery_tick_ms)
    }

    /// Handshake wait bound as a `Duration`.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Ping interval as a `Duration`.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Pong timeout as a `Duration`.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}
