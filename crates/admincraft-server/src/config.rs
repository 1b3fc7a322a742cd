//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use admincraft_settings::AdmincraftSettings;
use serde::{Deserialize, Serialize};

/// Runtime configuration for the relay server, fixed at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// TLS mode: serve the certificate and advertise `wss`.
    pub use_tls: bool,
    /// Public certificate served at `/cert`.
    pub cert_path: PathBuf,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per connection.
    pub send_queue: usize,
    /// Output chunks buffered between a tail and its session.
    pub tail_buffer: usize,
    /// Seconds between server pings.
    pub ping_interval_secs: u64,
    /// Close a connection after this long without hearing from it.
    pub pong_timeout_secs: u64,
    /// Commands admitted per connection per second.
    pub rate_limit_per_sec: u32,
    /// Exact literal that restarts the managed process.
    pub restart_command: String,
}

impl ServerConfig {
    /// Derive the server configuration from loaded settings.
    pub fn from_settings(settings: &AdmincraftSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            use_tls: settings.server.use_tls,
            cert_path: PathBuf::from(&settings.server.cert_path),
            max_message_size: settings.server.max_message_size,
            send_queue: settings.server.send_queue,
            tail_buffer: settings.process.tail_buffer,
            ping_interval_secs: settings.server.ping_interval_secs,
            pong_timeout_secs: settings.server.pong_timeout_secs,
            rate_limit_per_sec: settings.commands.rate_limit_per_sec,
            restart_command: settings.commands.restart_command.clone(),
        }
    }

    /// URL scheme clients should use.
    pub fn scheme(&self) -> &'static str {
        if self.use_tls { "wss" } else { "ws" }
    }

    /// Ping period, never zero.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    /// Silence allowed before a connection is dropped.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            use_tls: false,
            cert_path: PathBuf::from("./certs/server.crt"),
            max_message_size: 64 * 1024,
            send_queue: 256,
            tail_buffer: 64,
            ping_interval_secs: 30,
            pong_timeout_secs: 90,
            rate_limit_per_sec: 5,
            restart_command: "admincraft restart-server".into(),
        }
    }
}
