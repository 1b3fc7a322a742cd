//! Settings types with compiled defaults.

use admincraft_core::LogFormat;
use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdmincraftSettings {
    /// Listener and transport settings.
    pub server: ServerSettings,
    /// Command admission and execution settings.
    pub commands: CommandSettings,
    /// Managed process (container) settings.
    pub process: ProcessSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// Listener and transport settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listening port.
    pub port: u16,
    /// Whether TLS mode is on. TLS itself terminates upstream; this toggles
    /// certificate distribution and the advertised scheme.
    pub use_tls: bool,
    /// Public certificate served at `/cert` in TLS mode.
    pub cert_path: String,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per connection.
    pub send_queue: usize,
    /// Seconds between server pings.
    pub ping_interval_secs: u64,
    /// Close a connection after this many seconds without a pong.
    pub pong_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            use_tls: false,
            cert_path: "./certs/server.crt".to_string(),
            max_message_size: 64 * 1024,
            send_queue: 256,
            ping_interval_secs: 30,
            pong_timeout_secs: 90,
        }
    }
}

/// Command admission and execution settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandSettings {
    /// Commands admitted per connection per second.
    pub rate_limit_per_sec: u32,
    /// Exact literal that restarts the managed process.
    pub restart_command: String,
    /// One-shot command timeout in seconds.
    pub exec_timeout_secs: u64,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            rate_limit_per_sec: 5,
            restart_command: "admincraft restart-server".to_string(),
            exec_timeout_secs: 30,
        }
    }
}

/// Managed process settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessSettings {
    /// Path or name of the docker CLI.
    pub docker_bin: String,
    /// Container running the managed server.
    pub container: String,
    /// Chunks buffered between a log tail and its session.
    pub tail_buffer: usize,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            container: "minecraft".to_string(),
            tail_buffer: 64,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Line format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
