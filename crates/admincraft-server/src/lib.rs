//! # admincraft-server
//!
//! Authenticated WebSocket relay for a managed process.
//!
//! - Per-connection token verification before any subprocess is started
//! - One log-tail subprocess per session, streamed to that client in order
//! - Inbound commands validated and rate-limited, then executed out-of-band
//! - Clean command results broadcast to every streaming session
//! - Health, Prometheus metrics, and certificate download endpoints
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod cert;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod metrics;
pub mod process;
pub mod server;
pub mod shutdown;
pub mod streamer;
pub mod websocket;

pub use config::ServerConfig;
pub use error::ServerError;
pub use process::{DockerProcess, ManagedProcess};
pub use server::RelayServer;
