//! WebSocket connection management, session registry, and session lifecycle.

pub mod connection;
pub mod registry;
pub mod session;
