//! # admincraft-core
//!
//! Domain building blocks shared by the relay server and the binary.
//!
//! - [`auth`]: signed-token verification yielding an [`auth::Identity`]
//! - [`admission`]: command syntax validation and per-connection rate windows
//! - [`logging`]: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod admission;
pub mod auth;
pub mod logging;

pub use admission::{AdmissionError, AdmissionGate, AdmittedCommand, RateWindow};
pub use auth::{AuthError, Identity, TokenVerifier};
pub use logging::LogFormat;
