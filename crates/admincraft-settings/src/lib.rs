//! # admincraft-settings
//!
//! Configuration for the admincraft relay, resolved once at startup.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`AdmincraftSettings::default()`]
//! 2. **Settings file**: optional JSON file (deep-merged over defaults)
//! 3. **Environment variables**: `ADMINCRAFT_*` and `USE_SSL` overrides
//!
//! The shared token secret comes only from `SECRET_KEY`; a missing secret is
//! a startup error.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_secret, load_settings, resolve_secret, settings_path};
pub use types::*;
