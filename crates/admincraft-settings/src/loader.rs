//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`AdmincraftSettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate values the runtime cannot work with
//!
//! The token secret is never read from the settings file; see [`load_secret`].

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::AdmincraftSettings;

/// Environment variable holding the shared token secret.
pub const SECRET_ENV: &str = "SECRET_KEY";

/// Environment variable pointing at an optional settings file.
pub const CONFIG_ENV: &str = "ADMINCRAFT_CONFIG";

/// Settings file path from `ADMINCRAFT_CONFIG`, if set.
pub fn settings_path() -> Option<PathBuf> {
    read_env_string(CONFIG_ENV).map(PathBuf::from)
}

/// Load settings from an optional file with env var overrides.
pub fn load_settings(path: Option<&Path>) -> Result<AdmincraftSettings> {
    let defaults = serde_json::to_value(AdmincraftSettings::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut settings: AdmincraftSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut AdmincraftSettings) {
    apply_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides using `lookup` as the variable source.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_overrides_with(
    settings: &mut AdmincraftSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = string("ADMINCRAFT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = string("ADMINCRAFT_PORT") {
        if let Some(port) = checked("ADMINCRAFT_PORT", &v, |s| parse_u16_range(s, 1, 65535)) {
            settings.server.port = port;
        }
    }
    if let Some(v) = string("USE_SSL") {
        if let Some(flag) = checked("USE_SSL", &v, parse_bool) {
            settings.server.use_tls = flag;
        }
    }
    if let Some(v) = string("ADMINCRAFT_CERT_PATH") {
        settings.server.cert_path = v;
    }

    // ── Commands ────────────────────────────────────────────────────
    if let Some(v) = string("ADMINCRAFT_RATE_LIMIT") {
        if let Some(n) = checked("ADMINCRAFT_RATE_LIMIT", &v, |s| parse_u32_range(s, 1, 1000)) {
            settings.commands.rate_limit_per_sec = n;
        }
    }

    // ── Process ─────────────────────────────────────────────────────
    if let Some(v) = string("ADMINCRAFT_CONTAINER") {
        settings.process.container = v;
    }
    if let Some(v) = string("ADMINCRAFT_DOCKER_BIN") {
        settings.process.docker_bin = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("ADMINCRAFT_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

fn checked<T>(name: &str, value: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let result = parse(value);
    if result.is_none() {
        tracing::warn!(key = name, value, "invalid env var, ignoring");
    }
    result
}

/// Reject values that would make the runtime misbehave.
pub fn validate(settings: &AdmincraftSettings) -> Result<()> {
    if settings.server.send_queue == 0 {
        return Err(SettingsError::InvalidValue("server.sendQueue must be at least 1".into()));
    }
    if settings.server.ping_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "server.pingIntervalSecs must be at least 1".into(),
        ));
    }
    if settings.process.tail_buffer == 0 {
        return Err(SettingsError::InvalidValue("process.tailBuffer must be at least 1".into()));
    }
    if settings.commands.rate_limit_per_sec == 0 {
        return Err(SettingsError::InvalidValue(
            "commands.rateLimitPerSec must be at least 1".into(),
        ));
    }
    if settings.process.container.is_empty() {
        return Err(SettingsError::InvalidValue("process.container is empty".into()));
    }
    if settings.commands.restart_command.is_empty() {
        return Err(SettingsError::InvalidValue("commands.restartCommand is empty".into()));
    }
    Ok(())
}

/// Read the shared token secret from `SECRET_KEY`.
pub fn load_secret() -> Result<SecretString> {
    resolve_secret(std::env::var(SECRET_ENV).ok())
}

/// Turn a raw secret value into a [`SecretString`], rejecting absent or empty values.
pub fn resolve_secret(raw: Option<String>) -> Result<SecretString> {
    match raw {
        Some(value) if !value.is_empty() => Ok(SecretString::from(value)),
        _ => Err(SettingsError::MissingSecret(SECRET_ENV)),
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
