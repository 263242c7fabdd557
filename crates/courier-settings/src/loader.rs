//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`CourierSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `COURIER_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::CourierSettings;

/// Resolve the default settings file path (`~/.courier/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".courier").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<CourierSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or an invalid combination of
/// values is an error.
pub fn load_settings_from_path(path: &Path) -> Result<CourierSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<CourierSettings> {
    let defaults = serde_json::to_value(CourierSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: CourierSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
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

/// Apply `COURIER_*` overrides read through `env`.
///
/// Integers must parse and fall within range, booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Invalid values are
/// ignored with a warning.
fn apply_overrides(settings: &mut CourierSettings, env: impl Fn(&str) -> Option<String>) {
    let reader = EnvReader { env };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = reader.string("COURIER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = reader.u64_in("COURIER_PORT", 0, 65_535) {
        settings.server.port = u16::try_from(v).unwrap_or(settings.server.port);
    }
    if let Some(v) = reader.usize_in("COURIER_OUTBOUND_BUFFER", 1, 1_000_000) {
        settings.server.outbound_buffer = v;
    }

    // ── Delivery ────────────────────────────────────────────────────
    if let Some(v) = reader.u64_in("COURIER_BATCH_INTERVAL_MS", 1, 60_000) {
        settings.delivery.batch_interval_ms = v;
    }
    if let Some(v) = reader.usize_in("COURIER_BATCH_CAP", 1, 100_000) {
        settings.delivery.batch_cap = v;
    }
    if let Some(v) = reader.usize_in("COURIER_QUEUE_CAPACITY", 1, 10_000_000) {
        settings.delivery.queue_capacity = v;
    }

    // ── Liveness ────────────────────────────────────────────────────
    if let Some(v) = reader.u64_in("COURIER_PROBE_INTERVAL_MS", 10, 3_600_000) {
        settings.liveness.probe_interval_ms = v;
    }
    if let Some(v) = reader.u64_in("COURIER_ACK_TIMEOUT_MS", 10, 3_600_000) {
        settings.liveness.ack_timeout_ms = v;
    }
    if let Some(v) = reader.u64_in("COURIER_SWEEP_INTERVAL_MS", 10, 3_600_000) {
        settings.liveness.sweep_interval_ms = v;
    }
    if let Some(v) = reader.u64_in("COURIER_SSE_KEEPALIVE_MS", 10, 3_600_000) {
        settings.event_stream.keepalive_interval_ms = v;
    }

    // ── Collaborators ───────────────────────────────────────────────
    if let Some(v) = reader.string("COURIER_INJECTION_SECRET") {
        settings.injection.secret = Some(v);
    }
    if let Some(v) = reader.string("COURIER_WEBHOOK_URL") {
        settings.webhook.url = Some(v);
    }
    if let Some(v) = reader.u64_in("COURIER_WEBHOOK_TIMEOUT_MS", 1, 600_000) {
        settings.webhook.timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = reader.string("COURIER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = reader.bool("COURIER_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    env: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.env)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.env)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.env)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }

    fn usize_in(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.env)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}
