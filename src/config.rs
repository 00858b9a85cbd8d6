use crate::signal::ShutdownSignal;

use serde::Deserialize;
use std::env;
use std::fs;
use std::io::{Error, ErrorKind};
use std::time::Duration;

/// Environment variable overriding the drain timeout (seconds, `0` = unbounded)
pub const ENV_DRAIN_TIMEOUT: &str = "SIGDRAIN_DRAIN_TIMEOUT";
/// Environment variable overriding hook panic isolation (`true`/`false`/`1`/`0`)
pub const ENV_ISOLATE_HOOK_PANICS: &str = "SIGDRAIN_ISOLATE_HOOK_PANICS";

/// Shutdown coordinator settings
///
/// # File Format
/// A single JSON object, every field optional:
/// ```text
/// {"drain_timeout_secs": 30, "isolate_hook_panics": true, "signals": ["SIGTERM", "SIGINT"]}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShutdownConfig {
    /// Upper bound on the drain wait; `None` waits for as long as work is in flight
    pub drain_timeout_secs: Option<u64>,
    /// Catch panics from shutdown hooks instead of unwinding into the caller
    pub isolate_hook_panics: bool,
    /// Signal names that start a shutdown ("SIGINT", "SIGTERM")
    pub signals: Vec<String>,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: None,
            isolate_hook_panics: true,
            signals: vec!["SIGTERM".to_string(), "SIGINT".to_string()],
        }
    }
}

impl ShutdownConfig {
    /// Reads a JSON config file and validates it
    ///
    /// # Errors
    /// - File not found or unreadable
    /// - Invalid JSON or unknown fields
    /// - Unknown or empty signal list
    pub fn from_file(filename: &str) -> Result<Self, Error> {
        let raw = fs::read_to_string(filename)?;
        let config: ShutdownConfig = serde_json::from_str(&raw).map_err(|e| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("invalid JSON in {} on line {}: {}", filename, e.line(), e),
            )
        })?;
        config.shutdown_signals()?;
        Ok(config)
    }

    /// Applies `SIGDRAIN_*` environment overrides on top of this config
    pub fn apply_env(mut self) -> Result<Self, Error> {
        if let Ok(value) = env::var(ENV_DRAIN_TIMEOUT) {
            let secs: u64 = value.trim().parse().map_err(|_| {
                Error::new(
                    ErrorKind::InvalidInput,
                    format!("{} must be a number of seconds, got {:?}", ENV_DRAIN_TIMEOUT, value),
                )
            })?;
            self.drain_timeout_secs = if secs == 0 { None } else { Some(secs) };
        }

        if let Ok(value) = env::var(ENV_ISOLATE_HOOK_PANICS) {
            self.isolate_hook_panics = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(Error::new(
                        ErrorKind::InvalidInput,
                        format!("{} must be true or false, got {:?}", ENV_ISOLATE_HOOK_PANICS, value),
                    ))
                }
            };
        }

        Ok(self)
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_secs.map(Duration::from_secs)
    }

    /// Resolves the configured signal names, dropping duplicates
    pub fn shutdown_signals(&self) -> Result<Vec<ShutdownSignal>, Error> {
        if self.signals.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "at least one shutdown signal must be configured",
            ));
        }

        let mut kinds = Vec::with_capacity(self.signals.len());
        for name in &self.signals {
            let kind = ShutdownSignal::from_name(name).ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidInput,
                    format!("unsupported shutdown signal {:?} (expected SIGINT or SIGTERM)", name),
                )
            })?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(kinds)
    }
}
