use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::buffer::{RetentionPolicy, MAX_RECEIVED_MESSAGES, RECEIVED_TRIM_COUNT};
use crate::error::ConfigError;
use crate::merge::DEFAULT_DEDUP_WINDOW_MS;

// Default timings
pub const DEFAULT_SUCCESS_CLEANUP_DELAY_MS: u64 = 1000;
pub const DEFAULT_FAILURE_RECHECK_DELAY_MS: u64 = 2000;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;
pub const DEFAULT_STATUS_MAX_AGE_SECS: u64 = 4;

/// User-editable settings, stored as JSON.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Time tolerance for treating two records as the same message
    pub dedup_window_ms: u64,
    /// Delay between a send acknowledgement and dropping the optimistic entry
    pub success_cleanup_delay_ms: u64,
    /// Delay between a send failure and the delivered-anyway re-check
    pub failure_recheck_delay_ms: u64,
    pub send_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    /// Live messages kept per room before trimming
    pub max_received: usize,
    pub trim_count: usize,
    /// How long a status toast stays before it is purged
    pub status_max_age_secs: u64,
    /// host:port of the line-delimited JSON live endpoint
    pub live_endpoint: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS as u64,
            success_cleanup_delay_ms: DEFAULT_SUCCESS_CLEANUP_DELAY_MS,
            failure_recheck_delay_ms: DEFAULT_FAILURE_RECHECK_DELAY_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_received: MAX_RECEIVED_MESSAGES,
            trim_count: RECEIVED_TRIM_COUNT,
            status_max_age_secs: DEFAULT_STATUS_MAX_AGE_SECS,
            live_endpoint: None,
        }
    }
}

/// Settings resolved into the types the engine works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub dedup_window: chrono::Duration,
    pub success_cleanup_delay: Duration,
    pub failure_recheck_delay: Duration,
    pub send_timeout: Duration,
    pub reconnect_delay: Duration,
    pub retention: RetentionPolicy,
    pub status_max_age: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Settings::default().engine_config()
    }
}

impl Settings {
    pub fn engine_config(&self) -> EngineConfig {
        let window_ms = i64::try_from(self.dedup_window_ms).unwrap_or(DEFAULT_DEDUP_WINDOW_MS);
        EngineConfig {
            dedup_window: chrono::Duration::try_milliseconds(window_ms)
                .unwrap_or_else(|| chrono::Duration::milliseconds(DEFAULT_DEDUP_WINDOW_MS)),
            success_cleanup_delay: Duration::from_millis(self.success_cleanup_delay_ms),
            failure_recheck_delay: Duration::from_millis(self.failure_recheck_delay_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            retention: RetentionPolicy {
                max_received: self.max_received.max(1),
                trim_count: self.trim_count.max(1),
            },
            status_max_age: Duration::from_secs(self.status_max_age_secs),
        }
    }
}

pub fn settings_path() -> Option<PathBuf> {
    if let Some(proj) = ProjectDirs::from("com", "chat-reconcile", "chat-reconcile") {
        let dir = proj.config_dir();
        if let Err(e) = fs::create_dir_all(dir) {
            tracing::warn!(error = %e, "failed to create config dir");
            return None;
        }
        return Some(dir.join("settings.json"));
    }
    None
}

/// Load settings from `path`, or from the default location.
///
/// A missing file yields defaults; a malformed one is an error.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => settings_path().ok_or(ConfigError::NoConfigDir)?,
    };
    match fs::read_to_string(&path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
        Err(e) => Err(e.into()),
    }
}

pub fn save_settings(settings: &Settings, path: Option<&Path>) -> Result<(), ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => settings_path().ok_or(ConfigError::NoConfigDir)?,
    };
    let mut file = fs::File::create(path)?;
    let data = serde_json::to_string_pretty(settings)?;
    file.write_all(data.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_fill_defaults() {
        let s: Settings = serde_json::from_str(r#"{"dedup_window_ms": 3000}"#).unwrap();
        assert_eq!(s.dedup_window_ms, 3000);
        assert_eq!(s.success_cleanup_delay_ms, DEFAULT_SUCCESS_CLEANUP_DELAY_MS);
        assert!(s.live_endpoint.is_none());
    }

    #[test]
    fn test_engine_config_conversion() {
        let cfg = Settings::default().engine_config();
        assert_eq!(cfg.dedup_window, chrono::Duration::milliseconds(5000));
        assert_eq!(cfg.success_cleanup_delay, Duration::from_millis(1000));
        assert_eq!(cfg.retention, RetentionPolicy::default());
        assert_eq!(cfg.status_max_age, Duration::from_secs(4));
    }

    #[test]
    fn test_zero_retention_is_clamped() {
        let s = Settings {
            max_received: 0,
            trim_count: 0,
            ..Settings::default()
        };
        let cfg = s.engine_config();
        assert_eq!(cfg.retention.max_received, 1);
        assert_eq!(cfg.retention.trim_count, 1);
    }

    #[test]
    fn test_save_and_load_roundtrip_file() {
        let path = std::env::temp_dir().join(format!(
            "chat-reconcile-settings-{}.json",
            std::process::id()
        ));
        let s = Settings {
            live_endpoint: Some("127.0.0.1:9000".into()),
            ..Settings::default()
        };
        save_settings(&s, Some(&path)).unwrap();
        let loaded = load_settings(Some(&path)).unwrap();
        assert_eq!(loaded, s);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("chat-reconcile-does-not-exist.json");
        assert_eq!(load_settings(Some(&path)).unwrap(), Settings::default());
    }
}
