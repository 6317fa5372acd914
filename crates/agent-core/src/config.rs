//! Sensor configuration.
//!
//! Loaded from a TOML file (`CAIRN_CONFIG` or `/etc/cairn/config.toml`),
//! then overridden field by field from `CAIRN_*` environment variables.
//! A missing config file is not an error; defaults apply.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

const CONFIG_PATH_ENV: &str = "CAIRN_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "/etc/cairn/config.toml";

/// Grace period for a manager verdict before an exec is allowed through.
pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 2500;

/// Interval between process-cache sweeps against the live pid set.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 1800;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorConfig {
    /// Local socket the management process connects to.
    pub socket_path: PathBuf,
    pub auth_timeout_ms: u64,
    pub sweep_interval_secs: u64,
    pub log_level: String,
    /// NDJSON trace to replay instead of live capture.
    pub replay_path: Option<PathBuf>,
    /// Where identity-list pushes are persisted across restarts.
    pub list_snapshot_path: Option<PathBuf>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/var/run/cairn/mgmt.sock"),
            auth_timeout_ms: DEFAULT_AUTH_TIMEOUT_MS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            log_level: "info".to_string(),
            replay_path: None,
            list_snapshot_path: None,
        }
    }
}

impl SensorConfig {
    /// Resolve the config file, parse it, apply environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// `lookup` abstracts `std::env::var` so override parsing is testable
    /// without mutating process state.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(v) = non_empty("CAIRN_SOCKET_PATH") {
            self.socket_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("CAIRN_AUTH_TIMEOUT_MS") {
            match v.parse::<u64>() {
                Ok(parsed) => self.auth_timeout_ms = parsed,
                Err(_) => tracing::warn!(value = %v, "ignoring bad CAIRN_AUTH_TIMEOUT_MS"),
            }
        }
        if let Some(v) = non_empty("CAIRN_SWEEP_INTERVAL_SECS") {
            match v.parse::<u64>() {
                Ok(parsed) => self.sweep_interval_secs = parsed,
                Err(_) => tracing::warn!(value = %v, "ignoring bad CAIRN_SWEEP_INTERVAL_SECS"),
            }
        }
        if let Some(v) = non_empty("CAIRN_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = non_empty("CAIRN_REPLAY_PATH") {
            self.replay_path = Some(PathBuf::from(v));
        }
        if let Some(v) = non_empty("CAIRN_LIST_SNAPSHOT_PATH") {
            self.list_snapshot_path = Some(PathBuf::from(v));
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.auth_timeout_ms > 0, "auth_timeout_ms must be positive");
        anyhow::ensure!(
            self.sweep_interval_secs > 0,
            "sweep_interval_secs must be positive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SensorConfig::from_file(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(config.auth_timeout_ms, DEFAULT_AUTH_TIMEOUT_MS);
        assert_eq!(config.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS);
        assert_eq!(config.log_level, "info");
        assert!(config.replay_path.is_none());
    }

    #[test]
    fn toml_fields_override_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
socket_path = "/tmp/test.sock"
auth_timeout_ms = 900
log_level = "debug"
"#,
        )
        .expect("write config");

        let config = SensorConfig::from_file(&path).expect("load");
        assert_eq!(config.socket_path, PathBuf::from("/tmp/test.sock"));
        assert_eq!(config.auth_timeout_ms, 900);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS);
    }

    #[test]
    fn unknown_toml_keys_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "auth_timout_ms = 900\n").expect("write config");
        assert!(SensorConfig::from_file(&path).is_err());
    }

    #[test]
    fn env_overrides_beat_file_values() {
        let env: HashMap<&str, &str> = [
            ("CAIRN_SOCKET_PATH", "/tmp/env.sock"),
            ("CAIRN_AUTH_TIMEOUT_MS", "1200"),
            ("CAIRN_REPLAY_PATH", "/tmp/trace.ndjson"),
        ]
        .into_iter()
        .collect();

        let mut config = SensorConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.socket_path, PathBuf::from("/tmp/env.sock"));
        assert_eq!(config.auth_timeout_ms, 1200);
        assert_eq!(config.replay_path, Some(PathBuf::from("/tmp/trace.ndjson")));
    }

    #[test]
    fn unparseable_and_empty_env_values_are_ignored() {
        let env: HashMap<&str, &str> =
            [("CAIRN_AUTH_TIMEOUT_MS", "soon"), ("CAIRN_LOG_LEVEL", "  ")]
                .into_iter()
                .collect();

        let mut config = SensorConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.auth_timeout_ms, DEFAULT_AUTH_TIMEOUT_MS);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let mut config = SensorConfig::default();
        config.auth_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
