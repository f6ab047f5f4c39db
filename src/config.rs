//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the supervisor and the provisioner.
//!
//! Config is used in two ways:
//! 1. **Supervisor creation**: `Supervisor::builder(config)`
//! 2. **Provisioner creation**: `Provisioner::builder(config, store)`
//!
//! ## Sentinel values
//! - `log_capacity = 0` → clamped to 1 (a ring must hold at least one line)
//! - `subscriber_queue = 0` → clamped to 1
//! - `kill_grace = 0s` → do not wait for reaping after the unconditional kill
//!
//! ## Loading
//! All fields have defaults, so a JSON file only needs the keys it overrides.
//! Durations are written as (fractional) seconds:
//! ```json
//! { "data_dir": "/srv/games", "stop_grace": 45, "restart_settle": 0.5 }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global configuration for the supervisor runtime.
///
/// Defines:
/// - **Layout**: where entity directories live
/// - **Shutdown behavior**: stop command and the two bounded waits before the kill
/// - **Log distribution**: ring capacity, history replay size, subscriber queue bound
/// - **Event system**: bus capacity for lifecycle events
/// - **Downloads**: HTTP timeout and user agent
///
/// ## Notes
/// All fields are public for flexibility. Prefer using helper accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory holding one sub-directory per entity.
    pub data_dir: PathBuf,

    /// Line written to a process's input channel to request a graceful exit.
    pub stop_command: String,

    /// Maximum wait for a natural exit after the stop command.
    ///
    /// On expiry the supervisor sends a polite termination signal.
    #[serde(with = "secs")]
    pub stop_grace: Duration,

    /// Maximum wait after the termination signal before the unconditional kill.
    #[serde(with = "secs")]
    pub terminate_grace: Duration,

    /// Maximum wait for the OS to reap the process after the unconditional kill.
    #[serde(with = "secs")]
    pub kill_grace: Duration,

    /// Pause between the stop and start halves of a restart.
    #[serde(with = "secs")]
    pub restart_settle: Duration,

    /// Lines kept per entity in its log ring.
    pub log_capacity: usize,

    /// Lines replayed to a new subscriber before live delivery.
    pub history_lines: usize,

    /// Per-subscriber queue bound; a subscriber whose queue is full is dropped.
    pub subscriber_queue: usize,

    /// Capacity of the lifecycle event bus ring buffer.
    pub bus_capacity: usize,

    /// Whole-request timeout for catalog queries and downloads.
    #[serde(with = "secs")]
    pub http_timeout: Duration,

    /// User agent sent to external catalogs.
    pub user_agent: String,
}

impl Config {
    /// Returns the log ring capacity clamped to a minimum of 1.
    #[inline]
    pub fn log_capacity_clamped(&self) -> usize {
        self.log_capacity.max(1)
    }

    /// Returns the subscriber queue bound clamped to a minimum of 1.
    #[inline]
    pub fn subscriber_queue_clamped(&self) -> usize {
        self.subscriber_queue.max(1)
    }

    /// Returns the number of history lines a subscriber receives, never more
    /// than the ring can hold.
    #[inline]
    pub fn history_lines_clamped(&self) -> usize {
        self.history_lines.min(self.log_capacity_clamped())
    }

    /// Returns the post-kill reaping bound as an `Option`.
    ///
    /// - `None` → do not wait
    /// - `Some(d)` → wait up to `d`
    #[inline]
    pub fn kill_wait(&self) -> Option<Duration> {
        if self.kill_grace == Duration::ZERO {
            None
        } else {
            Some(self.kill_grace)
        }
    }

    /// Directory owned by entity `id`.
    ///
    /// `None` when the id is not a plain directory name (separators, `..`,
    /// leading dot), so a caller-supplied id never resolves outside `data_dir`.
    pub fn entity_dir(&self, id: &crate::EntityId) -> Option<PathBuf> {
        crate::provision::layout::is_safe_file_name(id.as_str())
            .then(|| self.data_dir.join(id.as_str()))
    }

    /// Reads a JSON config file; missing keys keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(std::io::Error::other)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `data_dir = "data/servers"`
    /// - `stop_command = "stop"`
    /// - `stop_grace = 30s`, `terminate_grace = 10s`, `kill_grace = 5s`
    /// - `restart_settle = 2s`
    /// - `log_capacity = 1000`, `history_lines = 100`, `subscriber_queue = 256`
    /// - `bus_capacity = 1024`
    /// - `http_timeout = 300s` (server artifacts are tens of MiB)
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/servers"),
            stop_command: "stop".to_string(),
            stop_grace: Duration::from_secs(30),
            terminate_grace: Duration::from_secs(10),
            kill_grace: Duration::from_secs(5),
            restart_settle: Duration::from_secs(2),
            log_capacity: 1000,
            history_lines: 100,
            subscriber_queue: 256,
            bus_capacity: 1024,
            http_timeout: Duration::from_secs(300),
            user_agent: concat!("servervisor/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Serde adapter for durations written as fractional seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_shutdown_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.stop_grace, Duration::from_secs(30));
        assert_eq!(cfg.terminate_grace, Duration::from_secs(10));
        assert_eq!(cfg.log_capacity, 1000);
        assert_eq!(cfg.stop_command, "stop");
    }

    #[test]
    fn test_clamps() {
        let cfg = Config {
            log_capacity: 0,
            subscriber_queue: 0,
            history_lines: 50,
            kill_grace: Duration::ZERO,
            ..Config::default()
        };
        assert_eq!(cfg.log_capacity_clamped(), 1);
        assert_eq!(cfg.subscriber_queue_clamped(), 1);
        assert_eq!(cfg.history_lines_clamped(), 1);
        assert!(cfg.kill_wait().is_none());
    }

    #[test]
    fn test_entity_dir_rejects_escaping_ids() {
        let cfg = Config {
            data_dir: PathBuf::from("/srv/data"),
            ..Config::default()
        };
        assert_eq!(
            cfg.entity_dir(&"a1b2c3d4".into()),
            Some(PathBuf::from("/srv/data/a1b2c3d4"))
        );
        for bad in ["../x", "..", "a/b", "/etc", ".hidden", ""] {
            assert_eq!(cfg.entity_dir(&bad.into()), None, "{bad}");
        }
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "stop_grace": 1.5, "data_dir": "/tmp/x" }"#).unwrap();

        let cfg = Config::from_json_file(&path).unwrap();
        assert_eq!(cfg.stop_grace, Duration::from_millis(1500));
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/x"));
        assert_eq!(cfg.terminate_grace, Duration::from_secs(10));
    }

    #[test]
    fn test_negative_duration_rejected() {
        let err = serde_json::from_str::<Config>(r#"{ "stop_grace": -1 }"#);
        assert!(err.is_err());
    }
}
