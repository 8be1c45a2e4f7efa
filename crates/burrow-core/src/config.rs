//! Centralized configuration for Burrow.
//!
//! Compile-time defaults live on const-structs; the tunables that callers may
//! reasonably override (execution budget, queue depth, contention wait) are
//! carried on [`EngineConfig`] so they can be set once at startup and shared
//! by the registry and the execution engine.

use std::path::PathBuf;
use std::time::Duration;

/// Server-level configuration.
pub struct ServerConfig;

impl ServerConfig {
    pub const APP_NAME: &'static str = "Burrow";
    pub const DEFAULT_HOST: &'static str = "0.0.0.0";
    pub const DEFAULT_PORT: u16 = 8080;
    /// Name of the SQLite file holding the database registry metadata.
    pub const METADATA_FILENAME: &'static str = "metadata.db";
    pub const DATA_DIR_NAME: &'static str = "burrow";
}

/// Discovery-related configuration.
pub struct DiscoveryConfig;

impl DiscoveryConfig {
    /// mDNS service type clients browse for.
    pub const SERVICE_TYPE: &'static str = "_burrow._tcp.local.";
    pub const INSTANCE_PREFIX: &'static str = "Burrow Database Server";
    pub const RETRY_INTERVAL: Duration = Duration::from_secs(30);
}

/// Runtime tunables for query execution and sessions.
///
/// Defaults are deliberate: a query that holds a database for more than
/// 30 seconds is almost certainly a client bug on a LAN-local store, and a
/// writer queue deeper than 32 means the database is already oversubscribed.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wall-clock budget for a single statement; exceeding it cancels the
    /// statement and surfaces `Timeout`.
    pub query_timeout: Duration,
    /// How long an execution waits for a slot on a contended database before
    /// failing with `Busy`.
    pub busy_wait: Duration,
    /// Maximum number of statements queued per database.
    pub max_queue_depth: usize,
    /// Connection sessions idle longer than this stop counting as active.
    pub session_idle_timeout: Duration,
    /// Interval between mDNS registration retries after a failure.
    pub discovery_retry_interval: Duration,
}

impl EngineConfig {
    pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_BUSY_WAIT: Duration = Duration::from_secs(5);
    pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 32;
    pub const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query_timeout: Self::DEFAULT_QUERY_TIMEOUT,
            busy_wait: Self::DEFAULT_BUSY_WAIT,
            max_queue_depth: Self::DEFAULT_MAX_QUEUE_DEPTH,
            session_idle_timeout: Self::DEFAULT_SESSION_IDLE_TIMEOUT,
            discovery_retry_interval: DiscoveryConfig::RETRY_INTERVAL,
        }
    }
}

/// Default location for database files: the platform data directory, falling
/// back to a dot-directory under the current working directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(ServerConfig::DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(format!(".{}", ServerConfig::DATA_DIR_NAME)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_reasonable() {
        let config = EngineConfig::default();
        assert!(config.query_timeout > config.busy_wait);
        assert!(config.max_queue_depth > 0);
    }

    #[test]
    fn test_default_data_dir_is_named() {
        let dir = default_data_dir();
        assert!(dir.to_string_lossy().contains(ServerConfig::DATA_DIR_NAME));
    }
}
