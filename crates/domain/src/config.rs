use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Config {
    /// Load a TOML config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| crate::error::Error::Config(e.to_string()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file. `None` selects an in-memory store.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Verify event checksums on read.
    #[serde(default)]
    pub verify_checksums: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            verify_checksums: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Run compaction automatically during turn preflight when the
    /// threshold is crossed.
    #[serde(default = "d_true")]
    pub auto: bool,
    /// Fraction of the context window that triggers compaction.
    #[serde(default = "d_threshold")]
    pub threshold: f64,
    /// Messages kept verbatim at the tail of the buffer.
    #[serde(default = "d_keep_recent")]
    pub keep_recent_messages: usize,
    /// Context window assumed for models the provider registry cannot size.
    #[serde(default = "d_context_window")]
    pub default_context_window: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            auto: true,
            threshold: 0.75,
            keep_recent_messages: 10,
            default_context_window: 200_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timeouts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// One provider request, end to end.
    #[serde(default = "d_provider_secs")]
    pub provider_secs: u64,
    /// One tool call.
    #[serde(default = "d_tool_secs")]
    pub tool_secs: u64,
    /// One hook handler.
    #[serde(default = "d_hook_secs")]
    pub hook_secs: u64,
    /// Client-visible deadline for one RPC request.
    #[serde(default = "d_rpc_secs")]
    pub rpc_secs: u64,
    /// Idempotency cache entry lifetime.
    #[serde(default = "d_idempotency_secs")]
    pub idempotency_ttl_secs: u64,
    /// How long shutdown waits for background hooks.
    #[serde(default = "d_shutdown_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            provider_secs: 300,
            tool_secs: 30,
            hook_secs: 5,
            rpc_secs: 60,
            idempotency_ttl_secs: 600,
            shutdown_grace_secs: 10,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum provider/tool loops per turn before force-stop.
    #[serde(default = "d_max_tool_loops")]
    pub max_tool_loops: usize,
    /// Per-connection outbound event queue; a consumer that falls this far
    /// behind is dropped.
    #[serde(default = "d_event_queue")]
    pub event_queue_capacity: usize,
    /// Bounded idempotency cache size.
    #[serde(default = "d_idempotency_cap")]
    pub idempotency_capacity: usize,
    /// Evict inactive sessions from memory after this many idle minutes.
    /// `None` disables eviction.
    #[serde(default)]
    pub idle_evict_minutes: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tool_loops: 25,
            event_queue_capacity: 1024,
            idempotency_capacity: 1024,
            idle_evict_minutes: None,
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_threshold() -> f64 {
    0.75
}
fn d_keep_recent() -> usize {
    10
}
fn d_context_window() -> u64 {
    200_000
}
fn d_provider_secs() -> u64 {
    300
}
fn d_tool_secs() -> u64 {
    30
}
fn d_hook_secs() -> u64 {
    5
}
fn d_rpc_secs() -> u64 {
    60
}
fn d_idempotency_secs() -> u64 {
    600
}
fn d_shutdown_secs() -> u64 {
    10
}
fn d_max_tool_loops() -> usize {
    25
}
fn d_event_queue() -> usize {
    1024
}
fn d_idempotency_cap() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.compaction.threshold, 0.75);
        assert_eq!(cfg.timeouts.provider_secs, 300);
        assert_eq!(cfg.timeouts.tool_secs, 30);
        assert_eq!(cfg.timeouts.hook_secs, 5);
        assert_eq!(cfg.timeouts.rpc_secs, 60);
        assert_eq!(cfg.timeouts.idempotency_ttl_secs, 600);
        assert_eq!(cfg.limits.event_queue_capacity, 1024);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [compaction]
            threshold = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.compaction.threshold, 0.5);
        assert!(cfg.compaction.auto);
        assert_eq!(cfg.limits.max_tool_loops, 25);
    }
}
