//! Bridge configuration parameters
//!
//! All tunables for the dispatch bridge.  Loaded from a JSON file (every
//! field optional, missing ones take their defaults) and validated before
//! anything is started.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatcher::Priority;
use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Worker pool flavor and sizing.
    pub dispatcher: DispatcherConfig,
    /// Acknowledge oneway methods with an empty reply when the transport
    /// framed them as two-way.
    pub ack_oneway: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            ack_oneway: true,
        }
    }
}

impl BridgeConfig {
    /// Read, parse and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(text).map_err(ConfigError::Parse)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dispatcher.validate()
    }
}

/// Worker pool flavor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatcherKind {
    /// N workers over one FIFO queue.
    Simple {
        workers: usize,
        /// Pending-task cap (0 = unbounded).
        #[serde(default)]
        max_pending: usize,
    },
    /// N workers over one priority heap.
    PriorityQueue {
        workers: usize,
        /// Pending-task cap (0 = unbounded).
        #[serde(default)]
        max_pending: usize,
    },
    /// One pool per band, highest first:
    /// `[high_important, high, important, normal, best_effort]`.
    Banded {
        band_workers: [usize; Priority::COUNT],
        /// Per-band queue cap (0 = unbounded).
        #[serde(default)]
        max_queue_len: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub kind: DispatcherKind,
    /// Record wait / run timings per task.
    pub enable_task_stats: bool,
    /// Expire tasks that waited longer than this (ms, 0 = never).
    pub task_expire_ms: u64,
    /// CoDel load shedding (banded dispatcher only).
    pub enable_codel: bool,
    /// Worker thread name prefix.
    pub thread_name_prefix: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            kind: DispatcherKind::Simple {
                workers: 4,
                max_pending: 0,
            },
            enable_task_stats: false,
            task_expire_ms: 0,
            enable_codel: false,
            thread_name_prefix: "rpc-worker".into(),
        }
    }
}

const MAX_WORKERS: usize = 1024;
const MAX_EXPIRE_MS: u64 = 3_600_000;

impl DispatcherConfig {
    pub fn task_expire(&self) -> Option<Duration> {
        (self.task_expire_ms > 0).then(|| Duration::from_millis(self.task_expire_ms))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.kind {
            DispatcherKind::Simple { workers, .. } | DispatcherKind::PriorityQueue { workers, .. } => {
                if !(1..=MAX_WORKERS).contains(workers) {
                    return Err(ConfigError::ValidationFailed("workers must be 1–1024"));
                }
            }
            DispatcherKind::Banded { band_workers, .. } => {
                if band_workers.iter().any(|n| !(1..=MAX_WORKERS).contains(n)) {
                    return Err(ConfigError::ValidationFailed(
                        "every band needs 1–1024 workers",
                    ));
                }
            }
        }
        if self.enable_codel && !matches!(self.kind, DispatcherKind::Banded { .. }) {
            return Err(ConfigError::ValidationFailed(
                "enable_codel requires the banded dispatcher",
            ));
        }
        if self.task_expire_ms > MAX_EXPIRE_MS {
            return Err(ConfigError::ValidationFailed(
                "task_expire_ms must be 0–3600000",
            ));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "thread_name_prefix must not be empty",
            ));
        }
        Ok(())
    }
}
