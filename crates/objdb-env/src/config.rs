use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How strictly the environment detects an unclean shutdown.
///
/// The dirty mark at open is only needed when commits can be lost.
/// `Paranoid` trusts every commit to be durable, so it never writes the
/// mark and a crash leaves the last clean flag in place; nothing committed
/// was lost. `BestEffort` marks the environment dirty as it opens, so a
/// crash that dropped recent commits shows up as an unclean shutdown on the
/// next open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityMode {
    /// Every commit is durable in the engine; the clean flag is only
    /// rewritten at close.
    #[default]
    Paranoid,
    /// Commits may be lost on a crash. The environment is marked dirty as
    /// soon as it opens so the next open can detect the lost run.
    BestEffort,
}

impl DurabilityMode {
    pub fn marks_dirty_on_open(self) -> bool {
        matches!(self, DurabilityMode::BestEffort)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub durability: DurabilityMode,
    /// Extra attempts to acquire the engine handle after the first failure.
    #[serde(default = "default_open_retry_count")]
    pub open_retry_count: u32,
    /// Fixed sleep between engine open attempts.
    #[serde(default = "default_open_retry_backoff_ms")]
    pub open_retry_backoff_ms: u64,
}

fn default_open_retry_count() -> u32 {
    5
}

fn default_open_retry_backoff_ms() -> u64 {
    500
}

impl EnvironmentConfig {
    pub fn open_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.open_retry_backoff_ms)
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            durability: DurabilityMode::default(),
            open_retry_count: default_open_retry_count(),
            open_retry_backoff_ms: default_open_retry_backoff_ms(),
        }
    }
}
