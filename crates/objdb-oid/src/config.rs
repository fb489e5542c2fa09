use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OidError, OidResult};

/// Tuning for the bitmap index and its checkpoint runner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidIndexConfig {
    /// Ids covered by one blob of the all-objects index. Multiple of 64.
    #[serde(default = "default_ids_per_blob")]
    pub ids_per_blob: u64,
    /// Ids covered by one blob of the collection and evictable indices.
    #[serde(default = "default_collection_ids_per_blob")]
    pub collection_ids_per_blob: u64,
    /// Per-pass change cap for the background runner. 0 means unlimited.
    #[serde(default = "default_checkpoint_max_changes")]
    pub checkpoint_max_changes: usize,
    #[serde(default = "default_checkpoint_min_sleep_ms")]
    pub checkpoint_min_sleep_ms: u64,
    #[serde(default = "default_checkpoint_max_sleep_ms")]
    pub checkpoint_max_sleep_ms: u64,
    /// WAL sequence values reserved per durable sequence update.
    #[serde(default = "default_wal_sequence_batch")]
    pub wal_sequence_batch: u64,
    /// Capacity of the reader to worker queue used at startup.
    #[serde(default = "default_reader_queue_bound")]
    pub reader_queue_bound: usize,
}

fn default_ids_per_blob() -> u64 {
    512
}

fn default_collection_ids_per_blob() -> u64 {
    64
}

fn default_checkpoint_max_changes() -> usize {
    100_000
}

fn default_checkpoint_min_sleep_ms() -> u64 {
    1_000
}

fn default_checkpoint_max_sleep_ms() -> u64 {
    60_000
}

fn default_wal_sequence_batch() -> u64 {
    50_000
}

fn default_reader_queue_bound() -> usize {
    1_000
}

impl Default for OidIndexConfig {
    fn default() -> Self {
        Self {
            ids_per_blob: default_ids_per_blob(),
            collection_ids_per_blob: default_collection_ids_per_blob(),
            checkpoint_max_changes: default_checkpoint_max_changes(),
            checkpoint_min_sleep_ms: default_checkpoint_min_sleep_ms(),
            checkpoint_max_sleep_ms: default_checkpoint_max_sleep_ms(),
            wal_sequence_batch: default_wal_sequence_batch(),
            reader_queue_bound: default_reader_queue_bound(),
        }
    }
}

impl OidIndexConfig {
    pub fn min_sleep(&self) -> Duration {
        Duration::from_millis(self.checkpoint_min_sleep_ms)
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_millis(self.checkpoint_max_sleep_ms)
    }

    pub fn validate(&self) -> OidResult<()> {
        for (name, width) in [
            ("ids_per_blob", self.ids_per_blob),
            ("collection_ids_per_blob", self.collection_ids_per_blob),
        ] {
            if width == 0 || width % 64 != 0 {
                return Err(OidError::InvalidConfig(format!(
                    "{name} must be a positive multiple of 64, got {width}"
                )));
            }
        }
        if self.checkpoint_min_sleep_ms == 0 {
            return Err(OidError::InvalidConfig(
                "checkpoint_min_sleep_ms must be positive".into(),
            ));
        }
        if self.checkpoint_min_sleep_ms > self.checkpoint_max_sleep_ms {
            return Err(OidError::InvalidConfig(format!(
                "checkpoint_min_sleep_ms ({}) exceeds checkpoint_max_sleep_ms ({})",
                self.checkpoint_min_sleep_ms, self.checkpoint_max_sleep_ms
            )));
        }
        if self.wal_sequence_batch == 0 {
            return Err(OidError::InvalidConfig("wal_sequence_batch must be positive".into()));
        }
        if self.reader_queue_bound == 0 {
            return Err(OidError::InvalidConfig("reader_queue_bound must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let c = OidIndexConfig::default();
        c.validate().unwrap();
        assert_eq!(c.wal_sequence_batch, 50_000);
        assert_eq!(c.min_sleep(), Duration::from_secs(1));
    }

    #[test]
    fn rejects_bad_blob_width() {
        let mut c = OidIndexConfig::default();
        c.ids_per_blob = 100;
        assert!(matches!(c.validate(), Err(OidError::InvalidConfig(_))));
        c.ids_per_blob = 0;
        assert!(c.validate().is_err());
        c.ids_per_blob = 128;
        c.collection_ids_per_blob = 65;
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_inverted_sleep_bounds() {
        let c = OidIndexConfig {
            checkpoint_min_sleep_ms: 10,
            checkpoint_max_sleep_ms: 5,
            ..OidIndexConfig::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_zero_min_sleep() {
        let c = OidIndexConfig {
            checkpoint_min_sleep_ms: 0,
            ..OidIndexConfig::default()
        };
        assert!(matches!(c.validate(), Err(OidError::InvalidConfig(_))));
    }
}
