use std::path::Path;
use std::time::Duration;

use objdb_collections::CollectionConfig;
use objdb_env::EnvironmentConfig;
use objdb_oid::{IndexStrategy, OidIndexConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PersistError, PersistResult};

/// Settings of the managed object store itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Objects deleted per transaction by `delete_all`.
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,
    /// Delete batches slower than this are logged at warn.
    #[serde(default = "default_slow_batch_threshold_ms")]
    pub slow_batch_threshold_ms: u64,
    #[serde(default)]
    pub index_strategy: IndexStrategy,
    /// Live object count at which `add_new_object` starts warning.
    #[serde(default = "default_object_count_warn_threshold")]
    pub object_count_warn_threshold: usize,
}

fn default_delete_batch_size() -> usize {
    5_000
}

fn default_slow_batch_threshold_ms() -> u64 {
    300
}

fn default_object_count_warn_threshold() -> usize {
    // Nine tenths of the legacy 31-bit object count ceiling.
    (i32::MAX as usize / 10) * 9
}

impl StoreConfig {
    pub fn slow_batch_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_batch_threshold_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            delete_batch_size: default_delete_batch_size(),
            slow_batch_threshold_ms: default_slow_batch_threshold_ms(),
            index_strategy: IndexStrategy::default(),
            object_count_warn_threshold: default_object_count_warn_threshold(),
        }
    }
}

/// Complete persistence configuration, one table per component.
///
/// ```toml
/// [environment]
/// durability = "paranoid"
///
/// [oid_index]
/// ids_per_blob = 512
///
/// [store]
/// index_strategy = "bitmap"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub oid_index: OidIndexConfig,
    #[serde(default)]
    pub collections: CollectionConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl PersistenceConfig {
    pub fn from_toml_str(s: &str) -> PersistResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| PersistError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> PersistResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "loaded persistence config");
        Ok(config)
    }

    pub fn validate(&self) -> PersistResult<()> {
        self.oid_index
            .validate()
            .map_err(|e| PersistError::Config(e.to_string()))?;
        self.collections
            .validate()
            .map_err(|e| PersistError::Config(e.to_string()))?;
        if self.store.delete_batch_size == 0 {
            return Err(PersistError::Config(
                "store.delete_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}
