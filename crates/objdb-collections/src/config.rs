use serde::{Deserialize, Serialize};

use crate::error::{CollectionError, CollectionResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Owners whose entries are deleted per transaction by
    /// `delete_all_collections`.
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,
}

fn default_delete_batch_size() -> usize {
    5_000
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            delete_batch_size: default_delete_batch_size(),
        }
    }
}

impl CollectionConfig {
    pub fn validate(&self) -> CollectionResult<()> {
        if self.delete_batch_size == 0 {
            return Err(CollectionError::InvalidConfig(
                "delete_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}
