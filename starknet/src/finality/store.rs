use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use error_stack::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::{Felt, Height};

use super::FinalityError;

/// Key of the serialized unfinalized window.
pub const UNFINALIZED_BLOCKS_KEY: &str = "unfinalizedBlocks";

/// Key of the last finalized height verified against the chain.
pub const LAST_FINALIZED_VERIFIED_HEIGHT_KEY: &str = "lastFinalizedVerifiedHeight";

/// A block known to be correct, recorded by an external integrity system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub height: Height,
    pub hash: Felt,
}

/// Durable key-value metadata used by the finality tracker.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, FinalityError>;

    async fn set(&self, key: &str, value: String) -> Result<(), FinalityError>;

    /// Returns checkpoints at or below `height`, most recent first.
    ///
    /// `None` if integrity checkpoints are not enabled.
    async fn integrity_checkpoints_before(
        &self,
        height: Height,
    ) -> Result<Option<Vec<Checkpoint>>, FinalityError>;
}

/// In memory store, used by the cli and in tests.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    values: Mutex<HashMap<String, String>>,
    checkpoints: Option<BTreeMap<Height, Felt>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables integrity checkpoints.
    pub fn with_checkpoints(checkpoints: impl IntoIterator<Item = Checkpoint>) -> Self {
        let checkpoints = checkpoints
            .into_iter()
            .map(|checkpoint| (checkpoint.height, checkpoint.hash))
            .collect();
        Self {
            values: Mutex::default(),
            checkpoints: Some(checkpoints),
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<String>, FinalityError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), FinalityError> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn integrity_checkpoints_before(
        &self,
        height: Height,
    ) -> Result<Option<Vec<Checkpoint>>, FinalityError> {
        let Some(checkpoints) = &self.checkpoints else {
            return Ok(None);
        };

        let before = checkpoints
            .range(..=height)
            .rev()
            .map(|(height, hash)| Checkpoint {
                height: *height,
                hash: *hash,
            })
            .collect();
        Ok(Some(before))
    }
}
