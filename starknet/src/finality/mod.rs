//! Finality tracking and fork resolution.
mod finalized;
mod store;
mod unfinalized;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use error_stack::Result;

use crate::{
    core::{Felt, Header, Height},
    provider::{models::BlockStatus, ProviderError},
};

pub use self::finalized::{FinalizedBlockLocator, FinalizedLocatorOptions};
pub use self::store::{
    Checkpoint, CheckpointStore, MemoryCheckpointStore, LAST_FINALIZED_VERIFIED_HEIGHT_KEY,
    UNFINALIZED_BLOCKS_KEY,
};
pub use self::unfinalized::{
    ForkCheckMode, TrackerState, UnfinalizedBlocks, UnfinalizedOptions,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalityError {
    /// No block was ever found final. The caller should use a fixed depth instead.
    FinalityNotAvailable,
    /// Error fetching headers.
    Provider,
    /// Error reading or writing checkpoints.
    Store,
    /// A fork was detected and no rewind target could be found. Should not continue.
    UnresolvableFork,
    /// A block was registered out of order. Should not continue.
    NonSequentialBlock,
}

impl error_stack::Context for FinalityError {}

impl fmt::Display for FinalityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalityError::FinalityNotAvailable => f.write_str("finality error: not available"),
            FinalityError::Provider => f.write_str("finality error: provider"),
            FinalityError::Store => f.write_str("finality error: store"),
            FinalityError::UnresolvableFork => f.write_str("finality error: unresolvable fork"),
            FinalityError::NonSequentialBlock => {
                f.write_str("finality error: non sequential block")
            }
        }
    }
}

/// Header and status of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub header: Header,
    pub status: BlockStatus,
}

/// Source of block status, used to locate the finalized block.
#[async_trait]
pub trait BlockStatusSource: Send + Sync {
    async fn latest_height(&self) -> Result<Height, ProviderError>;

    /// Returns `None` if the block doesn't exist.
    async fn block_summary(&self, height: Height) -> Result<Option<BlockSummary>, ProviderError>;
}

/// Fresh headers from the chain, used to verify the unfinalized window.
#[async_trait]
pub trait HeaderSource: Send + Sync {
    async fn header_for_height(&self, height: Height) -> Result<Header, FinalityError>;

    async fn header_for_hash(&self, hash: &Felt) -> Result<Header, FinalityError>;

    async fn finalized_header(&self) -> Result<Header, FinalityError>;
}

#[async_trait]
impl<T: HeaderSource + ?Sized> HeaderSource for Arc<T> {
    async fn header_for_height(&self, height: Height) -> Result<Header, FinalityError> {
        (**self).header_for_height(height).await
    }

    async fn header_for_hash(&self, hash: &Felt) -> Result<Header, FinalityError> {
        (**self).header_for_hash(hash).await
    }

    async fn finalized_header(&self) -> Result<Header, FinalityError> {
        (**self).finalized_header().await
    }
}
