use error_stack::{Result, ResultExt};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::{
    core::{Header, Height},
    provider::models::BlockStatusExt,
};

use super::{BlockStatusSource, BlockSummary, FinalityError};

#[derive(Debug, Clone)]
pub struct FinalizedLocatorOptions {
    /// Distance between sampled heights when looking for the first final block.
    pub stride: u64,
    /// Lowest block of the chain.
    pub genesis_height: Height,
}

impl Default for FinalizedLocatorOptions {
    fn default() -> Self {
        Self {
            stride: 1000,
            genesis_height: 0,
        }
    }
}

/// Locates the latest block accepted on L1.
///
/// Starknet nodes don't expose the latest L1 accepted block, so it's searched
/// for.
///
/// ```txt
///             cached     next
///               │         │
///  ... [L1] [L1][L1] [L2][L2][L2] ... [L2]
///                                      │
///                                     head
/// ```
///
/// The first call walks back from the head in strides until it finds a final
/// block. Later calls only check the block after the cached one, and binary
/// search between it and the head when it became final.
pub struct FinalizedBlockLocator {
    options: FinalizedLocatorOptions,
    cached: Mutex<Option<Header>>,
}

impl FinalizedBlockLocator {
    pub fn new(options: FinalizedLocatorOptions) -> Self {
        Self {
            options,
            cached: Mutex::new(None),
        }
    }

    /// Returns the cached finalized header, if any.
    pub async fn cached(&self) -> Option<Header> {
        self.cached.lock().await.clone()
    }

    pub async fn finalized_header<S>(&self, source: &S) -> Result<Header, FinalityError>
    where
        S: BlockStatusSource + ?Sized,
    {
        let mut cached = self.cached.lock().await;

        let current = match cached.as_ref() {
            Some(header) => header.clone(),
            None => {
                let header = self.find_first_finalized(source).await?;
                *cached = Some(header.clone());
                header
            }
        };

        let next_height = current.block_height + 1;
        let next = source
            .block_summary(next_height)
            .await
            .change_context(FinalityError::Provider)?;

        match next {
            Some(BlockSummary { status, .. }) if status.is_finalized() => {}
            _ => return Ok(current),
        }

        let head = source
            .latest_height()
            .await
            .change_context(FinalityError::Provider)?;

        let found = self
            .binary_search(source, next_height, head.max(next_height))
            .await?;

        // Never move backwards.
        let updated = match found {
            Some(header) if header.block_height > current.block_height => header,
            _ => current,
        };

        debug!(
            height = updated.block_height,
            hash = %updated.block_hash,
            "finalized block found"
        );

        *cached = Some(updated.clone());
        Ok(updated)
    }

    async fn find_first_finalized<S>(&self, source: &S) -> Result<Header, FinalityError>
    where
        S: BlockStatusSource + ?Sized,
    {
        let head = source
            .latest_height()
            .await
            .change_context(FinalityError::Provider)?;

        let genesis = self.options.genesis_height;
        let stride = self.options.stride.max(1);
        let mut height = head.max(genesis);

        loop {
            trace!(height, "probing for finalized block");
            let summary = source
                .block_summary(height)
                .await
                .change_context(FinalityError::Provider)?;

            if let Some(summary) = summary {
                if summary.status.is_finalized() {
                    return Ok(summary.header);
                }
            }

            if height <= genesis {
                return Err(FinalityError::FinalityNotAvailable)
                    .attach_printable("no block accepted on L1 found")
                    .attach_printable_lazy(|| format!("head: {head}"));
            }

            height = height.saturating_sub(stride).max(genesis);
        }
    }

    /// Returns the highest final block in `low..=high`.
    async fn binary_search<S>(
        &self,
        source: &S,
        mut low: Height,
        mut high: Height,
    ) -> Result<Option<Header>, FinalityError>
    where
        S: BlockStatusSource + ?Sized,
    {
        let mut found = None;

        while low <= high {
            let mid = low + (high - low) / 2;
            trace!(low, high, mid, "binary search iteration");

            let summary = source
                .block_summary(mid)
                .await
                .change_context(FinalityError::Provider)?;

            match summary {
                Some(summary) if summary.status.is_finalized() => {
                    found = Some(summary.header);
                    low = mid + 1;
                }
                _ => {
                    if mid == 0 {
                        break;
                    }
                    high = mid - 1;
                }
            }
        }

        Ok(found)
    }
}
