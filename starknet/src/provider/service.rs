use async_trait::async_trait;
use error_stack::{Result, ResultExt};
use futures_util::{stream, StreamExt};
use tracing::{debug, instrument, warn};

use crate::{
    block::NormalizedBlock,
    core::{Felt, Header, Height},
    finality::{
        BlockStatusSource, BlockSummary, FinalityError, FinalizedBlockLocator,
        FinalizedLocatorOptions, HeaderSource,
    },
};

use super::{
    error::{ProviderError, ProviderErrorExt},
    models::{
        BlockExt, BlockId, BlockStatusExt, BlockTag, EmittedEvent, EventFilter,
        MaybePendingBlockWithTxHashes, MaybePendingBlockWithTxs,
    },
    pool::ConnectionPool,
    safe::{with_retry, RetryingSafeProvider},
    StarknetApi,
};

#[derive(Debug, Clone)]
pub struct ApiOptions {
    /// Number of blocks fetched concurrently.
    pub batch_size: usize,
    /// Page size for `starknet_getEvents`.
    pub event_chunk_size: u64,
    /// Distance from the head used as finalized block when the chain has no finality.
    pub finality_fallback_depth: u64,
}

impl Default for ApiOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            event_chunk_size: 1000,
            finality_fallback_depth: 200,
        }
    }
}

/// Fetches normalized blocks from a pool of endpoints.
///
/// Every request is retried on a fresh connection.
pub struct ApiService<P> {
    pool: ConnectionPool<P>,
    options: ApiOptions,
    locator: FinalizedBlockLocator,
}

impl<P: StarknetApi> ApiService<P> {
    pub fn new(
        pool: ConnectionPool<P>,
        options: ApiOptions,
        locator_options: FinalizedLocatorOptions,
    ) -> Self {
        Self {
            pool,
            options,
            locator: FinalizedBlockLocator::new(locator_options),
        }
    }

    pub fn pool(&self) -> &ConnectionPool<P> {
        &self.pool
    }

    /// Returns a view of the chain state at `height`.
    pub fn safe_api_at(&self, height: Height) -> RetryingSafeProvider<P> {
        RetryingSafeProvider::new(self.pool.clone(), height)
    }

    #[instrument(skip(self), err(Debug))]
    pub async fn fetch_block(&self, height: Height) -> Result<NormalizedBlock, ProviderError> {
        let block_id = BlockId::Number(height);
        let block = match with_retry(|_| self.pool.get_block_with_txs(&block_id)).await? {
            MaybePendingBlockWithTxs::Block(block) => block,
            MaybePendingBlockWithTxs::PendingBlock(_) => {
                return Err(ProviderError::Response)
                    .attach_printable_lazy(|| format!("block {height} is pending"));
            }
        };
        let events = self.fetch_block_logs(height).await?;
        Ok(NormalizedBlock::new(block, events))
    }

    /// Fetches all events in the block, following continuation tokens.
    pub async fn fetch_block_logs(&self, height: Height) -> Result<Vec<EmittedEvent>, ProviderError> {
        let mut events = Vec::new();
        let mut continuation_token = None;
        let mut chunk = 1;

        loop {
            let filter = EventFilter {
                from_block: Some(BlockId::Number(height)),
                to_block: Some(BlockId::Number(height)),
                address: None,
                keys: None,
            };
            let token = continuation_token.take();

            let page = with_retry(|_| {
                self.pool
                    .get_events(&filter, token.clone(), self.options.event_chunk_size)
            })
                .await
                .attach_printable_lazy(|| format!("block: {height}, chunk: {chunk}"))?;

            debug!(
                height,
                chunk,
                events = page.events.len(),
                continuation_token = ?page.continuation_token,
                "fetched events chunk"
            );

            events.extend(page.events);
            match page.continuation_token {
                Some(token) if !token.is_empty() => continuation_token = Some(token),
                _ => break,
            }
            chunk += 1;
        }

        Ok(events)
    }

    /// Fetches blocks concurrently, one result per height in input order.
    pub async fn fetch_blocks_settled(
        &self,
        heights: &[Height],
    ) -> Vec<Result<NormalizedBlock, ProviderError>> {
        stream::iter(heights.iter().copied())
            .map(|height| self.fetch_block(height))
            .buffered(self.options.batch_size.max(1))
            .collect()
            .await
    }

    /// Fetches blocks concurrently, in input order.
    ///
    /// Returns the first error after all fetches completed.
    pub async fn fetch_blocks(
        &self,
        heights: &[Height],
    ) -> Result<Vec<NormalizedBlock>, ProviderError> {
        self.fetch_blocks_settled(heights)
            .await
            .into_iter()
            .collect()
    }

    pub async fn header_for_id(&self, block_id: &BlockId) -> Result<Header, ProviderError> {
        let block = with_retry(|_| self.pool.get_block_with_tx_hashes(block_id)).await?;
        header_from_block(&block).attach_printable_lazy(|| format!("block id: {block_id:?}"))
    }

    /// Returns the head of the chain, skipping rejected blocks.
    pub async fn fetch_latest_header(&self) -> Result<Header, ProviderError> {
        let block_id = BlockId::Tag(BlockTag::Latest);
        let latest = with_retry(|_| self.pool.get_block_with_tx_hashes(&block_id)).await?;
        let header = header_from_block(&latest)?;
        if !latest.status().is_rejected() {
            return Ok(header);
        }

        warn!(height = header.block_height, "latest block is rejected");
        let accepted = with_retry(|_| self.pool.block_hash_and_number()).await?;
        self.header_for_id(&BlockId::Number(accepted.block_number))
            .await
    }

    /// Returns the latest block final on L1.
    ///
    /// Falls back to a fixed distance from the head when the chain never
    /// finalizes blocks.
    pub async fn fetch_finalized_header(&self) -> Result<Header, FinalityError> {
        match self.locator.finalized_header(self).await {
            Ok(header) => Ok(header),
            Err(err) if matches!(err.current_context(), FinalityError::FinalityNotAvailable) => {
                let latest = self
                    .fetch_latest_header()
                    .await
                    .change_context(FinalityError::Provider)?;
                let height = latest
                    .block_height
                    .saturating_sub(self.options.finality_fallback_depth);
                warn!(
                    height,
                    depth = self.options.finality_fallback_depth,
                    "finality not available, using fixed depth"
                );
                self.header_for_id(&BlockId::Number(height))
                    .await
                    .change_context(FinalityError::Provider)
            }
            Err(err) => Err(err),
        }
    }
}

fn header_from_block(block: &MaybePendingBlockWithTxHashes) -> Result<Header, ProviderError> {
    block
        .header()
        .ok_or(ProviderError::Response)
        .attach_printable("expected a block, got a pending block")
}

#[async_trait]
impl<P: StarknetApi> BlockStatusSource for ApiService<P> {
    async fn latest_height(&self) -> Result<Height, ProviderError> {
        let latest = with_retry(|_| self.pool.block_hash_and_number()).await?;
        Ok(latest.block_number)
    }

    async fn block_summary(&self, height: Height) -> Result<Option<BlockSummary>, ProviderError> {
        let block_id = BlockId::Number(height);
        match with_retry(|_| self.pool.get_block_with_tx_hashes(&block_id)).await {
            Ok(block) => Ok(Some(BlockSummary {
                header: header_from_block(&block)?,
                status: block.status(),
            })),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl<P: StarknetApi> HeaderSource for ApiService<P> {
    async fn header_for_height(&self, height: Height) -> Result<Header, FinalityError> {
        self.header_for_id(&BlockId::Number(height))
            .await
            .change_context(FinalityError::Provider)
    }

    async fn header_for_hash(&self, hash: &Felt) -> Result<Header, FinalityError> {
        let hash = hash
            .to_field_element()
            .change_context(FinalityError::Provider)
            .attach_printable_lazy(|| format!("invalid block hash: {hash}"))?;
        self.header_for_id(&BlockId::Hash(hash))
            .await
            .change_context(FinalityError::Provider)
    }

    async fn finalized_header(&self) -> Result<Header, FinalityError> {
        self.fetch_finalized_header().await
    }
}
