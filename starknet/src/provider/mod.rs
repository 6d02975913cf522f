//! Access to Starknet json-rpc endpoints.
//!
//! ```txt
//!  JsonRpcProvider ─┐
//!  JsonRpcProvider ─┼─► ConnectionPool ─► ApiService ─► NormalizedBlock
//!  JsonRpcProvider ─┘          │
//!                              └────────► RetryingSafeProvider (SafeView at height)
//! ```
mod error;
mod jsonrpc;
pub mod models;
mod pool;
mod safe;
mod service;

use async_trait::async_trait;
use error_stack::Result;

use self::models::{
    BlockHashAndNumber, BlockId, ContractClass, EventFilter, EventsPage, FieldElement,
    FunctionCall, MaybePendingBlockWithTxHashes, MaybePendingBlockWithTxs,
    MaybePendingTransactionReceipt,
};

pub use self::error::{ApiErrorKind, ProviderError, ProviderErrorExt};
pub use self::jsonrpc::{JsonRpcProvider, JsonRpcProviderOptions};
pub use self::pool::{ConnectionMetadata, ConnectionPool, PooledConnection};
pub use self::safe::{with_retry, HistoricalApi, RetryingSafeProvider, SafeProvider, MAX_ATTEMPTS};
pub use self::service::{ApiOptions, ApiService};

/// Read access to a Starknet node.
///
/// Mirrors the subset of [starknet::providers::Provider] used by the indexer,
/// with errors classified as [ProviderError].
#[async_trait]
pub trait StarknetApi: Send + Sync {
    async fn chain_id(&self) -> Result<FieldElement, ProviderError>;

    async fn spec_version(&self) -> Result<String, ProviderError>;

    async fn block_hash_and_number(&self) -> Result<BlockHashAndNumber, ProviderError>;

    async fn get_block_with_txs(
        &self,
        block_id: &BlockId,
    ) -> Result<MaybePendingBlockWithTxs, ProviderError>;

    async fn get_block_with_tx_hashes(
        &self,
        block_id: &BlockId,
    ) -> Result<MaybePendingBlockWithTxHashes, ProviderError>;

    async fn get_events(
        &self,
        filter: &EventFilter,
        continuation_token: Option<String>,
        chunk_size: u64,
    ) -> Result<EventsPage, ProviderError>;

    async fn get_transaction_receipt(
        &self,
        transaction_hash: &FieldElement,
    ) -> Result<MaybePendingTransactionReceipt, ProviderError>;

    async fn get_class_at(
        &self,
        block_id: &BlockId,
        contract_address: &FieldElement,
    ) -> Result<ContractClass, ProviderError>;

    async fn call(
        &self,
        request: &FunctionCall,
        block_id: &BlockId,
    ) -> Result<Vec<FieldElement>, ProviderError>;

    async fn get_storage_at(
        &self,
        contract_address: &FieldElement,
        key: &FieldElement,
        block_id: &BlockId,
    ) -> Result<FieldElement, ProviderError>;

    async fn get_nonce(
        &self,
        block_id: &BlockId,
        contract_address: &FieldElement,
    ) -> Result<FieldElement, ProviderError>;
}
