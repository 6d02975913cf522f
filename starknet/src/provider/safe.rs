use std::{future::Future, time::Duration};

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use error_stack::{Result, ResultExt};
use tracing::warn;

use crate::core::Height;

use super::{
    error::ProviderError,
    models::{
        BlockId, ContractClass, EventFilter, EventsPage, FieldElement, FunctionCall,
        MaybePendingBlockWithTxHashes, MaybePendingBlockWithTxs, MaybePendingTransactionReceipt,
    },
    pool::{ConnectionPool, PooledConnection},
    StarknetApi,
};

/// Maximum number of attempts for a retryable request.
pub const MAX_ATTEMPTS: u32 = 5;

/// Read access to the chain state at a fixed block height.
///
/// Methods that need full block context are disabled and always fail with
/// [ProviderError::Unsupported].
#[async_trait]
pub trait HistoricalApi: Send + Sync {
    fn block_height(&self) -> Height;

    async fn chain_id(&self) -> Result<FieldElement, ProviderError>;

    async fn call(&self, request: &FunctionCall) -> Result<Vec<FieldElement>, ProviderError>;

    async fn get_storage_at(
        &self,
        contract_address: &FieldElement,
        key: &FieldElement,
    ) -> Result<FieldElement, ProviderError>;

    async fn get_nonce(&self, contract_address: &FieldElement) -> Result<FieldElement, ProviderError>;

    async fn get_class_at(
        &self,
        contract_address: &FieldElement,
    ) -> Result<ContractClass, ProviderError>;

    async fn get_block_with_txs(&self) -> Result<MaybePendingBlockWithTxs, ProviderError> {
        unsupported("get_block_with_txs")
    }

    async fn get_block_with_tx_hashes(&self) -> Result<MaybePendingBlockWithTxHashes, ProviderError> {
        unsupported("get_block_with_tx_hashes")
    }

    async fn get_transaction_receipt(
        &self,
        _transaction_hash: &FieldElement,
    ) -> Result<MaybePendingTransactionReceipt, ProviderError> {
        unsupported("get_transaction_receipt")
    }

    async fn get_events(
        &self,
        _filter: &EventFilter,
        _continuation_token: Option<String>,
        _chunk_size: u64,
    ) -> Result<EventsPage, ProviderError> {
        unsupported("get_events")
    }

    async fn block_number(&self) -> Result<Height, ProviderError> {
        unsupported("block_number")
    }
}

fn unsupported<T>(method: &str) -> Result<T, ProviderError> {
    Err(ProviderError::Unsupported)
        .attach_printable_lazy(|| format!("method {method} is not supported in safe view"))
}

/// Runs `operation` until it succeeds, fails with a non-retryable error or
/// runs out of attempts, waiting with exponential backoff between attempts.
///
/// The operation receives the attempt number, starting from 1.
pub async fn with_retry<T, F, Fut>(mut operation: F) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let exp_backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(50))
        .with_multiplier(2.0)
        .with_max_interval(Duration::from_secs(1))
        .with_max_elapsed_time(None)
        .build();

    let mut attempt = 0;
    backoff::future::retry(exp_backoff, || {
        attempt += 1;
        let current = attempt;
        let request = operation(current);
        async move {
            match request.await {
                Ok(value) => Ok(value),
                Err(err) if !err.current_context().is_retryable() => {
                    Err(backoff::Error::permanent(err))
                }
                Err(err) if current >= MAX_ATTEMPTS => Err(backoff::Error::permanent(
                    err.change_context(ProviderError::RetriesExhausted)
                        .attach_printable(format!("failed after {current} attempts")),
                )),
                Err(err) => {
                    warn!(attempt = current, error = ?err, "request failed, retrying");
                    Err(backoff::Error::transient(err))
                }
            }
        }
    })
    .await
}

/// View of a single connection bound to a block height.
pub struct SafeProvider<A> {
    api: A,
    block_height: Height,
}

impl<A: StarknetApi> SafeProvider<A> {
    pub fn new(api: A, block_height: Height) -> Self {
        Self { api, block_height }
    }

    fn block_id(&self) -> BlockId {
        BlockId::Number(self.block_height)
    }
}

#[async_trait]
impl<A: StarknetApi> HistoricalApi for SafeProvider<A> {
    fn block_height(&self) -> Height {
        self.block_height
    }

    async fn chain_id(&self) -> Result<FieldElement, ProviderError> {
        self.api.chain_id().await
    }

    async fn call(&self, request: &FunctionCall) -> Result<Vec<FieldElement>, ProviderError> {
        self.api.call(request, &self.block_id()).await
    }

    async fn get_storage_at(
        &self,
        contract_address: &FieldElement,
        key: &FieldElement,
    ) -> Result<FieldElement, ProviderError> {
        self.api
            .get_storage_at(contract_address, key, &self.block_id())
            .await
    }

    async fn get_nonce(&self, contract_address: &FieldElement) -> Result<FieldElement, ProviderError> {
        self.api
            .get_nonce(&self.block_id(), contract_address)
            .await
    }

    async fn get_class_at(
        &self,
        contract_address: &FieldElement,
    ) -> Result<ContractClass, ProviderError> {
        self.api
            .get_class_at(&self.block_id(), contract_address)
            .await
    }
}

/// Safe view that retries every request on a fresh connection.
pub struct RetryingSafeProvider<P> {
    pool: ConnectionPool<P>,
    block_height: Height,
}

impl<P: StarknetApi> RetryingSafeProvider<P> {
    pub fn new(pool: ConnectionPool<P>, block_height: Height) -> Self {
        Self { pool, block_height }
    }

    fn view(&self) -> SafeProvider<PooledConnection<P>> {
        SafeProvider::new(self.pool.connection(), self.block_height)
    }
}

#[async_trait]
impl<P: StarknetApi> HistoricalApi for RetryingSafeProvider<P> {
    fn block_height(&self) -> Height {
        self.block_height
    }

    async fn chain_id(&self) -> Result<FieldElement, ProviderError> {
        with_retry(|_| {
            let view = self.view();
            async move { view.chain_id().await }
        })
        .await
    }

    async fn call(&self, request: &FunctionCall) -> Result<Vec<FieldElement>, ProviderError> {
        with_retry(|_| {
            let view = self.view();
            async move { view.call(request).await }
        })
        .await
    }

    async fn get_storage_at(
        &self,
        contract_address: &FieldElement,
        key: &FieldElement,
    ) -> Result<FieldElement, ProviderError> {
        with_retry(|_| {
            let view = self.view();
            async move { view.get_storage_at(contract_address, key).await }
        })
        .await
    }

    async fn get_nonce(&self, contract_address: &FieldElement) -> Result<FieldElement, ProviderError> {
        with_retry(|_| {
            let view = self.view();
            async move { view.get_nonce(contract_address).await }
        })
        .await
    }

    async fn get_class_at(
        &self,
        contract_address: &FieldElement,
    ) -> Result<ContractClass, ProviderError> {
        with_retry(|_| {
            let view = self.view();
            async move { view.get_class_at(contract_address).await }
        })
        .await
    }
}
