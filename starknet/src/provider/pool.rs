use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};

use async_trait::async_trait;
use error_stack::{Result, ResultExt};
use tracing::{info, warn};

use crate::core::Felt;

use super::{
    error::{ApiErrorKind, ProviderError},
    models::{
        BlockExt, BlockHashAndNumber, BlockId, ContractClass, EventFilter, EventsPage,
        FieldElement, FunctionCall, MaybePendingBlockWithTxHashes, MaybePendingBlockWithTxs,
        MaybePendingTransactionReceipt,
    },
    StarknetApi,
};

/// Chain identity reported by an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMetadata {
    pub chain_id: Felt,
    pub spec_version: String,
    pub genesis_hash: Felt,
}

struct Connection<P> {
    endpoint: String,
    api: P,
    cooldown_until: Mutex<Option<Instant>>,
}

struct PoolInner<P> {
    connections: Vec<Connection<P>>,
    next: AtomicUsize,
}

/// A set of endpoints serving the same chain.
///
/// Requests are spread round-robin. An endpoint failing with a connectivity
/// error is skipped until its cooldown expires.
pub struct ConnectionPool<P> {
    inner: Arc<PoolInner<P>>,
    metadata: ConnectionMetadata,
}

/// A connection checked out of the pool.
///
/// Errors returned through it are reported back to the pool.
pub struct PooledConnection<P> {
    inner: Arc<PoolInner<P>>,
    index: usize,
}

impl<P> Clone for ConnectionPool<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl<P: StarknetApi> ConnectionPool<P> {
    /// Connects to all endpoints and checks they serve the same chain.
    pub async fn new(endpoints: Vec<(String, P)>) -> Result<Self, ProviderError> {
        if endpoints.is_empty() {
            return Err(ProviderError::Configuration).attach_printable("no endpoints configured");
        }

        let mut connections = Vec::with_capacity(endpoints.len());
        let mut metadata: Option<ConnectionMetadata> = None;

        for (endpoint, api) in endpoints {
            let endpoint_metadata = fetch_metadata(&api)
                .await
                .attach_printable_lazy(|| format!("endpoint: {endpoint}"))?;

            info!(
                endpoint = %endpoint,
                chain_id = %endpoint_metadata.chain_id,
                spec_version = %endpoint_metadata.spec_version,
                "connected to endpoint"
            );

            match &metadata {
                None => metadata = Some(endpoint_metadata),
                Some(expected) => check_metadata(expected, &endpoint_metadata)
                    .attach_printable_lazy(|| format!("endpoint: {endpoint}"))?,
            }

            connections.push(Connection {
                endpoint,
                api,
                cooldown_until: Mutex::new(None),
            });
        }

        let Some(metadata) = metadata else {
            return Err(ProviderError::Configuration).attach_printable("no endpoints configured");
        };

        let inner = PoolInner {
            connections,
            next: AtomicUsize::new(0),
        };

        Ok(Self {
            inner: Arc::new(inner),
            metadata,
        })
    }
}

impl<P> ConnectionPool<P> {
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.connections.is_empty()
    }

    /// Checks out the next available connection.
    ///
    /// If every endpoint is cooling down, the one that recovers first is used.
    pub fn connection(&self) -> PooledConnection<P> {
        let count = self.inner.connections.len();
        let start = self.inner.next.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        let mut earliest: Option<(usize, Instant)> = None;
        for offset in 0..count {
            let index = (start + offset) % count;
            match self.inner.connections[index].cooldown_until() {
                Some(until) if until > now => {
                    if earliest.map_or(true, |(_, e)| until < e) {
                        earliest = Some((index, until));
                    }
                }
                _ => return self.checkout(index),
            }
        }

        let index = earliest.map(|(index, _)| index).unwrap_or(start % count);
        self.checkout(index)
    }

    fn checkout(&self, index: usize) -> PooledConnection<P> {
        PooledConnection {
            inner: self.inner.clone(),
            index,
        }
    }
}

impl<P> Connection<P> {
    fn cooldown_until(&self) -> Option<Instant> {
        self.cooldown_until.lock().ok().and_then(|guard| *guard)
    }

    fn report_error(&self, kind: ApiErrorKind) {
        let Some(cooldown) = kind.cooldown() else {
            return;
        };
        warn!(endpoint = %self.endpoint, ?kind, ?cooldown, "endpoint cooling down");
        if let Ok(mut guard) = self.cooldown_until.lock() {
            *guard = Some(Instant::now() + cooldown);
        }
    }
}

impl<P> PooledConnection<P> {
    pub fn endpoint(&self) -> &str {
        &self.inner.connections[self.index].endpoint
    }

    async fn run<'a, T, F, Fut>(&'a self, f: F) -> Result<T, ProviderError>
    where
        F: FnOnce(&'a P) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>> + 'a,
    {
        let connection = &self.inner.connections[self.index];
        let result = f(&connection.api).await;
        if let Err(err) = &result {
            connection.report_error(ApiErrorKind::classify(err));
        }
        result.attach_printable_lazy(|| format!("endpoint: {}", connection.endpoint))
    }
}

async fn fetch_metadata<P: StarknetApi>(api: &P) -> Result<ConnectionMetadata, ProviderError> {
    let chain_id = api.chain_id().await?;
    let spec_version = api.spec_version().await?;
    let genesis = api
        .get_block_with_tx_hashes(&BlockId::Number(1))
        .await?
        .header()
        .ok_or(ProviderError::Response)
        .attach_printable("genesis block is pending")?;
    Ok(ConnectionMetadata {
        chain_id: chain_id.into(),
        spec_version,
        genesis_hash: genesis.block_hash,
    })
}

fn check_metadata(
    expected: &ConnectionMetadata,
    actual: &ConnectionMetadata,
) -> Result<(), ProviderError> {
    let mismatch = if expected.chain_id != actual.chain_id {
        Some("chain id")
    } else if expected.spec_version != actual.spec_version {
        Some("spec version")
    } else if expected.genesis_hash != actual.genesis_hash {
        Some("genesis hash")
    } else {
        None
    };

    match mismatch {
        None => Ok(()),
        Some(field) => Err(ProviderError::Configuration)
            .attach_printable(format!("Value of {field} does not match across all endpoints"))
            .attach_printable_lazy(|| format!("expected: {expected:?}"))
            .attach_printable_lazy(|| format!("actual: {actual:?}")),
    }
}

#[async_trait]
impl<P: StarknetApi> StarknetApi for PooledConnection<P> {
    async fn chain_id(&self) -> Result<FieldElement, ProviderError> {
        self.run(|api| api.chain_id()).await
    }

    async fn spec_version(&self) -> Result<String, ProviderError> {
        self.run(|api| api.spec_version()).await
    }

    async fn block_hash_and_number(&self) -> Result<BlockHashAndNumber, ProviderError> {
        self.run(|api| api.block_hash_and_number()).await
    }

    async fn get_block_with_txs(
        &self,
        block_id: &BlockId,
    ) -> Result<MaybePendingBlockWithTxs, ProviderError> {
        self.run(|api| api.get_block_with_txs(block_id)).await
    }

    async fn get_block_with_tx_hashes(
        &self,
        block_id: &BlockId,
    ) -> Result<MaybePendingBlockWithTxHashes, ProviderError> {
        self.run(|api| api.get_block_with_tx_hashes(block_id)).await
    }

    async fn get_events(
        &self,
        filter: &EventFilter,
        continuation_token: Option<String>,
        chunk_size: u64,
    ) -> Result<EventsPage, ProviderError> {
        self.run(|api| api.get_events(filter, continuation_token, chunk_size))
            .await
    }

    async fn get_transaction_receipt(
        &self,
        transaction_hash: &FieldElement,
    ) -> Result<MaybePendingTransactionReceipt, ProviderError> {
        self.run(|api| api.get_transaction_receipt(transaction_hash))
            .await
    }

    async fn get_class_at(
        &self,
        block_id: &BlockId,
        contract_address: &FieldElement,
    ) -> Result<ContractClass, ProviderError> {
        self.run(|api| api.get_class_at(block_id, contract_address))
            .await
    }

    async fn call(
        &self,
        request: &FunctionCall,
        block_id: &BlockId,
    ) -> Result<Vec<FieldElement>, ProviderError> {
        self.run(|api| api.call(request, block_id)).await
    }

    async fn get_storage_at(
        &self,
        contract_address: &FieldElement,
        key: &FieldElement,
        block_id: &BlockId,
    ) -> Result<FieldElement, ProviderError> {
        self.run(|api| api.get_storage_at(contract_address, key, block_id))
            .await
    }

    async fn get_nonce(
        &self,
        block_id: &BlockId,
        contract_address: &FieldElement,
    ) -> Result<FieldElement, ProviderError> {
        self.run(|api| api.get_nonce(block_id, contract_address))
            .await
    }
}

/// The pool itself serves requests on the next available connection.
#[async_trait]
impl<P: StarknetApi> StarknetApi for ConnectionPool<P> {
    async fn chain_id(&self) -> Result<FieldElement, ProviderError> {
        self.connection().chain_id().await
    }

    async fn spec_version(&self) -> Result<String, ProviderError> {
        self.connection().spec_version().await
    }

    async fn block_hash_and_number(&self) -> Result<BlockHashAndNumber, ProviderError> {
        self.connection().block_hash_and_number().await
    }

    async fn get_block_with_txs(
        &self,
        block_id: &BlockId,
    ) -> Result<MaybePendingBlockWithTxs, ProviderError> {
        self.connection().get_block_with_txs(block_id).await
    }

    async fn get_block_with_tx_hashes(
        &self,
        block_id: &BlockId,
    ) -> Result<MaybePendingBlockWithTxHashes, ProviderError> {
        self.connection().get_block_with_tx_hashes(block_id).await
    }

    async fn get_events(
        &self,
        filter: &EventFilter,
        continuation_token: Option<String>,
        chunk_size: u64,
    ) -> Result<EventsPage, ProviderError> {
        self.connection()
            .get_events(filter, continuation_token, chunk_size)
            .await
    }

    async fn get_transaction_receipt(
        &self,
        transaction_hash: &FieldElement,
    ) -> Result<MaybePendingTransactionReceipt, ProviderError> {
        self.connection()
            .get_transaction_receipt(transaction_hash)
            .await
    }

    async fn get_class_at(
        &self,
        block_id: &BlockId,
        contract_address: &FieldElement,
    ) -> Result<ContractClass, ProviderError> {
        self.connection()
            .get_class_at(block_id, contract_address)
            .await
    }

    async fn call(
        &self,
        request: &FunctionCall,
        block_id: &BlockId,
    ) -> Result<Vec<FieldElement>, ProviderError> {
        self.connection().call(request, block_id).await
    }

    async fn get_storage_at(
        &self,
        contract_address: &FieldElement,
        key: &FieldElement,
        block_id: &BlockId,
    ) -> Result<FieldElement, ProviderError> {
        self.connection()
            .get_storage_at(contract_address, key, block_id)
            .await
    }

    async fn get_nonce(
        &self,
        block_id: &BlockId,
        contract_address: &FieldElement,
    ) -> Result<FieldElement, ProviderError> {
        self.connection()
            .get_nonce(block_id, contract_address)
            .await
    }
}
