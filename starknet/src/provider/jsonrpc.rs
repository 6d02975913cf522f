use std::{future::Future, num::NonZeroU32, time::Duration};

use async_trait::async_trait;
use error_stack::{Report, Result, ResultExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use starknet::{
    core::types::StarknetError,
    providers::{
        jsonrpc::{HttpTransport, HttpTransportError, JsonRpcClientError, JsonRpcError},
        JsonRpcClient, Provider, ProviderError as ClientError, Url,
    },
};

use crate::core::Felt;

use super::{
    error::ProviderError,
    models::{
        BlockHashAndNumber, BlockId, ContractClass, EventFilter, EventsPage, FieldElement,
        FunctionCall, MaybePendingBlockWithTxHashes, MaybePendingBlockWithTxs,
        MaybePendingTransactionReceipt,
    },
    StarknetApi,
};

#[derive(Debug, Clone)]
pub struct JsonRpcProviderOptions {
    /// Request timeout.
    pub timeout: Duration,
    /// Request headers.
    pub headers: HeaderMap<HeaderValue>,
    /// Requests per second.
    pub rate_limit: u32,
}

/// Json-rpc client for a single endpoint.
pub struct JsonRpcProvider {
    client: JsonRpcClient<HttpTransport>,
    url: Url,
    options: JsonRpcProviderOptions,
    limiter: DefaultDirectRateLimiter,
}

impl JsonRpcProvider {
    pub fn new(url: Url, options: JsonRpcProviderOptions) -> Result<Self, ProviderError> {
        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(ProviderError::Configuration)
                    .attach_printable_lazy(|| format!("unsupported protocol: {scheme}"));
            }
        }

        let mut headers = HeaderMap::new();
        let user_agent = format!("strata-starknet/{}", env!("CARGO_PKG_VERSION"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&user_agent)
                .change_context(ProviderError::Configuration)
                .attach_printable("failed to build user agent header")?,
        );
        headers.extend(options.headers.clone());

        // Query parameters are forwarded as headers, some providers authenticate that way.
        for (key, value) in url.query_pairs() {
            let name = HeaderName::from_bytes(key.as_bytes())
                .change_context(ProviderError::Configuration)
                .attach_printable_lazy(|| format!("invalid header name: {key}"))?;
            let value = HeaderValue::from_str(&value)
                .change_context(ProviderError::Configuration)
                .attach_printable_lazy(|| format!("invalid header value for {key}"))?;
            headers.insert(name, value);
        }

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .change_context(ProviderError::Configuration)
            .attach_printable("failed to build http client")?;

        let transport = HttpTransport::new_with_client(url.clone(), http_client);
        let client = JsonRpcClient::new(transport);
        let limiter = new_limiter(options.rate_limit);

        Ok(Self {
            client,
            url,
            options,
            limiter,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    async fn request<'a, T, F, Fut>(&'a self, method: &str, f: F) -> Result<T, ProviderError>
    where
        F: FnOnce(&'a JsonRpcClient<HttpTransport>) -> Fut,
        Fut: Future<Output = std::result::Result<T, ClientError>>,
    {
        self.limiter.until_ready().await;

        let Ok(response) = tokio::time::timeout(self.options.timeout, f(&self.client)).await
        else {
            return Err(ProviderError::Timeout)
                .attach_printable_lazy(|| {
                    format!(
                        "No response received from RPC endpoint in {}s",
                        self.options.timeout.as_secs()
                    )
                })
                .attach_printable_lazy(|| format!("method: {method}"));
        };

        response
            .map_err(|err| self.convert_error(err))
            .attach_printable_lazy(|| format!("method: {method}"))
    }

    fn convert_error(&self, err: ClientError) -> Report<ProviderError> {
        match err {
            ClientError::StarknetError(err) => convert_starknet_error(err),
            ClientError::RateLimited => Report::new(ProviderError::RateLimit)
                .attach_printable(format!("Rate Limited at endpoint: {}", self.host())),
            ClientError::ArrayLengthMismatch => Report::new(ClientError::ArrayLengthMismatch)
                .change_context(ProviderError::Response),
            ClientError::Other(inner) => {
                match inner
                    .as_any()
                    .downcast_ref::<JsonRpcClientError<HttpTransportError>>()
                {
                    Some(JsonRpcClientError::TransportError(HttpTransportError::Reqwest(err))) => {
                        self.convert_reqwest_error(err)
                    }
                    // Rate limited endpoints answer with a body that is not json-rpc.
                    Some(JsonRpcClientError::TransportError(HttpTransportError::Json(err))) => {
                        Report::new(ProviderError::RateLimit)
                            .attach_printable(format!("Rate Limited at endpoint: {}", self.host()))
                            .attach_printable(format!("invalid json-rpc response: {err}"))
                    }
                    Some(JsonRpcClientError::JsonRpcError(err)) => convert_rpc_error(err),
                    Some(JsonRpcClientError::JsonError(err)) => Report::new(ProviderError::Response)
                        .attach_printable(format!("invalid response: {err}")),
                    None => Report::new(ProviderError::Server)
                        .attach_printable(format!("client error: {inner}")),
                }
            }
        }
    }

    fn convert_reqwest_error(&self, err: &reqwest::Error) -> Report<ProviderError> {
        let context = if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() || err.is_body() {
            ProviderError::Response
        } else {
            ProviderError::Network
        };

        let report = Report::new(context).attach_printable(err.to_string());
        if context == ProviderError::Network {
            report.attach_printable(format!("disconnected from {}", self.host()))
        } else {
            report
        }
    }
}

fn new_limiter(rate_limit: u32) -> DefaultDirectRateLimiter {
    let quota_per_second = NonZeroU32::new(rate_limit).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::per_second(quota_per_second).allow_burst(quota_per_second);
    RateLimiter::direct(quota)
}

fn convert_starknet_error(err: StarknetError) -> Report<ProviderError> {
    let context = match &err {
        StarknetError::ContractNotFound
        | StarknetError::BlockNotFound
        | StarknetError::ClassHashNotFound
        | StarknetError::TransactionHashNotFound
        | StarknetError::NoBlocks => ProviderError::NotFound,
        StarknetError::UnexpectedError(_) => ProviderError::Server,
        _ => ProviderError::BadRequest,
    };
    Report::new(ClientError::StarknetError(err)).change_context(context)
}

fn convert_rpc_error(error: &JsonRpcError) -> Report<ProviderError> {
    let context = match error.code {
        -32601 => ProviderError::Unimplemented,
        -32600 | -32602 | -32700 => ProviderError::BadRequest,
        _ if error.message.contains("Rate limit reached") => ProviderError::RateLimit,
        _ => ProviderError::Server,
    };

    let report = Report::new(context)
        .attach_printable(format!("json-rpc error {}: {}", error.code, error.message));
    match &error.data {
        Some(data) => report.attach_printable(format!("data: {data}")),
        None => report,
    }
}

#[async_trait]
impl StarknetApi for JsonRpcProvider {
    async fn chain_id(&self) -> Result<FieldElement, ProviderError> {
        self.request("starknet_chainId", |client| client.chain_id())
            .await
    }

    async fn spec_version(&self) -> Result<String, ProviderError> {
        self.request("starknet_specVersion", |client| client.spec_version())
            .await
    }

    async fn block_hash_and_number(&self) -> Result<BlockHashAndNumber, ProviderError> {
        self.request("starknet_blockHashAndNumber", |client| {
            client.block_hash_and_number()
        })
        .await
    }

    async fn get_block_with_txs(
        &self,
        block_id: &BlockId,
    ) -> Result<MaybePendingBlockWithTxs, ProviderError> {
        self.request("starknet_getBlockWithTxs", |client| {
            client.get_block_with_txs(block_id)
        })
        .await
        .attach_printable_lazy(|| format!("block id: {block_id:?}"))
    }

    async fn get_block_with_tx_hashes(
        &self,
        block_id: &BlockId,
    ) -> Result<MaybePendingBlockWithTxHashes, ProviderError> {
        self.request("starknet_getBlockWithTxHashes", |client| {
            client.get_block_with_tx_hashes(block_id)
        })
        .await
        .attach_printable_lazy(|| format!("block id: {block_id:?}"))
    }

    async fn get_events(
        &self,
        filter: &EventFilter,
        continuation_token: Option<String>,
        chunk_size: u64,
    ) -> Result<EventsPage, ProviderError> {
        self.request("starknet_getEvents", |client| {
            client.get_events(filter.clone(), continuation_token, chunk_size)
        })
        .await
        .attach_printable_lazy(|| format!("from block: {:?}", filter.from_block))
    }

    async fn get_transaction_receipt(
        &self,
        transaction_hash: &FieldElement,
    ) -> Result<MaybePendingTransactionReceipt, ProviderError> {
        self.request("starknet_getTransactionReceipt", |client| {
            client.get_transaction_receipt(transaction_hash)
        })
        .await
        .attach_printable_lazy(|| format!("transaction hash: {}", Felt::from(*transaction_hash)))
    }

    async fn get_class_at(
        &self,
        block_id: &BlockId,
        contract_address: &FieldElement,
    ) -> Result<ContractClass, ProviderError> {
        self.request("starknet_getClassAt", |client| {
            client.get_class_at(block_id, contract_address)
        })
        .await
        .attach_printable_lazy(|| format!("contract address: {}", Felt::from(*contract_address)))
    }

    async fn call(
        &self,
        request: &FunctionCall,
        block_id: &BlockId,
    ) -> Result<Vec<FieldElement>, ProviderError> {
        self.request("starknet_call", |client| client.call(request, block_id))
            .await
    }

    async fn get_storage_at(
        &self,
        contract_address: &FieldElement,
        key: &FieldElement,
        block_id: &BlockId,
    ) -> Result<FieldElement, ProviderError> {
        self.request("starknet_getStorageAt", |client| {
            client.get_storage_at(contract_address, key, block_id)
        })
        .await
    }

    async fn get_nonce(
        &self,
        block_id: &BlockId,
        contract_address: &FieldElement,
    ) -> Result<FieldElement, ProviderError> {
        self.request("starknet_getNonce", |client| {
            client.get_nonce(block_id, contract_address)
        })
        .await
    }
}
