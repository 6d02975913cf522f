//! Contract interfaces and named argument decoding.
//!
//! Decoding is best effort: failures are logged and the raw values are kept.
mod cache;
mod decode;
mod model;

use std::{fmt, sync::Arc};

use error_stack::{Report, Result, ResultExt};
use futures_util::future;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    block::{Log, Transaction},
    calldata::DecodedCall,
    core::Felt,
    datasource::Datasource,
    provider::{
        models::{BlockId, BlockTag, ContractClassExt},
        with_retry, StarknetApi,
    },
};

pub use self::cache::{AbiCache, AbiKey};
pub use self::decode::decode_members;
pub use self::model::{Abi, Event, Function, Member};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiError {
    /// The abi json is malformed.
    InvalidAbi,
    /// The datasource references an asset that doesn't exist.
    MissingAsset,
    /// The contract class has no abi or couldn't be fetched.
    Fetch,
    FunctionNotFound,
    EventNotFound,
    UnknownType,
    /// The values don't match the abi types.
    Decode,
}

impl error_stack::Context for AbiError {}

impl fmt::Display for AbiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiError::InvalidAbi => f.write_str("abi error: invalid abi"),
            AbiError::MissingAsset => f.write_str("abi error: missing asset"),
            AbiError::Fetch => f.write_str("abi error: failed to fetch abi"),
            AbiError::FunctionNotFound => f.write_str("abi error: function not found"),
            AbiError::EventNotFound => f.write_str("abi error: event not found"),
            AbiError::UnknownType => f.write_str("abi error: unknown type"),
            AbiError::Decode => f.write_str("abi error: decode failed"),
        }
    }
}

/// Decodes call arguments and log values using the datasource abi, or the abi
/// of the called contract.
pub struct AbiDecoder<A> {
    api: A,
    cache: AbiCache,
}

impl<A: StarknetApi> AbiDecoder<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            cache: AbiCache::new(),
        }
    }

    pub fn cache(&self) -> &AbiCache {
        &self.cache
    }

    /// Returns the transaction calls with their named arguments.
    ///
    /// Calls that can't be decoded keep only their raw calldata.
    pub async fn decode_transaction_calls(
        &self,
        tx: &Transaction,
        ds: &Datasource,
    ) -> Vec<DecodedCall> {
        let Some(calls) = tx.decoded_calls().filter(|calls| !calls.is_empty()) else {
            debug!(tx_hash = %tx.hash, "no decoded calls, skipping arguments decoding");
            return Vec::new();
        };

        future::join_all(calls.iter().map(|call| self.decode_call(call, ds))).await
    }

    pub async fn decode_call(&self, call: &DecodedCall, ds: &Datasource) -> DecodedCall {
        let mut call = call.clone();
        match self.try_decode_call(&call, ds).await {
            Ok(args) => call.decoded_args = Some(args),
            Err(err) => {
                warn!(
                    contract_address = %call.to,
                    error = ?err,
                    "could not decode call data"
                );
            }
        }
        call
    }

    /// Returns the log named values, `None` if they can't be decoded.
    pub async fn decode_log(&self, log: &Log, ds: &Datasource) -> Option<Map<String, Value>> {
        if ds.abi.is_none() {
            warn!(address = %log.address, "no abi provided for datasource");
            return None;
        }

        match self.try_decode_log(log, ds).await {
            Ok(args) => Some(args),
            Err(err) => {
                warn!(address = %log.address, error = ?err, "failed to parse log data");
                None
            }
        }
    }

    async fn try_decode_call(
        &self,
        call: &DecodedCall,
        ds: &Datasource,
    ) -> Result<Map<String, Value>, AbiError> {
        let abi = if ds.abi.is_some() && ds.address_felt() == Some(call.to) {
            self.local_abi(ds).await?
        } else {
            self.remote_abi(&call.to).await?
        };

        let function = abi.function(&call.selector)?;
        decode_members(&abi, &function.inputs, &call.calldata)
            .attach_printable_lazy(|| format!("function: {}", function.name))
    }

    async fn try_decode_log(&self, log: &Log, ds: &Datasource) -> Result<Map<String, Value>, AbiError> {
        let abi = self.local_abi(ds).await?;

        // The first key is the event selector.
        let Some((selector, keys)) = log.topics.split_first() else {
            return Err(AbiError::EventNotFound).attach_printable("log has no keys");
        };
        let event = abi.event(selector)?;

        let mut args = decode_members(&abi, &event.keys, keys)
            .attach_printable_lazy(|| format!("event keys: {}", event.name))?;
        let data = decode_members(&abi, &event.data, &log.data)
            .attach_printable_lazy(|| format!("event data: {}", event.name))?;
        args.extend(data);
        Ok(args)
    }

    async fn local_abi(&self, ds: &Datasource) -> Result<Arc<Abi>, AbiError> {
        let Some((name, contents)) = ds.abi_asset() else {
            return Err(AbiError::MissingAsset).attach_printable("datasource has no abi");
        };

        let Some(contents) = contents else {
            return Err(AbiError::MissingAsset)
                .attach_printable_lazy(|| format!("abi named {name} not referenced in assets"));
        };

        self.cache
            .get_or_try_insert_with(AbiKey::Asset(name.to_string()), || async {
                Abi::from_json(contents)
            })
            .await
    }

    async fn remote_abi(&self, address: &Felt) -> Result<Arc<Abi>, AbiError> {
        self.cache
            .get_or_try_insert_with(AbiKey::Address(*address), || async {
                debug!(%address, "fetching contract abi");
                let block_id = BlockId::Tag(BlockTag::Latest);
                let contract_address = address
                    .to_field_element()
                    .change_context(AbiError::Fetch)?;
                let class = with_retry(|_| self.api.get_class_at(&block_id, &contract_address))
                    .await
                    .change_context(AbiError::Fetch)?;
                let abi = class.abi_json().ok_or_else(|| {
                    Report::new(AbiError::Fetch).attach_printable("contract class has no abi")
                })?;
                Abi::from_value(&abi)
            })
            .await
            .attach_printable_lazy(|| format!("contract address: {address}"))
    }
}
