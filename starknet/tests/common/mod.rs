#![allow(dead_code)]
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use error_stack::{Report, Result};
use serde_json::{json, Value};
use strata_starknet::{
    core::{Felt, Header, Height},
    finality::{FinalityError, HeaderSource},
    provider::{
        models::{
            BlockHashAndNumber, BlockId, BlockTag, ContractClass, EventFilter, EventsPage, FieldElement,
            FunctionCall, MaybePendingBlockWithTxHashes, MaybePendingBlockWithTxs,
            MaybePendingTransactionReceipt,
        },
        ProviderError, StarknetApi,
    },
};

/// In memory chain served through the json-rpc api.
#[derive(Clone, Default)]
pub struct MockChain {
    inner: Arc<MockChainInner>,
}

#[derive(Default)]
struct MockChainInner {
    chain_id: Mutex<Option<Felt>>,
    blocks: Mutex<BTreeMap<Height, Value>>,
    events: Mutex<HashMap<Height, Vec<Value>>>,
    classes: Mutex<HashMap<Felt, Value>>,
    failures: Mutex<VecDeque<ProviderError>>,
    event_page_size: Mutex<Option<usize>>,
    calls: AtomicUsize,
    class_calls: AtomicUsize,
}

pub fn block_hash(height: Height) -> Felt {
    Felt::from(0xF000_0000 + height)
}

/// A block with the given transactions, hash and parent hash derived from the height.
pub fn block_json(height: Height, transactions: Vec<Value>) -> Value {
    json!({
        "status": "ACCEPTED_ON_L2",
        "block_hash": block_hash(height).to_hex(),
        "parent_hash": block_hash(height.saturating_sub(1)).to_hex(),
        "block_number": height,
        "new_root": "0x1",
        "timestamp": 1_700_000_000 + height,
        "sequencer_address": "0x1",
        "l1_gas_price": { "price_in_fri": "0x1", "price_in_wei": "0x1" },
        "starknet_version": "0.13.1",
        "transactions": transactions,
    })
}

pub fn invoke_json(hash: u64, sender: &str, calldata: Vec<String>) -> Value {
    json!({
        "transaction_hash": Felt::from(hash).to_hex(),
        "type": "INVOKE",
        "version": "0x1",
        "sender_address": sender,
        "calldata": calldata,
        "max_fee": "0x0",
        "signature": [],
        "nonce": "0x0",
    })
}

pub fn event_json(height: Height, tx_hash: u64, from: &str, keys: Vec<String>, data: Vec<String>) -> Value {
    json!({
        "from_address": from,
        "keys": keys,
        "data": data,
        "block_hash": block_hash(height).to_hex(),
        "block_number": height,
        "transaction_hash": Felt::from(tx_hash).to_hex(),
    })
}

impl MockChain {
    pub fn new() -> Self {
        let chain = Self::default();
        chain.set_chain_id(Felt::from(0x534e));
        chain
    }

    /// A chain with empty blocks from 0 to `head`.
    pub fn with_blocks(head: Height) -> Self {
        let chain = Self::new();
        for height in 0..=head {
            chain.insert_block(block_json(height, vec![]));
        }
        chain
    }

    pub fn set_chain_id(&self, chain_id: Felt) {
        *self.inner.chain_id.lock().unwrap() = Some(chain_id);
    }

    pub fn insert_block(&self, block: Value) {
        let height = block["block_number"].as_u64().unwrap();
        self.inner.blocks.lock().unwrap().insert(height, block);
    }

    pub fn insert_events(&self, height: Height, events: Vec<Value>) {
        self.inner.events.lock().unwrap().insert(height, events);
    }

    pub fn insert_class(&self, address: Felt, abi: Value) {
        self.inner.classes.lock().unwrap().insert(address, abi);
    }

    pub fn set_event_page_size(&self, size: usize) {
        *self.inner.event_page_size.lock().unwrap() = Some(size);
    }

    /// The next requests fail with these errors, one each.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.inner.failures.lock().unwrap().extend(errors);
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn class_calls(&self) -> usize {
        self.inner.class_calls.load(Ordering::SeqCst)
    }

    fn request(&self) -> Result<(), ProviderError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        match self.inner.failures.lock().unwrap().pop_front() {
            None => Ok(()),
            Some(error) => Err(Report::new(error).attach_printable("injected failure")),
        }
    }

    fn block(&self, block_id: &BlockId) -> Result<Value, ProviderError> {
        let blocks = self.inner.blocks.lock().unwrap();
        let block = match block_id {
            BlockId::Tag(_) => blocks.values().next_back(),
            BlockId::Number(height) => blocks.get(height),
            BlockId::Hash(hash) => {
                let hash = Felt::from(*hash).to_hex();
                blocks
                    .values()
                    .find(|block| block["block_hash"].as_str() == Some(hash.as_str()))
            }
        };

        match block {
            Some(block) => Ok(block.clone()),
            None => Err(Report::new(ProviderError::NotFound)
                .attach_printable(format!("block not found: {block_id:?}"))),
        }
    }
}

#[async_trait]
impl StarknetApi for MockChain {
    async fn chain_id(&self) -> Result<FieldElement, ProviderError> {
        self.request()?;
        let chain_id = self.inner.chain_id.lock().unwrap().unwrap_or_default();
        Ok(chain_id.to_field_element().unwrap())
    }

    async fn spec_version(&self) -> Result<String, ProviderError> {
        self.request()?;
        Ok("0.7.1".to_string())
    }

    async fn block_hash_and_number(&self) -> Result<BlockHashAndNumber, ProviderError> {
        self.request()?;
        let block = self.block(&BlockId::Tag(BlockTag::Latest))?;
        Ok(serde_json::from_value(block).unwrap())
    }

    async fn get_block_with_txs(
        &self,
        block_id: &BlockId,
    ) -> Result<MaybePendingBlockWithTxs, ProviderError> {
        self.request()?;
        let block = self.block(block_id)?;
        Ok(serde_json::from_value(block).unwrap())
    }

    async fn get_block_with_tx_hashes(
        &self,
        block_id: &BlockId,
    ) -> Result<MaybePendingBlockWithTxHashes, ProviderError> {
        self.request()?;
        let mut block = self.block(block_id)?;
        let hashes: Vec<Value> = block["transactions"]
            .as_array()
            .map(|txs| txs.iter().map(|tx| tx["transaction_hash"].clone()).collect())
            .unwrap_or_default();
        block["transactions"] = Value::Array(hashes);
        Ok(serde_json::from_value(block).unwrap())
    }

    async fn get_events(
        &self,
        filter: &EventFilter,
        continuation_token: Option<String>,
        chunk_size: u64,
    ) -> Result<EventsPage, ProviderError> {
        self.request()?;
        let Some(BlockId::Number(height)) = filter.from_block else {
            return Err(Report::new(ProviderError::BadRequest));
        };

        let events = self
            .inner
            .events
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .unwrap_or_default();
        let page_size = self
            .inner
            .event_page_size
            .lock()
            .unwrap()
            .unwrap_or(chunk_size as usize);

        let offset: usize = continuation_token
            .as_deref()
            .map(|token| token.parse().unwrap())
            .unwrap_or(0);
        let end = (offset + page_size).min(events.len());
        let continuation_token = (end < events.len()).then(|| end.to_string());

        Ok(serde_json::from_value(json!({
            "events": events[offset..end].to_vec(),
            "continuation_token": continuation_token,
        }))
        .unwrap())
    }

    async fn get_transaction_receipt(
        &self,
        transaction_hash: &FieldElement,
    ) -> Result<MaybePendingTransactionReceipt, ProviderError> {
        self.request()?;
        Ok(serde_json::from_value(json!({
            "type": "INVOKE",
            "transaction_hash": Felt::from(*transaction_hash).to_hex(),
            "actual_fee": { "amount": "0x0", "unit": "WEI" },
            "finality_status": "ACCEPTED_ON_L2",
            "block_hash": "0x1",
            "block_number": 1,
            "messages_sent": [],
            "events": [],
            "execution_resources": { "steps": 0 },
            "execution_status": "SUCCEEDED",
        }))
        .unwrap())
    }

    async fn get_class_at(
        &self,
        _block_id: &BlockId,
        contract_address: &FieldElement,
    ) -> Result<ContractClass, ProviderError> {
        self.request()?;
        self.inner.class_calls.fetch_add(1, Ordering::SeqCst);
        let address = Felt::from(*contract_address);
        match self.inner.classes.lock().unwrap().get(&address) {
            Some(abi) => Ok(serde_json::from_value(json!({
                "sierra_program": [],
                "contract_class_version": "0.1.0",
                "entry_points_by_type": { "CONSTRUCTOR": [], "EXTERNAL": [], "L1_HANDLER": [] },
                "abi": abi.to_string(),
            }))
            .unwrap()),
            None => Err(Report::new(ProviderError::NotFound)),
        }
    }

    async fn call(
        &self,
        _request: &FunctionCall,
        _block_id: &BlockId,
    ) -> Result<Vec<FieldElement>, ProviderError> {
        self.request()?;
        Ok(vec![FieldElement::ONE])
    }

    async fn get_storage_at(
        &self,
        _contract_address: &FieldElement,
        _key: &FieldElement,
        _block_id: &BlockId,
    ) -> Result<FieldElement, ProviderError> {
        self.request()?;
        Ok(FieldElement::ZERO)
    }

    async fn get_nonce(
        &self,
        _block_id: &BlockId,
        _contract_address: &FieldElement,
    ) -> Result<FieldElement, ProviderError> {
        self.request()?;
        Ok(FieldElement::ZERO)
    }
}

/// Hash of the canonical block at `height`.
pub fn canonical(height: Height) -> Felt {
    Felt::from(0xF000_0000 + height)
}

/// Hash of a block at `height` that was replaced by a fork.
pub fn stale(height: Height) -> Felt {
    Felt::from(0xA000_0000 + height)
}

pub fn canonical_header(height: Height) -> Header {
    Header {
        block_height: height,
        block_hash: canonical(height),
        parent_hash: canonical(height.saturating_sub(1)),
    }
}

pub fn stale_header(height: Height) -> Header {
    Header {
        block_height: height,
        block_hash: stale(height),
        parent_hash: stale(height.saturating_sub(1)),
    }
}

/// Header source where only the [canonical] hashes are on the chain.
///
/// Lookups by hash return a header at the height encoded in the hash, with a
/// canonical parent.
pub struct MockHeaders {
    finalized: Mutex<Header>,
}

impl MockHeaders {
    pub fn new(finalized: Height) -> Self {
        Self {
            finalized: Mutex::new(canonical_header(finalized)),
        }
    }

    pub fn set_finalized(&self, height: Height) {
        *self.finalized.lock().unwrap() = canonical_header(height);
    }
}

#[async_trait]
impl HeaderSource for MockHeaders {
    async fn header_for_height(&self, height: Height) -> Result<Header, FinalityError> {
        Ok(canonical_header(height))
    }

    async fn header_for_hash(&self, hash: &Felt) -> Result<Header, FinalityError> {
        let value = hash.to_u64().ok_or(FinalityError::Provider)?;
        let height = value % 0x1000_0000;
        Ok(Header {
            block_height: height,
            block_hash: *hash,
            parent_hash: canonical(height.saturating_sub(1)),
        })
    }

    async fn finalized_header(&self) -> Result<Header, FinalityError> {
        Ok(self.finalized.lock().unwrap().clone())
    }
}
