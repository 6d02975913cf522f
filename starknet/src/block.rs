//! Canonical block, transaction and log model.
use std::{collections::HashMap, sync::OnceLock};

use error_stack::{Result, ResultExt};
use tokio::sync::OnceCell;
use tracing::warn;

use crate::{
    calldata::{decode_generic_calldata, decode_invoke_calldata, DecodedCall},
    core::{Felt, Header, Height},
    provider::{
        models::{
            BlockStatus, BlockWithTxs, EmittedEvent, InvokeTransaction,
            FieldElement, MaybePendingTransactionReceipt, Transaction as RawTransaction,
        },
        ProviderError, StarknetApi,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionType {
    Invoke,
    L1Handler,
    Declare,
    Deploy,
    DeployAccount,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Invoke => "INVOKE",
            TransactionType::L1Handler => "L1_HANDLER",
            TransactionType::Declare => "DECLARE",
            TransactionType::Deploy => "DEPLOY",
            TransactionType::DeployAccount => "DEPLOY_ACCOUNT",
        }
    }
}

/// A fully linked block.
///
/// Transactions and logs reference each other by index.
#[derive(Debug)]
pub struct NormalizedBlock {
    height: Height,
    hash: Felt,
    parent_hash: Felt,
    pub timestamp: u64,
    pub sequencer_address: Felt,
    pub status: BlockStatus,
    pub new_root: Felt,
    pub starknet_version: String,
    transactions: Vec<Transaction>,
    logs: Vec<Log>,
}

#[derive(Debug)]
pub struct Transaction {
    pub hash: Felt,
    pub kind: TransactionType,
    pub version: Option<Felt>,
    pub nonce: Option<Felt>,
    pub max_fee: Option<Felt>,
    pub sender_address: Option<Felt>,
    pub calldata: Vec<Felt>,
    pub entry_point_selector: Option<Felt>,
    pub contract_address: Option<Felt>,
    pub index: usize,
    log_indices: Vec<usize>,
    decoded_calls: OnceLock<Option<Vec<DecodedCall>>>,
    receipt: OnceCell<MaybePendingTransactionReceipt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub index: usize,
    pub address: Felt,
    pub topics: Vec<Felt>,
    pub data: Vec<Felt>,
    pub transaction_hash: Felt,
    /// Index of the owning transaction in the block, if present in the block.
    pub transaction_index: Option<usize>,
    pub block_height: Height,
    pub block_hash: Felt,
}

impl NormalizedBlock {
    /// Builds a block from the raw response and all its events.
    ///
    /// Logs are linked to their transaction by hash.
    pub fn new(block: BlockWithTxs, events: Vec<EmittedEvent>) -> Self {
        let mut transactions: Vec<Transaction> = block
            .transactions
            .into_iter()
            .enumerate()
            .map(|(index, tx)| Transaction::new(tx, index))
            .collect();

        let by_hash: HashMap<Felt, usize> = transactions
            .iter()
            .map(|tx| (tx.hash, tx.index))
            .collect();

        let logs: Vec<Log> = events
            .into_iter()
            .enumerate()
            .map(|(index, event)| {
                let transaction_hash = Felt::from(event.transaction_hash);
                let transaction_index = by_hash.get(&transaction_hash).copied();
                Log {
                    index,
                    address: event.from_address.into(),
                    topics: event.keys.into_iter().map(Felt::from).collect(),
                    data: event.data.into_iter().map(Felt::from).collect(),
                    transaction_hash,
                    transaction_index,
                    block_height: block.block_number,
                    block_hash: block.block_hash.into(),
                }
            })
            .collect();

        for log in &logs {
            if let Some(tx_index) = log.transaction_index {
                transactions[tx_index].log_indices.push(log.index);
            }
        }

        Self {
            height: block.block_number,
            hash: block.block_hash.into(),
            parent_hash: block.parent_hash.into(),
            timestamp: block.timestamp,
            sequencer_address: block.sequencer_address.into(),
            status: block.status,
            new_root: block.new_root.into(),
            starknet_version: block.starknet_version,
            transactions,
            logs,
        }
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn hash(&self) -> &Felt {
        &self.hash
    }

    pub fn parent_hash(&self) -> &Felt {
        &self.parent_hash
    }

    pub fn header(&self) -> Header {
        Header {
            block_height: self.height,
            block_hash: self.hash,
            parent_hash: self.parent_hash,
        }
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    /// Returns the logs emitted by the transaction, in block order.
    pub fn transaction_logs<'a>(&'a self, tx: &'a Transaction) -> impl Iterator<Item = &'a Log> {
        tx.log_indices.iter().filter_map(|index| self.logs.get(*index))
    }

    pub fn log_transaction(&self, log: &Log) -> Option<&Transaction> {
        log.transaction_index
            .and_then(|index| self.transactions.get(index))
    }
}

impl Transaction {
    fn new(tx: RawTransaction, index: usize) -> Self {
        let mut this = Self {
            hash: (*tx.transaction_hash()).into(),
            kind: TransactionType::Invoke,
            version: None,
            nonce: None,
            max_fee: None,
            sender_address: None,
            calldata: Vec::new(),
            entry_point_selector: None,
            contract_address: None,
            index,
            log_indices: Vec::new(),
            decoded_calls: OnceLock::new(),
            receipt: OnceCell::new(),
        };

        match tx {
            RawTransaction::Invoke(InvokeTransaction::V0(tx)) => {
                this.version = Some(Felt::ZERO);
                this.max_fee = Some(tx.max_fee.into());
                this.contract_address = Some(tx.contract_address.into());
                this.entry_point_selector = Some(tx.entry_point_selector.into());
                this.calldata = felts(tx.calldata);
            }
            RawTransaction::Invoke(InvokeTransaction::V1(tx)) => {
                this.version = Some(Felt::from(1));
                this.nonce = Some(tx.nonce.into());
                this.max_fee = Some(tx.max_fee.into());
                this.sender_address = Some(tx.sender_address.into());
                this.calldata = felts(tx.calldata);
            }
            RawTransaction::Invoke(InvokeTransaction::V3(tx)) => {
                this.version = Some(Felt::from(3));
                this.nonce = Some(tx.nonce.into());
                this.sender_address = Some(tx.sender_address.into());
                this.calldata = felts(tx.calldata);
            }
            RawTransaction::L1Handler(tx) => {
                this.kind = TransactionType::L1Handler;
                this.version = Some(tx.version.into());
                this.nonce = Some(Felt::from(tx.nonce));
                this.contract_address = Some(tx.contract_address.into());
                this.entry_point_selector = Some(tx.entry_point_selector.into());
                this.calldata = felts(tx.calldata);
            }
            RawTransaction::Declare(_) => this.kind = TransactionType::Declare,
            RawTransaction::Deploy(_) => this.kind = TransactionType::Deploy,
            RawTransaction::DeployAccount(_) => this.kind = TransactionType::DeployAccount,
        }

        this
    }

    pub fn log_indices(&self) -> &[usize] {
        &self.log_indices
    }

    /// Returns the calls in the transaction calldata, decoded on first access.
    ///
    /// `None` if the calldata cannot be decoded.
    pub fn decoded_calls(&self) -> Option<&[DecodedCall]> {
        self.decoded_calls
            .get_or_init(|| decode_transaction_calls(self))
            .as_deref()
    }

    /// Returns the transaction receipt, fetched on first access.
    pub async fn receipt<A>(&self, api: &A) -> Result<&MaybePendingTransactionReceipt, ProviderError>
    where
        A: StarknetApi + ?Sized,
    {
        self.receipt
            .get_or_try_init(|| async {
                let hash = self
                    .hash
                    .to_field_element()
                    .change_context(ProviderError::BadRequest)?;
                api.get_transaction_receipt(&hash).await
            })
            .await
    }

    fn is_invoke_v0(&self) -> bool {
        self.version.map_or(true, |version| version.is_zero())
    }
}

fn felts(values: Vec<FieldElement>) -> Vec<Felt> {
    values.into_iter().map(Felt::from).collect()
}

/// Extracts the calls of a transaction.
pub fn decode_transaction_calls(tx: &Transaction) -> Option<Vec<DecodedCall>> {
    if tx.kind == TransactionType::Invoke && !tx.is_invoke_v0() {
        return match decode_invoke_calldata(&tx.calldata) {
            Ok(calls) => Some(calls),
            Err(err) => {
                warn!(tx_hash = %tx.hash, error = ?err, "failed to decode invoke calldata");
                None
            }
        };
    }

    // L1 handler and invoke v0.
    match (&tx.contract_address, &tx.entry_point_selector) {
        (Some(to), Some(selector)) => {
            Some(vec![decode_generic_calldata(*to, *selector, &tx.calldata)])
        }
        _ => None,
    }
}

/// Json builders for blocks in unit tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::{json, Value};

    use crate::provider::models::BlockWithTxs;

    pub fn block(height: u64, timestamp: u64, transactions: Vec<Value>) -> BlockWithTxs {
        serde_json::from_value(json!({
            "status": "ACCEPTED_ON_L2",
            "block_hash": format!("{:#x}", 0x100 + height),
            "parent_hash": format!("{:#x}", 0xff + height),
            "block_number": height,
            "new_root": "0x0",
            "timestamp": timestamp,
            "sequencer_address": "0x1",
            "l1_gas_price": { "price_in_fri": "0x1", "price_in_wei": "0x1" },
            "starknet_version": "0.13.1",
            "transactions": transactions,
        }))
        .unwrap()
    }

    pub fn invoke_v1(hash: &str, sender: &str, calldata: Value) -> Value {
        json!({
            "transaction_hash": hash,
            "type": "INVOKE",
            "version": "0x1",
            "sender_address": sender,
            "calldata": calldata,
            "max_fee": "0x0",
            "signature": [],
            "nonce": "0x0",
        })
    }

    pub fn l1_handler(hash: &str, contract: &str, selector: &str, calldata: Value) -> Value {
        json!({
            "transaction_hash": hash,
            "type": "L1_HANDLER",
            "version": "0x0",
            "contract_address": contract,
            "entry_point_selector": selector,
            "calldata": calldata,
            "nonce": "0x0",
        })
    }
}
