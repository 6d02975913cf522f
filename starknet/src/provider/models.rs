//! Json-rpc types, shared with the `starknet` client.
pub use starknet::core::types::{
    BlockHashAndNumber, BlockId, BlockStatus, BlockTag, BlockWithTxHashes, BlockWithTxs,
    ContractClass, EmittedEvent, EventFilter, EventsPage, FieldElement, FunctionCall,
    InvokeTransaction, L1HandlerTransaction, MaybePendingBlockWithTxHashes,
    MaybePendingBlockWithTxs, MaybePendingTransactionReceipt, Transaction, TransactionReceipt,
};

use serde_json::Value;

use crate::core::{Felt, Header};

pub trait BlockStatusExt {
    fn is_finalized(&self) -> bool;
    fn is_rejected(&self) -> bool;
}

impl BlockStatusExt for BlockStatus {
    fn is_finalized(&self) -> bool {
        *self == BlockStatus::AcceptedOnL1
    }

    fn is_rejected(&self) -> bool {
        *self == BlockStatus::Rejected
    }
}

pub trait BlockExt {
    /// Header of the block, `None` if the block is pending.
    fn header(&self) -> Option<Header>;
    fn status(&self) -> BlockStatus;
}

impl BlockExt for MaybePendingBlockWithTxHashes {
    fn header(&self) -> Option<Header> {
        match self {
            MaybePendingBlockWithTxHashes::Block(block) => Some(Header {
                block_height: block.block_number,
                block_hash: block.block_hash.into(),
                parent_hash: block.parent_hash.into(),
            }),
            MaybePendingBlockWithTxHashes::PendingBlock(_) => None,
        }
    }

    fn status(&self) -> BlockStatus {
        match self {
            MaybePendingBlockWithTxHashes::Block(block) => block.status,
            MaybePendingBlockWithTxHashes::PendingBlock(_) => BlockStatus::Pending,
        }
    }
}

impl BlockExt for MaybePendingBlockWithTxs {
    fn header(&self) -> Option<Header> {
        match self {
            MaybePendingBlockWithTxs::Block(block) => Some(Header {
                block_height: block.block_number,
                block_hash: block.block_hash.into(),
                parent_hash: block.parent_hash.into(),
            }),
            MaybePendingBlockWithTxs::PendingBlock(_) => None,
        }
    }

    fn status(&self) -> BlockStatus {
        match self {
            MaybePendingBlockWithTxs::Block(block) => block.status,
            MaybePendingBlockWithTxs::PendingBlock(_) => BlockStatus::Pending,
        }
    }
}

pub trait ContractClassExt {
    /// Abi of the class as json, `None` if the class has no abi.
    ///
    /// Cairo 1 classes carry the abi as a json string, Cairo 0 classes as entries.
    fn abi_json(&self) -> Option<Value>;
}

impl ContractClassExt for ContractClass {
    fn abi_json(&self) -> Option<Value> {
        match self {
            ContractClass::Sierra(class) if class.abi.is_empty() => None,
            ContractClass::Sierra(class) => Some(Value::String(class.abi.clone())),
            ContractClass::Legacy(class) => class
                .abi
                .as_ref()
                .and_then(|entries| serde_json::to_value(entries).ok()),
        }
    }
}

pub trait TransactionExt {
    fn hash(&self) -> Felt;
}

impl TransactionExt for Transaction {
    fn hash(&self) -> Felt {
        (*self.transaction_hash()).into()
    }
}
