//! Datasources and their handlers, as provided by the project manifest.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    core::Felt,
    filter::{BlockFilter, LogFilter, TransactionFilter},
};

pub const RUNTIME_DATASOURCE_KIND: &str = "starknet/Runtime";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datasource {
    pub kind: String,
    /// Contract the datasource is scoped to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Name of the asset containing the contract abi.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<String>,
    /// Asset name to file contents.
    #[serde(default)]
    pub assets: BTreeMap<String, String>,
    #[serde(default)]
    pub handlers: Vec<Handler>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handler {
    /// Name of the user function.
    pub handler: String,
    #[serde(flatten)]
    pub kind: HandlerKind,
}

/// Handler kind and its filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum HandlerKind {
    #[serde(rename = "starknet/BlockHandler")]
    Block {
        #[serde(default)]
        filter: BlockFilter,
    },
    #[serde(rename = "starknet/TransactionHandler")]
    Call {
        #[serde(default)]
        filter: TransactionFilter,
    },
    #[serde(rename = "starknet/LogHandler")]
    Event {
        #[serde(default)]
        filter: LogFilter,
    },
    /// Handlers of custom datasources, never matched.
    #[serde(other)]
    Unknown,
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Block { .. } => "starknet/BlockHandler",
            HandlerKind::Call { .. } => "starknet/TransactionHandler",
            HandlerKind::Event { .. } => "starknet/LogHandler",
            HandlerKind::Unknown => "unknown",
        }
    }
}

impl Datasource {
    /// The datasource address, parsed.
    pub fn address_felt(&self) -> Option<Felt> {
        self.address
            .as_deref()
            .and_then(|address| Felt::from_hex(address).ok())
    }

    /// Contents of the abi asset, if the datasource has one.
    pub fn abi_asset(&self) -> Option<(&str, Option<&str>)> {
        let name = self.abi.as_deref()?;
        Some((name, self.assets.get(name).map(String::as_str)))
    }
}
