//! Predicates deciding if a block, transaction or log is relevant to a
//! datasource handler.
//!
//! All matching is pure and never fails: invalid filter values simply don't
//! match.
mod block;
mod log;
mod transaction;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::Felt;

pub use self::block::{matches_block, BlockFilter};
pub use self::log::{matches_log, LogFilter, NOT_NULL_FILTER};
pub use self::transaction::{matches_transaction, TransactionFilter};

/// How log topics are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TopicMatching {
    /// Any filter topic appearing in any position of the log matches.
    #[default]
    Permissive,
    /// Topics are compared position by position, up to 4 positions.
    Positional,
}

/// Which address wins when both the transaction filter `to` and the
/// datasource address are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ToPrecedence {
    #[default]
    Filter,
    Datasource,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    pub topic_matching: TopicMatching,
    pub to_precedence: ToPrecedence,
}

/// A filter field that distinguishes a missing value from an explicit `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum FieldMatch {
    /// Field not set, matches anything.
    #[default]
    Any,
    /// Explicitly `null`, matches only missing values.
    Null,
    Value(String),
}

impl FieldMatch {
    pub fn is_any(&self) -> bool {
        matches!(self, FieldMatch::Any)
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            FieldMatch::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for FieldMatch {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(match value {
            None => FieldMatch::Null,
            Some(value) => FieldMatch::Value(value),
        })
    }
}

impl Serialize for FieldMatch {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            FieldMatch::Any | FieldMatch::Null => serializer.serialize_none(),
            FieldMatch::Value(value) => serializer.serialize_str(value),
        }
    }
}

/// Parses an address from a filter, `None` if it's not valid hex.
pub(crate) fn parse_address(address: &str) -> Option<Felt> {
    Felt::from_hex(address).ok()
}

/// Same address after normalization.
pub(crate) fn address_eq(address: &str, other: &Felt) -> bool {
    parse_address(address).as_ref() == Some(other)
}
