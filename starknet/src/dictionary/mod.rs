//! Narrows the range of blocks to scan using a remote index.
//!
//! The planner compiles the datasources handlers into query entries, the
//! client sends them to the dictionary and returns the candidate heights.
//! A plan is only valid if it matches every block any handler could match,
//! when that's not possible the planner returns [DictionaryPlan::FullScan].
mod client;
mod planner;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::{
    core::{Header, Height},
    filter::{MatchOptions, ToPrecedence, TopicMatching},
    finality::HeaderSource,
};

pub use self::client::{CandidateHeights, DictionaryClient, DictionaryResponse};
pub use self::planner::{build_query_entries, plan, DictionaryPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryError {
    /// The dictionary url or client is misconfigured.
    Configuration,
    /// The request failed.
    Request,
    /// The dictionary returned an invalid response.
    Response,
}

impl error_stack::Context for DictionaryError {}

impl fmt::Display for DictionaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictionaryError::Configuration => f.write_str("dictionary error: configuration"),
            DictionaryError::Request => f.write_str("dictionary error: request failed"),
            DictionaryError::Response => f.write_str("dictionary error: invalid response"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DictionaryOptions {
    pub url: Option<Url>,
    /// Max number of heights requested at once.
    pub query_size: u64,
    /// Address lists longer than this are not sent to the dictionary.
    pub query_address_limit: usize,
    pub topic_matching: TopicMatching,
    pub to_precedence: ToPrecedence,
}

impl Default for DictionaryOptions {
    fn default() -> Self {
        Self {
            url: None,
            query_size: 10_000,
            query_address_limit: 100,
            topic_matching: TopicMatching::default(),
            to_precedence: ToPrecedence::default(),
        }
    }
}

impl DictionaryOptions {
    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            topic_matching: self.topic_matching,
            to_precedence: self.to_precedence,
        }
    }
}

/// Entity indexed by the dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Logs,
    Calls,
    Blocks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Matcher {
    EqualTo,
    In,
    Contains,
    IsNull,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Bool(bool),
    String(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueryCondition {
    pub field: String,
    pub matcher: Matcher,
    pub value: ConditionValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryEntry {
    pub entity: Entity,
    pub conditions: Vec<QueryCondition>,
}

impl QueryCondition {
    pub fn equal_to(field: &str, value: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            matcher: Matcher::EqualTo,
            value: ConditionValue::String(value.into()),
        }
    }

    pub fn is_in(field: &str, values: Vec<String>) -> Self {
        Self {
            field: field.to_string(),
            matcher: Matcher::In,
            value: ConditionValue::List(values),
        }
    }

    pub fn contains(field: &str, values: Vec<String>) -> Self {
        Self {
            field: field.to_string(),
            matcher: Matcher::Contains,
            value: ConditionValue::List(values),
        }
    }

    pub fn is_null(field: &str) -> Self {
        Self {
            field: field.to_string(),
            matcher: Matcher::IsNull,
            value: ConditionValue::Bool(true),
        }
    }
}

/// Highest height the dictionary may be queried up to.
///
/// Uses the finalized header known to the fork tracker. When the tracker has
/// none, as in linkage mode, the header comes from `source`. Returns `None`
/// and disables the dictionary when neither is available.
pub async fn finalized_bound<S: HeaderSource + ?Sized>(
    tracked: Option<&Header>,
    source: &S,
) -> Option<Height> {
    if let Some(header) = tracked {
        return Some(header.block_height);
    }

    match source.finalized_header().await {
        Ok(header) => Some(header.block_height),
        Err(err) => {
            warn!(error = ?err, "finalized block not available, dictionary disabled");
            None
        }
    }
}

/// Heights in `next..=end` the dictionary can answer for.
///
/// Blocks above `finalized` are always scanned.
pub fn dictionary_range(next: Height, end: Height, finalized: Height) -> Option<(Height, Height)> {
    (next <= finalized && next <= end).then(|| (next, end.min(finalized)))
}
