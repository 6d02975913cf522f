use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::{
    core::Felt,
    datasource::{Datasource, HandlerKind},
    filter::{FieldMatch, LogFilter, ToPrecedence, TopicMatching, TransactionFilter, NOT_NULL_FILTER},
};

use super::{DictionaryOptions, Entity, QueryCondition, QueryEntry};

/// Outcome of planning the dictionary query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictionaryPlan {
    /// At least one handler can match any block, every block must be fetched.
    FullScan,
    Query {
        /// Entries sent to the dictionary, any entry matching selects the block.
        entries: Vec<QueryEntry>,
        /// Modulo of block handlers, their heights are computed locally.
        block_modulos: Vec<u64>,
    },
}

impl DictionaryPlan {
    pub fn is_full_scan(&self) -> bool {
        matches!(self, DictionaryPlan::FullScan)
    }
}

/// Handlers with the same kind and filter, and the addresses of their datasources.
struct HandlerGroup<'a> {
    kind: &'a HandlerKind,
    addresses: Vec<Option<&'a str>>,
}

/// Returns the dictionary query entries, empty if the dictionary can't be used.
pub fn build_query_entries(datasources: &[Datasource], options: &DictionaryOptions) -> Vec<QueryEntry> {
    match plan(datasources, options) {
        DictionaryPlan::FullScan => Vec::new(),
        DictionaryPlan::Query { entries, .. } => entries,
    }
}

pub fn plan(datasources: &[Datasource], options: &DictionaryOptions) -> DictionaryPlan {
    let mut entries = Vec::new();
    let mut block_modulos = Vec::new();

    for group in group_handlers(datasources) {
        let valid_addresses = group
            .addresses
            .iter()
            .filter_map(|address| address.filter(|address| Felt::from_hex(address).is_ok()))
            .count();

        match group.kind {
            HandlerKind::Block { filter } => match filter.modulo {
                Some(modulo) if modulo > 0 => {
                    if !block_modulos.contains(&modulo) {
                        block_modulos.push(modulo);
                    }
                }
                _ => {
                    debug!("block handler without modulo, dictionary disabled");
                    return DictionaryPlan::FullScan;
                }
            },
            HandlerKind::Call { filter } => {
                if !has_call_filter(filter) && valid_addresses == 0 {
                    debug!("transaction handler without filter, dictionary disabled");
                    return DictionaryPlan::FullScan;
                }
                entries.push(call_query_entry(filter, &group.addresses, options));
            }
            HandlerKind::Event { filter } => {
                if filter.topic_values().next().is_none() && valid_addresses == 0 {
                    debug!("log handler without filter, dictionary disabled");
                    return DictionaryPlan::FullScan;
                }
                entries.extend(log_query_entries(filter, &group.addresses, options));
            }
            HandlerKind::Unknown => {}
        }
    }

    let entries = dedup_entries(entries);
    debug!(
        entries = entries.len(),
        block_modulos = ?block_modulos,
        "dictionary query planned"
    );

    DictionaryPlan::Query {
        entries,
        block_modulos,
    }
}

/// Groups handlers by kind and filter, in the order they are first seen.
fn group_handlers(datasources: &[Datasource]) -> Vec<HandlerGroup<'_>> {
    let mut groups: Vec<HandlerGroup<'_>> = Vec::new();
    let mut index: HashMap<&HandlerKind, usize> = HashMap::new();

    for ds in datasources {
        let address = ds.address.as_deref();
        for handler in &ds.handlers {
            match index.get(&handler.kind) {
                Some(&i) => {
                    // The same handler can appear twice in a datasource.
                    if !groups[i].addresses.contains(&address) {
                        groups[i].addresses.push(address);
                    }
                }
                None => {
                    index.insert(&handler.kind, groups.len());
                    groups.push(HandlerGroup {
                        kind: &handler.kind,
                        addresses: vec![address],
                    });
                }
            }
        }
    }

    groups
}

fn has_call_filter(filter: &TransactionFilter) -> bool {
    filter.from.is_some()
        || filter.type_.is_some()
        || !filter.to.is_any()
        || !filter.function.is_any()
}

/// Condition on the datasources addresses.
///
/// Returns `None` if any datasource has no address, since that datasource
/// matches every address, or if there are too many addresses.
fn address_condition(
    field: &str,
    addresses: &[Option<&str>],
    options: &DictionaryOptions,
) -> Option<QueryCondition> {
    if addresses.is_empty() || addresses.len() > options.query_address_limit {
        return None;
    }

    let mut canonical = Vec::with_capacity(addresses.len());
    for address in addresses {
        let address = Felt::from_hex((*address)?).ok()?.to_hex();
        if !canonical.contains(&address) {
            canonical.push(address);
        }
    }
    let addresses = canonical;

    match addresses.as_slice() {
        [address] => Some(QueryCondition::equal_to(field, address.clone())),
        _ => Some(QueryCondition::is_in(field, addresses)),
    }
}

/// Minimal lowercase hex of a valid address, the lowercased input otherwise.
fn canonical_address(address: &str) -> String {
    Felt::from_hex(address)
        .map(|felt| felt.to_hex())
        .unwrap_or_else(|_| address.to_lowercase())
}

fn call_query_entry(
    filter: &TransactionFilter,
    addresses: &[Option<&str>],
    options: &DictionaryOptions,
) -> QueryEntry {
    let mut conditions = Vec::new();

    let datasource_to = address_condition("to", addresses, options);
    let filter_to = match &filter.to {
        FieldMatch::Any => None,
        FieldMatch::Null => Some(QueryCondition::is_null("to")),
        FieldMatch::Value(to) => Some(QueryCondition::equal_to("to", canonical_address(to))),
    };
    let has_address = addresses.iter().any(Option::is_some);

    if has_address && filter_to.is_some() {
        warn!(
            precedence = ?options.to_precedence,
            "transaction filter `to` conflicts with the datasource address"
        );
    }

    let to = match options.to_precedence {
        ToPrecedence::Filter => filter_to.or(datasource_to),
        // Datasources without address fall back to the filter.
        ToPrecedence::Datasource if has_address => datasource_to,
        ToPrecedence::Datasource => filter_to,
    };
    conditions.extend(to);

    if let Some(from) = &filter.from {
        conditions.push(QueryCondition::equal_to("from", canonical_address(from)));
    }

    if let Some(ty) = &filter.type_ {
        conditions.push(QueryCondition::equal_to("type", ty.clone()));
    }

    match filter.function_match() {
        FieldMatch::Any => {}
        FieldMatch::Null => conditions.push(QueryCondition::is_null("func")),
        FieldMatch::Value(function) => conditions.push(QueryCondition::equal_to(
            "func",
            Felt::from_name_or_hex(&function).to_hex(),
        )),
    }

    QueryEntry {
        entity: Entity::Calls,
        conditions,
    }
}

fn log_query_entries(
    filter: &LogFilter,
    addresses: &[Option<&str>],
    options: &DictionaryOptions,
) -> Vec<QueryEntry> {
    let address = address_condition("address", addresses, options);

    let entry = |topics: Option<Vec<String>>| {
        let mut conditions = Vec::new();
        conditions.extend(address.clone());
        if let Some(topics) = topics {
            conditions.push(QueryCondition::contains("topics", topics));
        }
        QueryEntry {
            entity: Entity::Logs,
            conditions,
        }
    };

    // `!null` matches any log with topics, no topic condition can express it.
    if filter.topic_values().any(|topic| topic == NOT_NULL_FILTER) {
        return vec![entry(None)];
    }

    let mut topics = Vec::new();
    for topic in filter.topic_values() {
        let topic = Felt::from_name_or_hex(topic).to_hex();
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    }

    if topics.is_empty() {
        return vec![entry(None)];
    }

    match options.topic_matching {
        // Logs need to contain only one of the topics, one entry each.
        TopicMatching::Permissive => topics
            .into_iter()
            .map(|topic| entry(Some(vec![topic])))
            .collect(),
        TopicMatching::Positional => vec![entry(Some(topics))],
    }
}

/// Removes entries with the same entity and conditions, regardless of the
/// conditions order.
fn dedup_entries(entries: Vec<QueryEntry>) -> Vec<QueryEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| {
            let mut conditions = entry.conditions.clone();
            conditions.sort();
            seen.insert((entry.entity, conditions))
        })
        .collect()
}
