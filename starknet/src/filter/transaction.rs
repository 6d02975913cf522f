use serde::{Deserialize, Serialize};

use crate::{block::Transaction, core::Felt};

use super::{address_eq, parse_address, FieldMatch, MatchOptions, ToPrecedence};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TransactionFilter {
    /// Sender address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Target contract of one of the calls.
    #[serde(default, skip_serializing_if = "FieldMatch::is_any")]
    pub to: FieldMatch,
    /// Function name or selector of one of the calls.
    #[serde(default, skip_serializing_if = "FieldMatch::is_any")]
    pub function: FieldMatch,
    /// Transaction type, e.g. `INVOKE`.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

impl TransactionFilter {
    /// The function filter, with `"0x"` meaning no function.
    pub fn function_match(&self) -> FieldMatch {
        match &self.function {
            FieldMatch::Value(value) if value == "0x" => FieldMatch::Null,
            other => other.clone(),
        }
    }

    /// Address the calls must target, after applying the precedence rule.
    pub fn effective_to(&self, address: Option<&str>, precedence: ToPrecedence) -> FieldMatch {
        let datasource = address.map(|address| FieldMatch::Value(address.to_string()));
        match (precedence, datasource) {
            (ToPrecedence::Filter, Some(datasource)) if self.to.is_any() => datasource,
            (ToPrecedence::Datasource, Some(datasource)) => datasource,
            _ => self.to.clone(),
        }
    }
}

/// Returns true if the transaction matches the filter.
///
/// Calls are decoded only when the filter constrains them.
pub fn matches_transaction(
    tx: &Transaction,
    filter: &TransactionFilter,
    address: Option<&str>,
    options: &MatchOptions,
) -> bool {
    if let Some(ty) = &filter.type_ {
        if !ty.eq_ignore_ascii_case(tx.kind.as_str()) {
            return false;
        }
    }

    if let Some(from) = &filter.from {
        match &tx.sender_address {
            Some(sender) if address_eq(from, sender) => {}
            _ => return false,
        }
    }

    let to = filter.effective_to(address, options.to_precedence);
    let function = filter.function_match();

    if let Some(contract_address) = &tx.contract_address {
        match &to {
            FieldMatch::Null => return false,
            FieldMatch::Value(to) if !address_eq(to, contract_address) => return false,
            _ => {}
        }
    }

    if let Some(selector) = &tx.entry_point_selector {
        match &function {
            FieldMatch::Null => return false,
            FieldMatch::Value(function) if Felt::from_name_or_hex(function) != *selector => {
                return false
            }
            _ => {}
        }
    }

    if to.is_any() && function.is_any() {
        return true;
    }

    match tx.decoded_calls() {
        Some(calls) if !calls.is_empty() => {
            let function_ok = match &function {
                FieldMatch::Any => true,
                FieldMatch::Null => calls.iter().any(|call| call.selector.is_zero()),
                FieldMatch::Value(function) => {
                    let selector = Felt::from_name_or_hex(function);
                    calls.iter().any(|call| call.selector == selector)
                }
            };
            let to_ok = match &to {
                FieldMatch::Any => true,
                FieldMatch::Null => calls.iter().any(|call| call.to.is_zero()),
                FieldMatch::Value(to) => calls.iter().any(|call| address_eq(to, &call.to)),
            };
            function_ok && to_ok
        }
        _ => matches_raw_calldata(tx, &to, &function),
    }
}

/// Fallback when the calls can't be decoded, looks for the values in the raw
/// calldata.
fn matches_raw_calldata(tx: &Transaction, to: &FieldMatch, function: &FieldMatch) -> bool {
    let function_ok = match function {
        FieldMatch::Any => true,
        FieldMatch::Null => tx.entry_point_selector.is_none(),
        FieldMatch::Value(function) => {
            let selector = Felt::from_name_or_hex(function);
            tx.entry_point_selector == Some(selector) || tx.calldata.contains(&selector)
        }
    };

    let to_ok = match to {
        FieldMatch::Any => true,
        // No target at all, not even inside the calldata.
        FieldMatch::Null => tx.contract_address.is_none() && tx.calldata.is_empty(),
        FieldMatch::Value(to) => match parse_address(to) {
            Some(to) => tx.contract_address == Some(to) || tx.calldata.contains(&to),
            None => false,
        },
    };

    function_ok && to_ok
}
