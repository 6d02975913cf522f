use std::collections::HashMap;

use error_stack::{Report, Result, ResultExt};
use serde::Deserialize;
use serde_json::Value;

use crate::core::{encode_selector, Felt};

use super::AbiError;

/// A named, typed value in a function, struct, enum or event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Member {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub inputs: Vec<Member>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub keys: Vec<Member>,
    pub data: Vec<Member>,
}

/// Contract interface, indexed by selector.
#[derive(Debug, Clone, Default)]
pub struct Abi {
    functions: HashMap<Felt, Function>,
    events: HashMap<Felt, Event>,
    structs: HashMap<String, Vec<Member>>,
    enums: HashMap<String, Vec<Member>>,
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    inputs: Vec<Member>,
    #[serde(default)]
    members: Vec<Member>,
    #[serde(default)]
    variants: Vec<Member>,
    #[serde(default)]
    keys: Vec<Member>,
    #[serde(default)]
    data: Vec<Member>,
    #[serde(default)]
    items: Vec<Value>,
}

impl Abi {
    pub fn from_json(s: &str) -> Result<Self, AbiError> {
        let value: Value = serde_json::from_str(s)
            .change_context(AbiError::InvalidAbi)
            .attach_printable("abi is not valid json")?;
        Self::from_value(&value)
    }

    /// Parses Cairo 0 and Cairo 1 abis.
    ///
    /// Sierra classes return the abi as a json string, it's parsed too.
    pub fn from_value(value: &Value) -> Result<Self, AbiError> {
        let entries = match value {
            Value::String(inner) => return Self::from_json(inner),
            Value::Array(entries) => entries,
            _ => {
                return Err(AbiError::InvalidAbi).attach_printable("abi must be an array");
            }
        };

        let mut abi = Abi::default();
        for entry in entries {
            abi.add_entry(entry)?;
        }
        Ok(abi)
    }

    fn add_entry(&mut self, value: &Value) -> Result<(), AbiError> {
        let entry = RawEntry::deserialize(value)
            .change_context(AbiError::InvalidAbi)
            .attach_printable_lazy(|| format!("invalid abi entry: {value}"))?;

        match entry.ty.as_str() {
            "function" | "l1_handler" | "constructor" => {
                self.functions.insert(
                    encode_selector(&entry.name),
                    Function {
                        name: entry.name,
                        inputs: entry.inputs,
                    },
                );
            }
            "interface" => {
                for item in &entry.items {
                    self.add_entry(item)?;
                }
            }
            "struct" => {
                self.structs.insert(entry.name, entry.members);
            }
            "enum" => {
                self.enums.insert(entry.name, entry.variants);
            }
            "event" => self.add_event(entry),
            // impl, constructor-less entries.
            _ => {}
        }

        Ok(())
    }

    fn add_event(&mut self, entry: RawEntry) {
        let (keys, data) = match entry.kind.as_deref() {
            // Cairo 1, members are tagged with their location.
            Some("struct") => entry
                .members
                .into_iter()
                .partition(|member| member.kind.as_deref() == Some("key")),
            // Cairo 1 event enums only group other events.
            Some(_) => return,
            // Cairo 0.
            None => (entry.keys, entry.data),
        };

        let short_name = entry
            .name
            .rsplit("::")
            .next()
            .unwrap_or(entry.name.as_str())
            .to_string();

        self.events.insert(
            encode_selector(&short_name),
            Event {
                name: entry.name,
                keys,
                data,
            },
        );
    }

    pub fn function(&self, selector: &Felt) -> Result<&Function, AbiError> {
        self.functions.get(selector).ok_or_else(|| {
            Report::new(AbiError::FunctionNotFound)
                .attach_printable(format!("selector: {selector}"))
        })
    }

    pub fn event(&self, selector: &Felt) -> Result<&Event, AbiError> {
        self.events.get(selector).ok_or_else(|| {
            Report::new(AbiError::EventNotFound).attach_printable(format!("selector: {selector}"))
        })
    }

    pub fn struct_members(&self, name: &str) -> Option<&[Member]> {
        self.structs.get(name).map(Vec::as_slice)
    }

    pub fn enum_variants(&self, name: &str) -> Option<&[Member]> {
        self.enums.get(name).map(Vec::as_slice)
    }
}
