//! Decoding of felt words into json values using the abi types.
use error_stack::{Report, Result, ResultExt};
use serde_json::{Map, Number, Value};
use starknet::core::types::FieldElement;

use crate::core::Felt;

use super::{model::Member, Abi, AbiError};

/// Decodes `members` from `words`, all words must be used.
pub fn decode_members(
    abi: &Abi,
    members: &[Member],
    words: &[Felt],
) -> Result<Map<String, Value>, AbiError> {
    let mut reader = FeltReader::new(words);
    let values = reader.read_members(abi, members)?;
    if reader.remaining() > 0 {
        return Err(AbiError::Decode)
            .attach_printable_lazy(|| format!("{} words left after decoding", reader.remaining()));
    }
    Ok(values)
}

struct FeltReader<'a> {
    words: &'a [Felt],
    position: usize,
}

impl<'a> FeltReader<'a> {
    fn new(words: &'a [Felt]) -> Self {
        Self { words, position: 0 }
    }

    fn remaining(&self) -> usize {
        self.words.len() - self.position
    }

    fn next(&mut self) -> Result<Felt, AbiError> {
        let word = self.words.get(self.position).copied().ok_or_else(|| {
            Report::new(AbiError::Decode).attach_printable("not enough words")
        })?;
        self.position += 1;
        Ok(word)
    }

    fn next_len(&mut self) -> Result<usize, AbiError> {
        let word = self.next()?;
        let len = word
            .to_u64()
            .and_then(|len| usize::try_from(len).ok())
            .ok_or_else(|| {
                Report::new(AbiError::Decode).attach_printable(format!("invalid length {word}"))
            })?;
        if len > self.remaining() {
            return Err(AbiError::Decode)
                .attach_printable_lazy(|| format!("length {len} exceeds input"));
        }
        Ok(len)
    }

    fn read_members(
        &mut self,
        abi: &Abi,
        members: &[Member],
    ) -> Result<Map<String, Value>, AbiError> {
        let mut values = Map::new();
        for member in members {
            let value = if let Some(item) = member.ty.strip_suffix('*') {
                // Cairo 0 arrays, the length is the previous `<name>_len` member.
                let len_key = format!("{}_len", member.name);
                let len = values
                    .get(&len_key)
                    .and_then(Value::as_str)
                    .and_then(|len| Felt::from_hex(len).ok())
                    .and_then(|len| len.to_u64())
                    .ok_or_else(|| {
                        Report::new(AbiError::Decode)
                            .attach_printable(format!("missing length member {len_key}"))
                    })?;
                self.read_items(abi, item, len as usize)?
            } else {
                self.read_value(abi, &member.ty)?
            };
            values.insert(member.name.clone(), value);
        }
        Ok(values)
    }

    fn read_items(&mut self, abi: &Abi, ty: &str, len: usize) -> Result<Value, AbiError> {
        if len > self.remaining() {
            return Err(AbiError::Decode)
                .attach_printable_lazy(|| format!("array of {len} items exceeds input"));
        }
        let items = (0..len)
            .map(|_| self.read_value(abi, ty))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Array(items))
    }

    fn read_value(&mut self, abi: &Abi, ty: &str) -> Result<Value, AbiError> {
        let ty = ty.trim();
        if ty == "()" {
            return Ok(Value::Null);
        }

        if let Some(inner) = ty.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
            let items = split_top_level(inner)
                .into_iter()
                .map(|item| self.read_value(abi, item))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Value::Array(items));
        }

        if let Some((base, inner)) = generic_type(ty) {
            return match base {
                "core::array::Array" | "core::array::Span" => {
                    let len = self.next_len()?;
                    self.read_items(abi, inner, len)
                }
                "core::option::Option" => match self.next()?.to_u64() {
                    Some(0) => self.read_value(abi, inner),
                    Some(1) => Ok(Value::Null),
                    _ => Err(AbiError::Decode).attach_printable("invalid option variant"),
                },
                _ => self.read_enum_or_struct(abi, ty),
            };
        }

        match ty {
            "felt" | "felt252" | "core::felt252" | "core::starknet::contract_address::ContractAddress"
            | "core::starknet::class_hash::ClassHash" | "core::starknet::eth_address::EthAddress"
            | "core::bytes_31::bytes31" => Ok(Value::String(self.next()?.to_hex())),
            "core::bool" => Ok(Value::Bool(!self.next()?.is_zero())),
            "core::integer::u8" | "core::integer::u16" | "core::integer::u32"
            | "core::integer::u64" | "core::integer::usize" => {
                let word = self.next()?;
                let value = word.to_u64().ok_or_else(|| {
                    Report::new(AbiError::Decode).attach_printable(format!("{word} overflows {ty}"))
                })?;
                Ok(Value::Number(value.into()))
            }
            "core::integer::u128" => {
                let word = self.next()?;
                let value = word.to_u128().ok_or_else(|| {
                    Report::new(AbiError::Decode).attach_printable(format!("{word} overflows u128"))
                })?;
                Ok(Value::String(value.to_string()))
            }
            "core::integer::i8" | "core::integer::i16" | "core::integer::i32"
            | "core::integer::i64" => {
                let value = decode_signed(self.next()?)?;
                let value = i64::try_from(value)
                    .change_context(AbiError::Decode)
                    .attach_printable_lazy(|| format!("{value} overflows {ty}"))?;
                Ok(Value::Number(Number::from(value)))
            }
            "core::integer::i128" => Ok(Value::String(decode_signed(self.next()?)?.to_string())),
            "Uint256" | "core::integer::u256" => {
                let low = self.next()?;
                let high = self.next()?;
                Ok(Value::String(encode_u256(low, high)?))
            }
            "core::byte_array::ByteArray" => self.read_byte_array(),
            _ => self.read_enum_or_struct(abi, ty),
        }
    }

    fn read_enum_or_struct(&mut self, abi: &Abi, ty: &str) -> Result<Value, AbiError> {
        if let Some(members) = abi.struct_members(ty) {
            return self.read_members(abi, members).map(Value::Object);
        }

        if let Some(variants) = abi.enum_variants(ty) {
            let index = self.next()?;
            let variant = index
                .to_u64()
                .and_then(|index| variants.get(index as usize))
                .ok_or_else(|| {
                    Report::new(AbiError::Decode)
                        .attach_printable(format!("invalid variant {index} for {ty}"))
                })?;
            let value = self.read_value(abi, &variant.ty)?;
            let mut object = Map::new();
            object.insert(variant.name.clone(), value);
            return Ok(Value::Object(object));
        }

        Err(AbiError::UnknownType).attach_printable_lazy(|| format!("type: {ty}"))
    }

    fn read_byte_array(&mut self) -> Result<Value, AbiError> {
        let len = self.next_len()?;
        let mut bytes = Vec::with_capacity(len * 31);
        for _ in 0..len {
            bytes.extend_from_slice(&self.next()?.to_bytes()[1..]);
        }

        let pending_word = self.next()?.to_bytes();
        let pending_len = self
            .next()?
            .to_u64()
            .filter(|len| *len <= 31)
            .ok_or_else(|| {
                Report::new(AbiError::Decode).attach_printable("invalid pending word length")
            })? as usize;
        bytes.extend_from_slice(&pending_word[32 - pending_len..]);

        Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Splits `core::array::Array::<T>` into `("core::array::Array", "T")`.
fn generic_type(ty: &str) -> Option<(&str, &str)> {
    let start = ty.find("::<")?;
    let inner = ty[start + 3..].strip_suffix('>')?;
    Some((&ty[..start], inner))
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '<' | '(' => depth += 1,
            '>' | ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = s[start..].trim();
    if !last.is_empty() {
        items.push(last);
    }
    items
}

/// Signed integers are stored modulo the field prime.
fn decode_signed(word: Felt) -> Result<i128, AbiError> {
    if let Some(value) = word.to_u128().and_then(|v| i128::try_from(v).ok()) {
        return Ok(value);
    }

    let element = FieldElement::from_bytes_be(&word.to_bytes()).map_err(|_| {
        Report::new(AbiError::Decode).attach_printable("value is not a field element")
    })?;
    let negated = Felt::from(FieldElement::ZERO - element);
    negated
        .to_u128()
        .and_then(|v| i128::try_from(v).ok())
        .map(|v| -v)
        .ok_or_else(|| {
            Report::new(AbiError::Decode).attach_printable(format!("{word} overflows i128"))
        })
}

fn encode_u256(low: Felt, high: Felt) -> Result<String, AbiError> {
    let (Some(low), Some(high)) = (low.to_u128(), high.to_u128()) else {
        return Err(AbiError::Decode).attach_printable("u256 limb overflows u128");
    };
    if high == 0 {
        Ok(format!("{low:#x}"))
    } else {
        Ok(format!("{high:#x}{low:032x}"))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::{decode_members, decode_signed, split_top_level};
    use crate::{
        abi::{model::Member, Abi, AbiError},
        core::Felt,
    };

    fn member(name: &str, ty: &str) -> Member {
        Member {
            name: name.to_string(),
            ty: ty.to_string(),
            kind: None,
        }
    }

    fn felts(words: &[u64]) -> Vec<Felt> {
        words.iter().copied().map(Felt::from).collect()
    }

    #[test]
    fn test_decode_cairo1_values() {
        let abi = Abi::from_value(&json!([
            {
                "type": "struct",
                "name": "pool::Position",
                "members": [
                    { "name": "owner", "type": "core::starknet::contract_address::ContractAddress" },
                    { "name": "active", "type": "core::bool" }
                ]
            },
            {
                "type": "enum",
                "name": "pool::Side",
                "variants": [
                    { "name": "Buy", "type": "()" },
                    { "name": "Sell", "type": "core::integer::u8" }
                ]
            }
        ]))
        .unwrap();

        let members = vec![
            member("amount", "core::integer::u256"),
            member("ids", "core::array::Array::<core::integer::u32>"),
            member("position", "pool::Position"),
            member("side", "pool::Side"),
            member("maybe", "core::option::Option::<core::felt252>"),
        ];
        let words = felts(&[5, 0, 2, 7, 8, 0xabc, 1, 1, 3, 1]);

        let values = decode_members(&abi, &members, &words).unwrap();
        assert_eq!(
            serde_json::Value::Object(values),
            json!({
                "amount": "0x5",
                "ids": [7, 8],
                "position": { "owner": "0xabc", "active": true },
                "side": { "Sell": 3 },
                "maybe": null
            })
        );
    }

    #[test]
    fn test_decode_cairo0_array_with_length() {
        let members = vec![member("calldata_len", "felt"), member("calldata", "felt*")];
        let values = decode_members(&Abi::default(), &members, &felts(&[2, 10, 11])).unwrap();
        assert_eq!(values["calldata"], json!(["0xa", "0xb"]));
    }

    #[test]
    fn test_decode_u256_high_limb() {
        let members = vec![member("value", "Uint256")];
        let values = decode_members(&Abi::default(), &members, &felts(&[1, 1])).unwrap();
        assert_eq!(values["value"], json!("0x100000000000000000000000000000001"));
    }

    #[test]
    fn test_decode_byte_array() {
        let members = vec![member("name", "core::byte_array::ByteArray")];
        // "hi" as pending word.
        let values = decode_members(&Abi::default(), &members, &felts(&[0, 0x6869, 2])).unwrap();
        assert_eq!(values["name"], json!("hi"));
    }

    #[test]
    fn test_decode_errors() {
        let members = vec![member("a", "core::felt252"), member("b", "core::felt252")];
        let err = decode_members(&Abi::default(), &members, &felts(&[1])).unwrap_err();
        assert_matches!(err.current_context(), AbiError::Decode);

        let err = decode_members(&Abi::default(), &members, &felts(&[1, 2, 3])).unwrap_err();
        assert_matches!(err.current_context(), AbiError::Decode);

        let members = vec![member("a", "some::Unknown")];
        let err = decode_members(&Abi::default(), &members, &felts(&[1])).unwrap_err();
        assert_matches!(err.current_context(), AbiError::UnknownType);
    }

    #[test]
    fn test_decode_negative_integer() {
        // p - 5
        let word = Felt::from_hex(
            "0x800000000000010fffffffffffffffffffffffffffffffffffffffffffffffc",
        )
        .unwrap();
        assert_eq!(decode_signed(word).unwrap(), -5);
        assert_eq!(decode_signed(Felt::from(5)).unwrap(), 5);
    }

    #[test]
    fn test_split_tuple_types() {
        assert_eq!(
            split_top_level("core::felt252, (core::bool, core::integer::u8)"),
            vec!["core::felt252", "(core::bool, core::integer::u8)"]
        );
    }
}
