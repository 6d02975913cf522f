//! Chain primitives shared by every module.
use std::{
    fmt::{self, Display},
    hash::{Hash, Hasher},
};

use serde::{
    de::{Deserialize, Deserializer},
    ser::{Serialize, Serializer},
};
use starknet::core::{types::FieldElement, utils::starknet_keccak};

/// Block height.
pub type Height = u64;

/// A Starknet field element.
///
/// Equality, hashing and formatting are done on the numeric value, so
/// `0x01` and `0x0000001` compare equal.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Felt([u8; 32]);

#[derive(Debug, thiserror::Error)]
pub enum FeltDecodeError {
    #[error("missing 0x prefix")]
    MissingPrefix,
    #[error("field element size is invalid")]
    InvalidSize,
    #[error("hex decode error: {0}")]
    DecodeError(#[from] hex::FromHexError),
    #[error("value is not below the field prime")]
    OutOfRange,
}

impl Felt {
    pub const ZERO: Felt = Felt([0; 32]);

    /// Returns a new field element from the raw byte representation.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Felt(*bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, FeltDecodeError> {
        let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) else {
            return Err(FeltDecodeError::MissingPrefix);
        };

        // hex requires the string to be even-sized. If it's not, we copy it and add a leading 0.
        let bytes = if digits.len() % 2 == 1 {
            hex::decode(format!("0{digits}"))?
        } else {
            hex::decode(digits)?
        };

        let bytes = strip_leading_zeros(&bytes);
        let size = bytes.len();
        if size > 32 {
            return Err(FeltDecodeError::InvalidSize);
        }
        let mut bytes_array = [0u8; 32];
        bytes_array[32 - size..].copy_from_slice(bytes);
        Ok(Felt(bytes_array))
    }

    /// Parses either a hex value or a plain name.
    ///
    /// Names are turned into their selector, so `"Transfer"` and its
    /// `starknet_keccak` hash resolve to the same felt.
    pub fn from_name_or_hex(s: &str) -> Self {
        if is_hex(s) {
            if let Ok(felt) = Felt::from_hex(s) {
                return felt;
            }
        }
        encode_selector(s)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Converts to the field element used by the json-rpc client.
    pub fn to_field_element(&self) -> Result<FieldElement, FeltDecodeError> {
        FieldElement::from_bytes_be(&self.0).map_err(|_| FeltDecodeError::OutOfRange)
    }

    /// Returns the field element as a hex string with 0x prefix and no leading zeros.
    pub fn to_hex(&self) -> String {
        let encoded = hex::encode(self.0);
        let trimmed = encoded.trim_start_matches('0');
        if trimmed.is_empty() {
            "0x0".to_string()
        } else {
            format!("0x{trimmed}")
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }

    /// Returns the value as `u64` if it fits.
    pub fn to_u64(&self) -> Option<u64> {
        if self.0[..24].iter().any(|b| *b != 0) {
            return None;
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[24..]);
        Some(u64::from_be_bytes(buf))
    }

    /// Returns the value as `u128` if it fits.
    pub fn to_u128(&self) -> Option<u128> {
        if self.0[..16].iter().any(|b| *b != 0) {
            return None;
        }
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&self.0[16..]);
        Some(u128::from_be_bytes(buf))
    }
}

/// Returns true if `s` is a `0x` prefixed hex string with at least one digit.
pub fn is_hex(s: &str) -> bool {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(digits) => !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Returns the selector of a function or event name.
pub fn encode_selector(name: &str) -> Felt {
    let hash: FieldElement = starknet_keccak(name.as_bytes());
    hash.into()
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

impl From<u64> for Felt {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Felt(bytes)
    }
}

impl From<FieldElement> for Felt {
    fn from(value: FieldElement) -> Self {
        Felt(value.to_bytes_be())
    }
}

impl Display for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Felt({})", self.to_hex())
    }
}

impl Hash for Felt {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Serialize for Felt {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Felt {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Felt::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Lightweight block header, the unit tracked by the unfinalized window.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub block_height: Height,
    pub block_hash: Felt,
    pub parent_hash: Felt,
}
