//! Decoding of multi-call invoke payloads.
//!
//! Account contracts encode the list of calls in two layouts.
//!
//! Legacy layout, one shared data segment:
//!
//! ```txt
//! [n, (to, selector, data_offset, data_len) * n, calldata_len, data...]
//! ```
//!
//! New layout, data inline after each call:
//!
//! ```txt
//! [n, (to, selector, data_len, data...) * n]
//! ```
use std::fmt;

use error_stack::{Report, Result, ResultExt};
use serde::Serialize;

use crate::core::Felt;

/// A contract call extracted from a transaction calldata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedCall {
    pub to: Felt,
    pub selector: Felt,
    pub calldata: Vec<Felt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoded_args: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeCalldataError {
    /// The input ended before all declared words were read.
    Truncated,
    /// A length or offset doesn't fit in memory.
    InvalidLength,
    /// Declared total length doesn't match the per-call lengths.
    LengthMismatch,
    /// Words left over after the last call.
    TrailingData,
}

impl error_stack::Context for DecodeCalldataError {}

impl fmt::Display for DecodeCalldataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeCalldataError::Truncated => f.write_str("calldata error: truncated"),
            DecodeCalldataError::InvalidLength => f.write_str("calldata error: invalid length"),
            DecodeCalldataError::LengthMismatch => f.write_str("calldata error: length mismatch"),
            DecodeCalldataError::TrailingData => f.write_str("calldata error: trailing data"),
        }
    }
}

impl DecodedCall {
    pub fn new(to: Felt, selector: Felt, calldata: Vec<Felt>) -> Self {
        Self {
            to,
            selector,
            calldata,
            decoded_args: None,
        }
    }
}

/// Decodes an invoke transaction calldata, trying the legacy layout first.
pub fn decode_invoke_calldata(calldata: &[Felt]) -> Result<Vec<DecodedCall>, DecodeCalldataError> {
    match decode_legacy_calldata(calldata) {
        Ok(calls) => Ok(calls),
        Err(legacy_err) => decode_new_calldata(calldata)
            .attach_printable_lazy(|| format!("legacy layout: {legacy_err:?}")),
    }
}

/// Builds the single call of an L1 handler or v0 invoke transaction.
pub fn decode_generic_calldata(to: Felt, selector: Felt, calldata: &[Felt]) -> DecodedCall {
    DecodedCall::new(to, selector, calldata.to_vec())
}

pub fn decode_legacy_calldata(
    calldata: &[Felt],
) -> Result<Vec<DecodedCall>, DecodeCalldataError> {
    let mut reader = WordReader::new(calldata);
    let count = reader.next_len()?;

    // Each call header is 4 words, check before allocating.
    let headers_len = count
        .checked_mul(4)
        .ok_or_else(|| Report::new(DecodeCalldataError::InvalidLength))?;
    if headers_len >= reader.remaining() {
        return Err(DecodeCalldataError::Truncated)
            .attach_printable_lazy(|| format!("declared {count} calls"));
    }

    let mut headers = Vec::with_capacity(count);
    for _ in 0..count {
        let to = reader.next()?;
        let selector = reader.next()?;
        let offset = reader.next_len()?;
        let len = reader.next_len()?;
        headers.push((to, selector, offset, len));
    }

    let data_len = reader.next_len()?;
    let declared = headers
        .iter()
        .try_fold(0usize, |total, (_, _, _, len)| total.checked_add(*len))
        .ok_or_else(|| Report::new(DecodeCalldataError::InvalidLength))
        .attach_printable("sum of call lengths overflows")?;
    if declared != data_len {
        return Err(DecodeCalldataError::LengthMismatch).attach_printable_lazy(|| {
            format!("calldata_len is {data_len} but calls use {declared} words")
        });
    }

    let data = reader.take(data_len)?;
    reader.finish()?;

    headers
        .into_iter()
        .map(|(to, selector, offset, len)| {
            let end = offset
                .checked_add(len)
                .ok_or_else(|| Report::new(DecodeCalldataError::InvalidLength))?;
            let Some(args) = data.get(offset..end) else {
                return Err(DecodeCalldataError::Truncated)
                    .attach_printable_lazy(|| format!("call data {offset}..{end} out of bounds"));
            };
            Ok(DecodedCall::new(to, selector, args.to_vec()))
        })
        .collect()
}

pub fn decode_new_calldata(calldata: &[Felt]) -> Result<Vec<DecodedCall>, DecodeCalldataError> {
    let mut reader = WordReader::new(calldata);
    let count = reader.next_len()?;

    // Each call is at least 3 words.
    if count.saturating_mul(3) > reader.remaining() {
        return Err(DecodeCalldataError::Truncated)
            .attach_printable_lazy(|| format!("declared {count} calls"));
    }

    let mut calls = Vec::with_capacity(count);
    for _ in 0..count {
        let to = reader.next()?;
        let selector = reader.next()?;
        let len = reader.next_len()?;
        let args = reader.take(len)?;
        calls.push(DecodedCall::new(to, selector, args.to_vec()));
    }

    reader.finish()?;
    Ok(calls)
}

struct WordReader<'a> {
    words: &'a [Felt],
    position: usize,
}

impl<'a> WordReader<'a> {
    fn new(words: &'a [Felt]) -> Self {
        Self { words, position: 0 }
    }

    fn remaining(&self) -> usize {
        self.words.len() - self.position
    }

    fn next(&mut self) -> Result<Felt, DecodeCalldataError> {
        let word = self
            .words
            .get(self.position)
            .copied()
            .ok_or_else(|| Report::new(DecodeCalldataError::Truncated))
            .attach_printable_lazy(|| format!("reading word {}", self.position))?;
        self.position += 1;
        Ok(word)
    }

    fn next_len(&mut self) -> Result<usize, DecodeCalldataError> {
        let word = self.next()?;
        word.to_u64()
            .and_then(|len| usize::try_from(len).ok())
            .ok_or_else(|| Report::new(DecodeCalldataError::InvalidLength))
            .attach_printable_lazy(|| format!("length {word} is too large"))
    }

    fn take(&mut self, len: usize) -> Result<&'a [Felt], DecodeCalldataError> {
        if len > self.remaining() {
            return Err(DecodeCalldataError::Truncated).attach_printable_lazy(|| {
                format!("need {len} words, {} left", self.remaining())
            });
        }
        let words = &self.words[self.position..self.position + len];
        self.position += len;
        Ok(words)
    }

    fn finish(&self) -> Result<(), DecodeCalldataError> {
        if self.remaining() > 0 {
            return Err(DecodeCalldataError::TrailingData)
                .attach_printable_lazy(|| format!("{} words left", self.remaining()));
        }
        Ok(())
    }
}
