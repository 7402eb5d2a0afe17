// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Value codec.
//
// Keys, members, fields and values cross the API boundary as `Scalar`: a
// borrowed byte slice or string. Nothing else converts, so numeric or
// boolean values must be encoded by the caller. Glob patterns must be text.

use crate::error::{KvError, KvResult};

/// A key, member, field or value handed to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar<'a> {
    /// Raw bytes, passed through unchanged.
    Bytes(&'a [u8]),
    /// Text, stored as its UTF-8 bytes.
    Text(&'a str),
}

impl<'a> Scalar<'a> {
    /// Canonical byte representation.
    pub fn as_bytes(&self) -> &'a [u8] {
        match *self {
            Scalar::Bytes(bytes) => bytes,
            Scalar::Text(text) => text.as_bytes(),
        }
    }

    /// Interpret the scalar as a glob pattern.
    ///
    /// Byte input must be valid UTF-8.
    pub fn to_pattern(&self) -> KvResult<&'a str> {
        match *self {
            Scalar::Text(text) => Ok(text),
            Scalar::Bytes(bytes) => std::str::from_utf8(bytes).map_err(|e| {
                KvError::UnsupportedValueType(format!("pattern is not valid UTF-8: {e}"))
            }),
        }
    }
}

impl AsRef<[u8]> for Scalar<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl<'a> From<&'a [u8]> for Scalar<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Scalar::Bytes(bytes)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Scalar<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        Scalar::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for Scalar<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Scalar::Bytes(bytes)
    }
}

impl<'a> From<&'a str> for Scalar<'a> {
    fn from(text: &'a str) -> Self {
        Scalar::Text(text)
    }
}

impl<'a> From<&'a String> for Scalar<'a> {
    fn from(text: &'a String) -> Self {
        Scalar::Text(text)
    }
}

/// Bridge for callers holding dynamically typed JSON input.
///
/// Only JSON strings convert. Numbers, booleans, null, arrays and objects
/// are rejected rather than coerced.
impl<'a> TryFrom<&'a serde_json::Value> for Scalar<'a> {
    type Error = KvError;

    fn try_from(value: &'a serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::String(text) => Ok(Scalar::Text(text)),
            other => Err(KvError::UnsupportedValueType(format!(
                "cannot convert JSON {} to bytes",
                json_kind(other)
            ))),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
