// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// JSON-typed helpers on top of `Txn`.
//
// Values are serialized with serde_json on write and deserialized on read.
// The stored bytes are ordinary scalars, so typed and raw access to the same
// key interoperate.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::Scalar;
use crate::error::{KvError, KvResult};
use crate::txn::Txn;

fn encode<T: Serialize>(what: &str, value: &T) -> KvResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|err| KvError::Serialization(format!("failed to serialize {}: {}", what, err)))
}

fn decode<T: DeserializeOwned>(what: &str, bytes: Option<Vec<u8>>) -> KvResult<Option<T>> {
    match bytes {
        Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|err| {
            KvError::Serialization(format!("failed to deserialize {}: {}", what, err))
        }),
        None => Ok(None),
    }
}

fn describe(key: Scalar<'_>) -> String {
    format!("key '{}'", String::from_utf8_lossy(key.as_bytes()))
}

impl Txn<'_> {
    /// Serialize `value` as JSON and store it under `key`.
    pub fn set_json<'k, T: Serialize>(
        &mut self,
        key: impl Into<Scalar<'k>>,
        value: &T,
    ) -> KvResult<()> {
        let key = key.into();
        let bytes = encode(&describe(key), value)?;
        self.set(key, &bytes)
    }

    /// Fetch and deserialize the JSON value under `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    pub fn get_json<'k, T: DeserializeOwned>(
        &mut self,
        key: impl Into<Scalar<'k>>,
    ) -> KvResult<Option<T>> {
        let key = key.into();
        let bytes = self.get(key)?;
        decode(&describe(key), bytes)
    }

    /// Serialize `value` as JSON into one hash field.
    pub fn hset_json<'k, 'f, T: Serialize>(
        &mut self,
        key: impl Into<Scalar<'k>>,
        field: impl Into<Scalar<'f>>,
        value: &T,
    ) -> KvResult<()> {
        let key = key.into();
        let bytes = encode(&describe(key), value)?;
        self.hset(key, field, &bytes)
    }

    /// Fetch and deserialize one JSON hash field.
    pub fn hget_json<'k, 'f, T: DeserializeOwned>(
        &mut self,
        key: impl Into<Scalar<'k>>,
        field: impl Into<Scalar<'f>>,
    ) -> KvResult<Option<T>> {
        let key = key.into();
        let bytes = self.hget(key, field)?;
        decode(&describe(key), bytes)
    }
}
