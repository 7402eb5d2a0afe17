// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Backend variants and the operation trait every transaction handle
// implements.
//
// `Commands` is the object-safe, byte-level contract. The embedded handle
// translates each call into container operations on redb tables; the
// networked handle sends the equivalently named Redis command. Callers use
// it through `crate::txn::Txn`, which adds argument conversion.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{KvError, KvResult};

/// The closed set of storage engines a database can live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// A redb file opened in-process.
    Embedded,
    /// A Redis server reached through a connection pool.
    Networked,
}

impl Backend {
    /// Lowercase name used in logs and configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Embedded => "embedded",
            Backend::Networked => "networked",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = KvError;

    /// Accepts the engine names as aliases (`bolt`/`redb`, `redis`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "embedded" | "bolt" | "redb" => Ok(Backend::Embedded),
            "networked" | "redis" => Ok(Backend::Networked),
            other => Err(KvError::Configuration(format!("unknown backend {other:?}"))),
        }
    }
}

/// Redis-style operations available inside one transaction scope.
///
/// Absent keys are never an error: reads return `None` or an empty
/// collection and deletes are no-ops.
pub trait Commands {
    /// The engine this handle talks to.
    fn backend(&self) -> Backend;

    /// Store a scalar value.
    fn set(&mut self, key: &[u8], value: &[u8]) -> KvResult<()>;

    /// Read a scalar value.
    fn get(&mut self, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    /// Remove a key and everything stored under it.
    fn del(&mut self, key: &[u8]) -> KvResult<()>;

    /// All keys matching a glob pattern, in no particular order.
    fn keys(&mut self, pattern: &str) -> KvResult<Vec<Vec<u8>>>;

    /// Whether `member` belongs to the set at `key`.
    fn sismember(&mut self, key: &[u8], member: &[u8]) -> KvResult<bool>;

    /// Every member of the set at `key`.
    fn smembers(&mut self, key: &[u8]) -> KvResult<Vec<Vec<u8>>>;

    /// Add `member` to the set at `key`.
    fn sadd(&mut self, key: &[u8], member: &[u8]) -> KvResult<()>;

    /// Remove `member` from the set at `key`.
    fn srem(&mut self, key: &[u8], member: &[u8]) -> KvResult<()>;

    /// Read one hash field.
    fn hget(&mut self, key: &[u8], field: &[u8]) -> KvResult<Option<Vec<u8>>>;

    /// Write one hash field.
    fn hset(&mut self, key: &[u8], field: &[u8], value: &[u8]) -> KvResult<()>;

    /// Write several hash fields.
    fn hmset(&mut self, key: &[u8], pairs: &[(&[u8], &[u8])]) -> KvResult<()>;

    /// Read several hash fields; one result per requested field, in order.
    fn hmget(&mut self, key: &[u8], fields: &[&[u8]]) -> KvResult<Vec<Option<Vec<u8>>>>;

    /// Every field/value pair of the hash at `key`, in no particular order.
    fn hgetall(&mut self, key: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Mark keys for optimistic locking.
    fn watch(&mut self, keys: &[&[u8]]) -> KvResult<()>;

    /// Start queueing commands.
    fn multi(&mut self) -> KvResult<()>;

    /// Run queued commands.
    fn exec(&mut self) -> KvResult<()>;
}
