// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// rebolt: Redis-style strings, sets and hashes behind one transactional
// interface.
//
// The same callback runs against either engine:
//
// - the embedded backend, a single redb file (or memory) where every
//   key is a container of fields and a scalar lives in field `"0"`;
// - the networked backend, a Redis server reached through an r2d2 pool,
//   with bounded retry of transient failures.
//
// # Modules
//
// - [`store`] -- `Store` entry point and the namespace-scoped `Database`.
// - [`txn`] -- The `Txn` handle given to `update`/`view` callbacks.
// - [`typed`] -- serde_json helpers on `Txn`.
// - [`backend`] -- `Backend` selector and the `Commands` engine trait.
// - [`codec`] -- `Scalar` argument conversion.
// - [`embedded`] -- redb engine.
// - [`networked`] -- Redis engine and retry loop.
// - [`config`] -- serde-loadable configuration.
// - [`stats`] -- Per-handle transaction counters.
// - [`error`] -- The `KvError` enum.
//
// # Example
//
// ```rust
// use rebolt::{Backend, Store, StoreConfig};
//
// let store = Store::open(&StoreConfig::in_memory()).unwrap();
// let db = store.database(Backend::Embedded, 0).unwrap();
//
// db.update(|tx| tx.sadd("langs", "rust")).unwrap();
// assert!(db.view(|tx| tx.sismember("langs", "rust")).unwrap());
// ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod embedded;
pub mod error;
pub mod networked;
pub mod stats;
pub mod store;
pub mod txn;
pub mod typed;

// Re-export the most commonly used types at the crate root for convenience.
pub use backend::{Backend, Commands};
pub use codec::Scalar;
pub use config::{EmbeddedConfig, Network, NetworkedConfig, RetryPolicy, StoreConfig};
pub use embedded::{EmbeddedDatabase, EmbeddedStore, SENTINEL};
pub use error::{KvError, KvResult};
pub use networked::NetworkedDatabase;
pub use stats::DatabaseStats;
pub use store::{Database, Store};
pub use txn::Txn;
