// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Backend selection and namespace routing.
//
// A `Store` owns the opened embedded file and the networked pool cache.
// There is no process-wide state: callers keep the `Store` and ask it for
// `Database` handles by backend and index.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::backend::Backend;
use crate::config::{NetworkedConfig, StoreConfig};
use crate::embedded::{EmbeddedDatabase, EmbeddedStore};
use crate::error::{KvError, KvResult};
use crate::networked::NetworkedDatabase;
use crate::stats::DatabaseStats;
use crate::txn::Txn;

/// Entry point: the configured backends and their namespaces.
///
/// `Store` is `Send + Sync`; share it by reference or wrap it in an `Arc`.
/// To reconfigure, open a new `Store`. Handles obtained from the old one
/// keep working until dropped.
pub struct Store {
    embedded: Option<EmbeddedStore>,
    networked: Option<NetworkedNamespaces>,
}

struct NetworkedNamespaces {
    config: NetworkedConfig,
    cache: Mutex<HashMap<u32, NetworkedDatabase>>,
}

impl Store {
    /// Validate `config` and open the embedded file if one is configured.
    ///
    /// No network connection is made here; a networked pool is built on the
    /// first [`database`](Self::database) call for each index.
    pub fn open(config: &StoreConfig) -> KvResult<Self> {
        config.validate()?;

        let embedded = config
            .embedded
            .as_ref()
            .map(EmbeddedStore::open)
            .transpose()?;

        let networked = config.networked.clone().map(|config| NetworkedNamespaces {
            config,
            cache: Mutex::new(HashMap::new()),
        });

        info!(
            embedded = embedded.is_some(),
            networked = networked.is_some(),
            "store opened"
        );

        Ok(Self {
            embedded,
            networked,
        })
    }

    /// Whether `backend` was configured.
    pub fn has_backend(&self, backend: Backend) -> bool {
        match backend {
            Backend::Embedded => self.embedded.is_some(),
            Backend::Networked => self.networked.is_some(),
        }
    }

    /// The opened embedded store, if configured.
    pub fn embedded(&self) -> Option<&EmbeddedStore> {
        self.embedded.as_ref()
    }

    /// Handle to database `index` on `backend`.
    ///
    /// Embedded: namespace `db<index>` is created if missing. Networked: the
    /// pool for `index` is reused if cached; otherwise it is built, checked
    /// with `PING`, and cached only if the check succeeds.
    pub fn database(&self, backend: Backend, index: u32) -> KvResult<Database> {
        match backend {
            Backend::Embedded => {
                let store = self
                    .embedded
                    .as_ref()
                    .ok_or(KvError::NotConfigured(Backend::Embedded))?;
                store.database(index).map(Database::Embedded)
            }
            Backend::Networked => {
                let networked = self
                    .networked
                    .as_ref()
                    .ok_or(KvError::NotConfigured(Backend::Networked))?;
                networked.database(index).map(Database::Networked)
            }
        }
    }
}

impl NetworkedNamespaces {
    fn database(&self, index: u32) -> KvResult<NetworkedDatabase> {
        self.cached_or_connect(index, || NetworkedDatabase::connect(&self.config, index))
    }

    /// The cache lock is not held while `connect` runs. If two callers race
    /// on the same index, the first pool inserted wins.
    fn cached_or_connect(
        &self,
        index: u32,
        connect: impl FnOnce() -> KvResult<NetworkedDatabase>,
    ) -> KvResult<NetworkedDatabase> {
        if let Some(db) = self.lock_cache().get(&index) {
            return Ok(db.clone());
        }
        let db = connect()?;
        let mut cache = self.lock_cache();
        let db = cache.entry(index).or_insert(db).clone();
        debug!(index, cached = cache.len(), "cached networked namespace");
        Ok(db)
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<u32, NetworkedDatabase>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("embedded", &self.embedded)
            .field("networked", &self.networked.as_ref().map(|n| &n.config.address))
            .finish()
    }
}

/// A namespace-scoped database on one backend.
///
/// Cloning is cheap and clones share statistics.
#[derive(Debug, Clone)]
pub enum Database {
    /// Namespace `db<index>` of the embedded redb file.
    Embedded(EmbeddedDatabase),
    /// Database `index` of the Redis server.
    Networked(NetworkedDatabase),
}

impl Database {
    /// Which backend this handle uses.
    pub fn backend(&self) -> Backend {
        match self {
            Database::Embedded(_) => Backend::Embedded,
            Database::Networked(_) => Backend::Networked,
        }
    }

    /// The database index this handle is scoped to.
    pub fn index(&self) -> u32 {
        match self {
            Database::Embedded(db) => db.index(),
            Database::Networked(db) => db.index(),
        }
    }

    /// Run `f` with read-write access.
    ///
    /// Embedded: one all-or-nothing transaction; `f` runs once. Networked:
    /// one pooled connection; `f` may run again after a transient failure,
    /// so it must tolerate repeated execution.
    pub fn update<T, F>(&self, f: F) -> KvResult<T>
    where
        F: FnMut(&mut Txn<'_>) -> KvResult<T>,
    {
        match self {
            Database::Embedded(db) => db.update(f),
            Database::Networked(db) => db.update(f),
        }
    }

    /// Run `f` with read access.
    ///
    /// Embedded: a snapshot transaction that rejects writes. Networked: same
    /// as [`update`](Self::update).
    pub fn view<T, F>(&self, f: F) -> KvResult<T>
    where
        F: FnMut(&mut Txn<'_>) -> KvResult<T>,
    {
        match self {
            Database::Embedded(db) => db.view(f),
            Database::Networked(db) => db.view(f),
        }
    }

    /// [`update`](Self::update) on tokio's blocking thread pool.
    pub async fn update_async<T, F>(&self, f: F) -> KvResult<T>
    where
        F: FnMut(&mut Txn<'_>) -> KvResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.update(f))
            .await
            .map_err(|e| KvError::Background(format!("task join: {e}")))?
    }

    /// [`view`](Self::view) on tokio's blocking thread pool.
    pub async fn view_async<T, F>(&self, f: F) -> KvResult<T>
    where
        F: FnMut(&mut Txn<'_>) -> KvResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.view(f))
            .await
            .map_err(|e| KvError::Background(format!("task join: {e}")))?
    }

    /// Snapshot of this handle's transaction counters.
    pub fn stats(&self) -> DatabaseStats {
        match self {
            Database::Embedded(db) => db.stats(),
            Database::Networked(db) => db.stats(),
        }
    }

    /// Zero this handle's transaction counters.
    pub fn reset_stats(&self) {
        match self {
            Database::Embedded(db) => db.reset_stats(),
            Database::Networked(db) => db.reset_stats(),
        }
    }
}
