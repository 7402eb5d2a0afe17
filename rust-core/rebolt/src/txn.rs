// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The transaction handle passed to `update`/`view` callbacks.

use crate::backend::{Backend, Commands};
use crate::codec::Scalar;
use crate::error::{KvError, KvResult};

/// Handle to one open transaction scope.
///
/// Only valid inside the callback it was handed to. Single arguments accept
/// anything that converts into a [`Scalar`] (`&str`, `&String`, `&[u8]`,
/// `&[u8; N]`, `&Vec<u8>`); batch arguments accept slices of `AsRef<[u8]>`.
///
/// ```rust
/// use rebolt::{Backend, Store, StoreConfig};
///
/// let store = Store::open(&StoreConfig::in_memory()).unwrap();
/// let db = store.database(Backend::Embedded, 0).unwrap();
///
/// db.update(|tx| {
///     tx.set("hello", "world")?;
///     tx.sadd("greetings", "hello")?;
///     tx.hmset("profile", &[("name", "Ada"), ("lang", "rust")])
/// })
/// .unwrap();
///
/// let name = db.view(|tx| tx.hget("profile", "name")).unwrap();
/// assert_eq!(name.as_deref(), Some(&b"Ada"[..]));
/// ```
pub struct Txn<'a> {
    inner: &'a mut dyn Commands,
}

impl<'a> Txn<'a> {
    pub(crate) fn new(inner: &'a mut dyn Commands) -> Self {
        Self { inner }
    }

    /// The engine behind this transaction.
    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    /// Store `value` under `key`.
    pub fn set<'k, 'v>(
        &mut self,
        key: impl Into<Scalar<'k>>,
        value: impl Into<Scalar<'v>>,
    ) -> KvResult<()> {
        self.inner.set(key.into().as_bytes(), value.into().as_bytes())
    }

    /// The scalar stored under `key`, if any.
    pub fn get<'k>(&mut self, key: impl Into<Scalar<'k>>) -> KvResult<Option<Vec<u8>>> {
        self.inner.get(key.into().as_bytes())
    }

    /// Remove `key`. Absent keys are ignored.
    pub fn del<'k>(&mut self, key: impl Into<Scalar<'k>>) -> KvResult<()> {
        self.inner.del(key.into().as_bytes())
    }

    /// Keys matching a shell-style glob (`*`, `?`, `[abc]`, `\` escapes).
    pub fn keys<'p>(&mut self, pattern: impl Into<Scalar<'p>>) -> KvResult<Vec<Vec<u8>>> {
        let pattern = pattern.into().to_pattern()?;
        self.inner.keys(pattern)
    }

    /// Whether `member` is in the set at `key`.
    pub fn sismember<'k, 'm>(
        &mut self,
        key: impl Into<Scalar<'k>>,
        member: impl Into<Scalar<'m>>,
    ) -> KvResult<bool> {
        self.inner.sismember(key.into().as_bytes(), member.into().as_bytes())
    }

    /// Members of the set at `key`; empty when the key is absent.
    pub fn smembers<'k>(&mut self, key: impl Into<Scalar<'k>>) -> KvResult<Vec<Vec<u8>>> {
        self.inner.smembers(key.into().as_bytes())
    }

    /// Add `member` to the set at `key`.
    pub fn sadd<'k, 'm>(
        &mut self,
        key: impl Into<Scalar<'k>>,
        member: impl Into<Scalar<'m>>,
    ) -> KvResult<()> {
        self.inner.sadd(key.into().as_bytes(), member.into().as_bytes())
    }

    /// Remove `member` from the set at `key`. Absent members are ignored.
    pub fn srem<'k, 'm>(
        &mut self,
        key: impl Into<Scalar<'k>>,
        member: impl Into<Scalar<'m>>,
    ) -> KvResult<()> {
        self.inner.srem(key.into().as_bytes(), member.into().as_bytes())
    }

    /// One field of the hash at `key`.
    pub fn hget<'k, 'f>(
        &mut self,
        key: impl Into<Scalar<'k>>,
        field: impl Into<Scalar<'f>>,
    ) -> KvResult<Option<Vec<u8>>> {
        self.inner.hget(key.into().as_bytes(), field.into().as_bytes())
    }

    /// Set one field of the hash at `key`.
    pub fn hset<'k, 'f, 'v>(
        &mut self,
        key: impl Into<Scalar<'k>>,
        field: impl Into<Scalar<'f>>,
        value: impl Into<Scalar<'v>>,
    ) -> KvResult<()> {
        self.inner.hset(
            key.into().as_bytes(),
            field.into().as_bytes(),
            value.into().as_bytes(),
        )
    }

    /// Set several fields of the hash at `key`.
    pub fn hmset<'k, F, V>(&mut self, key: impl Into<Scalar<'k>>, pairs: &[(F, V)]) -> KvResult<()>
    where
        F: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let pairs: Vec<(&[u8], &[u8])> = pairs
            .iter()
            .map(|(field, value)| (field.as_ref(), value.as_ref()))
            .collect();
        self.inner.hmset(key.into().as_bytes(), &pairs)
    }

    /// Set hash fields from an interleaved `field, value, field, value, ...`
    /// list.
    ///
    /// Fails with [`KvError::OddArgumentCount`] before touching the store if
    /// a value is missing.
    pub fn hmset_flat<'k, A>(&mut self, key: impl Into<Scalar<'k>>, args: &[A]) -> KvResult<()>
    where
        A: AsRef<[u8]>,
    {
        if args.len() % 2 != 0 {
            return Err(KvError::OddArgumentCount(args.len()));
        }
        let pairs: Vec<(&[u8], &[u8])> = args
            .chunks_exact(2)
            .map(|pair| (pair[0].as_ref(), pair[1].as_ref()))
            .collect();
        self.inner.hmset(key.into().as_bytes(), &pairs)
    }

    /// Several fields of the hash at `key`, positionally.
    pub fn hmget<'k, F>(
        &mut self,
        key: impl Into<Scalar<'k>>,
        fields: &[F],
    ) -> KvResult<Vec<Option<Vec<u8>>>>
    where
        F: AsRef<[u8]>,
    {
        let fields: Vec<&[u8]> = fields.iter().map(AsRef::as_ref).collect();
        self.inner.hmget(key.into().as_bytes(), &fields)
    }

    /// Every field/value pair of the hash at `key`.
    pub fn hgetall<'k>(
        &mut self,
        key: impl Into<Scalar<'k>>,
    ) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.hgetall(key.into().as_bytes())
    }

    /// Every field/value pair of the hash at `key`, interleaved as
    /// `field, value, field, value, ...`.
    pub fn hgetall_flat<'k>(&mut self, key: impl Into<Scalar<'k>>) -> KvResult<Vec<Vec<u8>>> {
        Ok(self
            .hgetall(key)?
            .into_iter()
            .flat_map(|(field, value)| [field, value])
            .collect())
    }

    /// Watch keys for changes before `multi`. No-op on the embedded backend.
    pub fn watch<K>(&mut self, keys: &[K]) -> KvResult<()>
    where
        K: AsRef<[u8]>,
    {
        let keys: Vec<&[u8]> = keys.iter().map(AsRef::as_ref).collect();
        self.inner.watch(&keys)
    }

    /// Start queueing commands. No-op on the embedded backend.
    pub fn multi(&mut self) -> KvResult<()> {
        self.inner.multi()
    }

    /// Run queued commands. No-op on the embedded backend; on the networked
    /// backend a changed watched key yields [`KvError::TransactionAborted`].
    pub fn exec(&mut self) -> KvResult<()> {
        self.inner.exec()
    }
}
