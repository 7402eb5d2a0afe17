// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Embedded backend: Redis-style values on a redb file.
//
// # Layout
//
// Each namespace `db<index>` is a two-level container made of two redb
// tables:
//
// 1. **`db<index>`** -- container directory.
//    Key: logical key bytes. Value: empty. A row exists exactly when the
//    key's second-level container exists, even if it holds no fields.
//
// 2. **`db<index>.fields`** -- container contents.
//    Key: `(logical_key, field)` tuple. Value: field value.
//    Tuple ordering keeps one key's fields contiguous, so a container is a
//    single range starting at `(logical_key, b"")`.
//
// Scalars live under the one-byte sentinel field `b"0"`. Set members are
// fields whose value is the sentinel. Hash fields are stored as given.
//
// One `update` is one redb write transaction and one `view` is one redb read
// transaction; redb serialises writers and gives readers a snapshot.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use redb::{
    Builder, Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition,
    WriteTransaction,
};
use tracing::{debug, trace, warn};

use crate::backend::{Backend, Commands};
use crate::config::EmbeddedConfig;
use crate::error::{KvError, KvResult};
use crate::stats::{DatabaseStats, StatsRecorder};
use crate::txn::Txn;

/// Field name holding a scalar; also the value marking set membership.
pub const SENTINEL: &[u8] = b"0";

const EMPTY: &[u8] = b"";

type Bytes = &'static [u8];
type FieldKey = (&'static [u8], &'static [u8]);

/// Table names for one database index.
#[derive(Debug)]
struct Namespace {
    index: u32,
    directory: String,
    fields: String,
}

impl Namespace {
    fn new(index: u32) -> Self {
        let directory = format!("db{index}");
        let fields = format!("{directory}.fields");
        Self {
            index,
            directory,
            fields,
        }
    }

    fn directory(&self) -> TableDefinition<'_, Bytes, Bytes> {
        TableDefinition::new(&self.directory)
    }

    fn fields(&self) -> TableDefinition<'_, FieldKey, Bytes> {
        TableDefinition::new(&self.fields)
    }
}

/// An opened redb file shared by every embedded namespace.
///
/// Cloning is cheap; all clones refer to the same redb `Database`.
#[derive(Clone)]
pub struct EmbeddedStore {
    db: Arc<Database>,
    /// `None` for in-memory stores.
    path: Option<PathBuf>,
}

impl EmbeddedStore {
    /// Open or create the store described by `config`.
    ///
    /// Missing parent directories are created. A new file gets
    /// `config.mode` as its permission bits (Unix only).
    pub fn open(config: &EmbeddedConfig) -> KvResult<Self> {
        let mut builder = Builder::new();
        if let Some(bytes) = config.cache_size {
            builder.set_cache_size(bytes);
        }

        if config.in_memory {
            let db = builder.create_with_backend(redb::backends::InMemoryBackend::new())?;
            debug!("opened in-memory embedded store");
            return Ok(Self {
                db: Arc::new(db),
                path: None,
            });
        }

        let path = config
            .path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| KvError::Configuration("embedded store needs a path".to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = open_store_file(&path, config.mode)?;
        let db = builder.create_file(file).map_err(|e| {
            KvError::Storage(format!("failed to open redb at {}: {e}", path.display()))
        })?;

        debug!(path = %path.display(), "opened embedded store");

        Ok(Self {
            db: Arc::new(db),
            path: Some(path),
        })
    }

    /// Filesystem path of the store file, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Handle to namespace `db<index>`, creating its tables if missing.
    pub fn database(&self, index: u32) -> KvResult<EmbeddedDatabase> {
        let namespace = Namespace::new(index);

        let txn = self.db.begin_write()?;
        txn.open_table(namespace.directory())?;
        txn.open_table(namespace.fields())?;
        txn.commit()?;

        debug!(namespace = %namespace.directory, "embedded namespace ready");

        Ok(EmbeddedDatabase {
            db: Arc::clone(&self.db),
            namespace: Arc::new(namespace),
            stats: StatsRecorder::default(),
        })
    }
}

impl std::fmt::Debug for EmbeddedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedStore")
            .field("path", &self.path)
            .finish()
    }
}

fn open_store_file(path: &Path, mode: u32) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path)
}

/// One namespace of an [`EmbeddedStore`].
#[derive(Clone)]
pub struct EmbeddedDatabase {
    db: Arc<Database>,
    namespace: Arc<Namespace>,
    stats: StatsRecorder,
}

impl EmbeddedDatabase {
    /// The database index this handle is scoped to.
    pub fn index(&self) -> u32 {
        self.namespace.index
    }

    /// Name of the namespace's directory table (`db<index>`).
    pub fn namespace(&self) -> &str {
        &self.namespace.directory
    }

    /// Run `f` inside one read-write transaction.
    ///
    /// Commits when `f` returns `Ok`; aborts and returns the error otherwise.
    /// Only one write transaction can be open per store, so `f` must not
    /// start another transaction on the same store.
    pub fn update<T, F>(&self, f: F) -> KvResult<T>
    where
        F: FnOnce(&mut Txn<'_>) -> KvResult<T>,
    {
        self.stats.begin(true);
        let result = self.run_write(f);
        self.stats.finish(&result);
        result
    }

    /// Run `f` inside one read-only snapshot transaction.
    ///
    /// Writes inside `f` fail with [`KvError::ReadOnlyTransaction`].
    pub fn view<T, F>(&self, f: F) -> KvResult<T>
    where
        F: FnOnce(&mut Txn<'_>) -> KvResult<T>,
    {
        self.stats.begin(false);
        let result = self.run_read(f);
        self.stats.finish(&result);
        result
    }

    /// Snapshot of this handle's transaction counters.
    pub fn stats(&self) -> DatabaseStats {
        self.stats.snapshot()
    }

    /// Zero this handle's transaction counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    fn run_write<T, F>(&self, f: F) -> KvResult<T>
    where
        F: FnOnce(&mut Txn<'_>) -> KvResult<T>,
    {
        let txn = self.db.begin_write()?;
        let outcome = {
            let mut handle = EmbeddedTxn::new(Scope::Write(&txn), &self.namespace);
            f(&mut Txn::new(&mut handle))
        };

        match outcome {
            Ok(value) => {
                txn.commit()?;
                trace!(namespace = %self.namespace.directory, "committed write transaction");
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = txn.abort() {
                    warn!(
                        namespace = %self.namespace.directory,
                        error = %abort_err,
                        "failed to abort write transaction"
                    );
                }
                debug!(
                    namespace = %self.namespace.directory,
                    error = %err,
                    "rolled back write transaction"
                );
                Err(err)
            }
        }
    }

    fn run_read<T, F>(&self, f: F) -> KvResult<T>
    where
        F: FnOnce(&mut Txn<'_>) -> KvResult<T>,
    {
        let txn = self.db.begin_read()?;
        let mut handle = EmbeddedTxn::new(Scope::Read(&txn), &self.namespace);
        f(&mut Txn::new(&mut handle))
    }
}

impl std::fmt::Debug for EmbeddedDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedDatabase")
            .field("namespace", &self.namespace.directory)
            .finish()
    }
}

enum Scope<'t> {
    Read(&'t ReadTransaction),
    Write(&'t WriteTransaction),
}

/// [`Commands`] over one open redb transaction and one namespace.
pub struct EmbeddedTxn<'t> {
    scope: Scope<'t>,
    namespace: &'t Namespace,
}

/// Open both namespace tables in whichever transaction kind is active and
/// evaluate `$body` with them bound.
macro_rules! with_tables {
    ($self:ident, |$dir:ident, $fields:ident| $body:expr) => {
        match $self.scope {
            Scope::Read(txn) => {
                let $dir = txn.open_table($self.namespace.directory())?;
                let $fields = txn.open_table($self.namespace.fields())?;
                $body
            }
            Scope::Write(txn) => {
                let $dir = txn.open_table($self.namespace.directory())?;
                let $fields = txn.open_table($self.namespace.fields())?;
                $body
            }
        }
    };
}

impl<'t> EmbeddedTxn<'t> {
    fn new(scope: Scope<'t>, namespace: &'t Namespace) -> Self {
        Self { scope, namespace }
    }

    fn writable(&self) -> KvResult<&'t WriteTransaction> {
        match self.scope {
            Scope::Write(txn) => Ok(txn),
            Scope::Read(_) => Err(KvError::ReadOnlyTransaction),
        }
    }

    /// Write `entries` into the container at `key`, creating it first.
    fn put_fields(&self, key: &[u8], entries: &[(&[u8], &[u8])]) -> KvResult<()> {
        let txn = self.writable()?;
        let mut dir = txn.open_table(self.namespace.directory())?;
        let mut fields = txn.open_table(self.namespace.fields())?;
        dir.insert(key, EMPTY)?;
        for (field, value) in entries {
            fields.insert((key, *field), *value)?;
        }
        Ok(())
    }
}

fn container_exists(dir: &impl ReadableTable<Bytes, Bytes>, key: &[u8]) -> KvResult<bool> {
    Ok(dir.get(key)?.is_some())
}

fn field_value(
    fields: &impl ReadableTable<FieldKey, Bytes>,
    key: &[u8],
    field: &[u8],
) -> KvResult<Option<Vec<u8>>> {
    Ok(fields.get((key, field))?.map(|v| v.value().to_vec()))
}

/// Every `(field, value)` in the container at `key`, in field order.
fn container_entries(
    fields: &impl ReadableTable<FieldKey, Bytes>,
    key: &[u8],
) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let start: (&[u8], &[u8]) = (key, EMPTY);
    let mut entries = Vec::new();
    for entry in fields.range(start..)? {
        let (k, v) = entry?;
        let (owner, field) = k.value();
        if owner != key {
            break;
        }
        entries.push((field.to_vec(), v.value().to_vec()));
    }
    Ok(entries)
}

/// Rewrite unescaped `{` and `}` outside a `[...]` class as one-character
/// classes, so globset does not read them as alternation.
fn literal_braces(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '{' => out.push_str("[{]"),
            '}' => out.push_str("[}]"),
            '[' => {
                out.push(c);
                if let Some(&neg) = chars.peek() {
                    if neg == '!' || neg == '^' {
                        out.push(neg);
                        chars.next();
                    }
                }
                // A `]` right after the opening bracket is a member.
                if chars.peek() == Some(&']') {
                    out.push(']');
                    chars.next();
                }
                for member in chars.by_ref() {
                    out.push(member);
                    if member == ']' {
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Compile a Redis-style glob: `*` and `?` also match `/`, `\` escapes
/// the next character, and braces are literal.
fn key_matcher(pattern: &str) -> KvResult<GlobMatcher> {
    GlobBuilder::new(&literal_braces(pattern))
        .literal_separator(false)
        .backslash_escape(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| KvError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.kind().to_string(),
        })
}

impl Commands for EmbeddedTxn<'_> {
    fn backend(&self) -> Backend {
        Backend::Embedded
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.put_fields(key, &[(SENTINEL, value)])
    }

    fn get(&mut self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        with_tables!(self, |dir, fields| {
            if !container_exists(&dir, key)? {
                return Ok(None);
            }
            field_value(&fields, key, SENTINEL)
        })
    }

    fn del(&mut self, key: &[u8]) -> KvResult<()> {
        let txn = self.writable()?;
        let mut dir = txn.open_table(self.namespace.directory())?;
        let mut fields = txn.open_table(self.namespace.fields())?;

        if dir.remove(key)?.is_none() {
            return Ok(());
        }
        let doomed = container_entries(&fields, key)?;
        for (field, _) in &doomed {
            fields.remove((key, field.as_slice()))?;
        }
        trace!(fields = doomed.len(), "deleted container");
        Ok(())
    }

    fn keys(&mut self, pattern: &str) -> KvResult<Vec<Vec<u8>>> {
        let matcher = key_matcher(pattern)?;
        with_tables!(self, |dir, _fields| {
            let mut names = Vec::new();
            for entry in dir.iter()? {
                let (name, _) = entry?;
                let name = name.value();
                if matcher.is_match(&*String::from_utf8_lossy(name)) {
                    names.push(name.to_vec());
                }
            }
            Ok(names)
        })
    }

    fn sismember(&mut self, key: &[u8], member: &[u8]) -> KvResult<bool> {
        with_tables!(self, |dir, fields| {
            if !container_exists(&dir, key)? {
                return Ok(false);
            }
            Ok(field_value(&fields, key, member)?.is_some_and(|v| !v.is_empty()))
        })
    }

    fn smembers(&mut self, key: &[u8]) -> KvResult<Vec<Vec<u8>>> {
        with_tables!(self, |_dir, fields| {
            Ok(container_entries(&fields, key)?
                .into_iter()
                .map(|(member, _)| member)
                .collect())
        })
    }

    fn sadd(&mut self, key: &[u8], member: &[u8]) -> KvResult<()> {
        self.put_fields(key, &[(member, SENTINEL)])
    }

    fn srem(&mut self, key: &[u8], member: &[u8]) -> KvResult<()> {
        let txn = self.writable()?;
        let mut fields = txn.open_table(self.namespace.fields())?;
        fields.remove((key, member))?;
        Ok(())
    }

    fn hget(&mut self, key: &[u8], field: &[u8]) -> KvResult<Option<Vec<u8>>> {
        with_tables!(self, |dir, fields| {
            if !container_exists(&dir, key)? {
                return Ok(None);
            }
            field_value(&fields, key, field)
        })
    }

    fn hset(&mut self, key: &[u8], field: &[u8], value: &[u8]) -> KvResult<()> {
        self.put_fields(key, &[(field, value)])
    }

    fn hmset(&mut self, key: &[u8], pairs: &[(&[u8], &[u8])]) -> KvResult<()> {
        self.put_fields(key, pairs)
    }

    fn hmget(&mut self, key: &[u8], wanted: &[&[u8]]) -> KvResult<Vec<Option<Vec<u8>>>> {
        with_tables!(self, |dir, fields| {
            if !container_exists(&dir, key)? {
                return Ok(vec![None; wanted.len()]);
            }
            wanted
                .iter()
                .map(|field| field_value(&fields, key, field))
                .collect()
        })
    }

    fn hgetall(&mut self, key: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        with_tables!(self, |_dir, fields| container_entries(&fields, key))
    }

    // The callback-scoped redb transaction already gives the isolation these
    // three request on Redis.

    fn watch(&mut self, _keys: &[&[u8]]) -> KvResult<()> {
        Ok(())
    }

    fn multi(&mut self) -> KvResult<()> {
        Ok(())
    }

    fn exec(&mut self) -> KvResult<()> {
        Ok(())
    }
}
