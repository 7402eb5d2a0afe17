// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Networked backend: the same operations as native Redis commands.
//
// # Design
//
// - One r2d2 pool per database index; every pooled connection is opened
//   with that index selected, so a handle never has to `SELECT`.
// - One pooled connection per `update`/`view` call, returned to the pool
//   when the call finishes, whatever the outcome.
// - The read/write flag is recorded but not enforced: writes inside `view`
//   reach Redis.
// - A callback that fails with a transient error (see
//   `KvError::is_transient`) runs again on the same connection, or on a
//   fresh one if the connection reports closed, up to
//   `RetryPolicy::max_attempts` runs in total. Callbacks must be idempotent
//   with respect to anything outside the transaction.

use std::sync::Arc;

use redis::{Client, Connection, ConnectionLike};
use tracing::{debug, error, warn};

use crate::backend::{Backend, Commands};
use crate::config::{NetworkedConfig, RetryPolicy};
use crate::error::{KvError, KvResult};
use crate::stats::{DatabaseStats, StatsRecorder};
use crate::txn::Txn;

type Pool = r2d2::Pool<Client>;

/// One Redis database index reached through its own connection pool.
///
/// Cloning shares the pool and the statistics.
#[derive(Clone)]
pub struct NetworkedDatabase {
    inner: Arc<Inner>,
    stats: StatsRecorder,
}

struct Inner {
    index: u32,
    pool: Pool,
    retry: RetryPolicy,
}

impl NetworkedDatabase {
    /// Build a pool pinned to database `index` and verify it with `PING`.
    pub fn connect(config: &NetworkedConfig, index: u32) -> KvResult<Self> {
        let url = config.url(index);
        let client = Client::open(url.as_str())
            .map_err(|e| KvError::Configuration(format!("invalid redis address {url}: {e}")))?;

        let pool = r2d2::Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.connection_timeout())
            .build(client)?;

        let mut conn = pool.get()?;
        redis::cmd("PING")
            .query::<String>(&mut *conn)
            .map_err(|e| KvError::Connectivity(format!("PING {url}: {e}")))?;
        drop(conn);

        debug!(address = %config.address, index, pool_size = config.pool_size, "networked pool ready");

        Ok(Self {
            inner: Arc::new(Inner {
                index,
                pool,
                retry: config.retry.clone(),
            }),
            stats: StatsRecorder::default(),
        })
    }

    /// The Redis database index this handle is scoped to.
    pub fn index(&self) -> u32 {
        self.inner.index
    }

    /// Run `f` on one pooled connection, retrying transient failures.
    pub fn update<T, F>(&self, f: F) -> KvResult<T>
    where
        F: FnMut(&mut Txn<'_>) -> KvResult<T>,
    {
        self.run(f, true)
    }

    /// Same as [`update`](Self::update); Redis does not enforce read-only
    /// scopes, so writes are not rejected.
    pub fn view<T, F>(&self, f: F) -> KvResult<T>
    where
        F: FnMut(&mut Txn<'_>) -> KvResult<T>,
    {
        self.run(f, false)
    }

    /// Snapshot of this handle's transaction counters.
    pub fn stats(&self) -> DatabaseStats {
        self.stats.snapshot()
    }

    /// Zero this handle's transaction counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    fn run<T, F>(&self, mut f: F, writable: bool) -> KvResult<T>
    where
        F: FnMut(&mut Txn<'_>) -> KvResult<T>,
    {
        self.stats.begin(writable);
        let index = self.inner.index;
        let pool = &self.inner.pool;

        let result = pool.get().map_err(KvError::from).and_then(|mut conn| {
            run_with_retry(
                &self.inner.retry,
                |attempt| {
                    if attempt > 1
                        && refresh_if_closed(&mut conn, |c| c.is_open(), || Ok(pool.get()?))?
                    {
                        debug!(index, attempt, "connection closed, checked out a fresh one");
                    }
                    let mut handle = RemoteTxn::new(&mut *conn, writable);
                    let result = f(&mut Txn::new(&mut handle));
                    if result.is_err() {
                        handle.reset();
                    }
                    result
                },
                |attempt, err| {
                    self.stats.retry();
                    warn!(index, attempt, error = %err, "networked operation failed, retrying");
                },
            )
        });

        self.stats.finish(&result);
        result
    }
}

impl std::fmt::Debug for NetworkedDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkedDatabase")
            .field("index", &self.inner.index)
            .field("retry", &self.inner.retry)
            .finish()
    }
}

/// Replace `conn` with a fresh checkout when `is_open` reports it closed.
/// Returns whether it was replaced.
fn refresh_if_closed<P>(
    conn: &mut P,
    is_open: impl Fn(&P) -> bool,
    checkout: impl FnOnce() -> KvResult<P>,
) -> KvResult<bool> {
    if is_open(conn) {
        return Ok(false);
    }
    *conn = checkout()?;
    Ok(true)
}

/// Run `op` until it succeeds, fails with a non-transient error, or has run
/// `policy.max_attempts` times. `op` receives the 1-based attempt number;
/// `on_retry` is told about each failure that will be retried, before the
/// backoff sleep.
pub(crate) fn run_with_retry<T>(
    policy: &RetryPolicy,
    mut op: impl FnMut(u32) -> KvResult<T>,
    mut on_retry: impl FnMut(u32, &KvError),
) -> KvResult<T> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt >= max_attempts => {
                error!(attempts = attempt, error = %err, "retry budget exhausted");
                return Err(KvError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
            Err(err) => {
                on_retry(attempt, &err);
                std::thread::sleep(policy.backoff(attempt));
                attempt += 1;
            }
        }
    }
}

/// [`Commands`] over one pooled Redis connection.
///
/// Tracks whether the connection has an open `MULTI` or watched keys, so a
/// failed callback can hand the connection back clean.
pub struct RemoteTxn<'c, C = Connection> {
    conn: &'c mut C,
    writable: bool,
    in_multi: bool,
    watching: bool,
}

impl<'c, C: ConnectionLike> RemoteTxn<'c, C> {
    fn new(conn: &'c mut C, writable: bool) -> Self {
        Self {
            conn,
            writable,
            in_multi: false,
            watching: false,
        }
    }

    /// Whether this handle was opened by `update` rather than `view`.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Undo an open `MULTI` and any `WATCH` left by a failed callback.
    fn reset(&mut self) {
        if self.in_multi {
            // DISCARD also unwatches.
            match redis::cmd("DISCARD").query::<()>(&mut *self.conn) {
                Ok(()) => self.watching = false,
                Err(err) => debug!(error = %err, "DISCARD after failed callback failed"),
            }
            self.in_multi = false;
        }
        if self.watching {
            if let Err(err) = redis::cmd("UNWATCH").query::<()>(&mut *self.conn) {
                debug!(error = %err, "UNWATCH after failed callback failed");
            }
            self.watching = false;
        }
    }
}

impl<C: ConnectionLike> Commands for RemoteTxn<'_, C> {
    fn backend(&self) -> Backend {
        Backend::Networked
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        Ok(redis::cmd("SET").arg(key).arg(value).query(&mut *self.conn)?)
    }

    fn get(&mut self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        Ok(redis::cmd("GET").arg(key).query(&mut *self.conn)?)
    }

    fn del(&mut self, key: &[u8]) -> KvResult<()> {
        Ok(redis::cmd("DEL").arg(key).query(&mut *self.conn)?)
    }

    fn keys(&mut self, pattern: &str) -> KvResult<Vec<Vec<u8>>> {
        Ok(redis::cmd("KEYS").arg(pattern).query(&mut *self.conn)?)
    }

    fn sismember(&mut self, key: &[u8], member: &[u8]) -> KvResult<bool> {
        Ok(redis::cmd("SISMEMBER").arg(key).arg(member).query(&mut *self.conn)?)
    }

    fn smembers(&mut self, key: &[u8]) -> KvResult<Vec<Vec<u8>>> {
        Ok(redis::cmd("SMEMBERS").arg(key).query(&mut *self.conn)?)
    }

    fn sadd(&mut self, key: &[u8], member: &[u8]) -> KvResult<()> {
        Ok(redis::cmd("SADD").arg(key).arg(member).query(&mut *self.conn)?)
    }

    fn srem(&mut self, key: &[u8], member: &[u8]) -> KvResult<()> {
        Ok(redis::cmd("SREM").arg(key).arg(member).query(&mut *self.conn)?)
    }

    fn hget(&mut self, key: &[u8], field: &[u8]) -> KvResult<Option<Vec<u8>>> {
        Ok(redis::cmd("HGET").arg(key).arg(field).query(&mut *self.conn)?)
    }

    fn hset(&mut self, key: &[u8], field: &[u8], value: &[u8]) -> KvResult<()> {
        Ok(redis::cmd("HSET").arg(key).arg(field).arg(value).query(&mut *self.conn)?)
    }

    fn hmset(&mut self, key: &[u8], pairs: &[(&[u8], &[u8])]) -> KvResult<()> {
        // HMSET with no pairs is a Redis arity error.
        if pairs.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HMSET");
        cmd.arg(key);
        for (field, value) in pairs {
            cmd.arg(*field).arg(*value);
        }
        Ok(cmd.query(&mut *self.conn)?)
    }

    fn hmget(&mut self, key: &[u8], fields: &[&[u8]]) -> KvResult<Vec<Option<Vec<u8>>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(key);
        for field in fields {
            cmd.arg(*field);
        }
        Ok(cmd.query(&mut *self.conn)?)
    }

    fn hgetall(&mut self, key: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let flat: Vec<Vec<u8>> = redis::cmd("HGETALL").arg(key).query(&mut *self.conn)?;
        Ok(pair_up(flat))
    }

    fn watch(&mut self, keys: &[&[u8]]) -> KvResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("WATCH");
        for key in keys {
            cmd.arg(*key);
        }
        cmd.query::<()>(&mut *self.conn)?;
        self.watching = true;
        Ok(())
    }

    fn multi(&mut self) -> KvResult<()> {
        redis::cmd("MULTI").query::<()>(&mut *self.conn)?;
        self.in_multi = true;
        Ok(())
    }

    fn exec(&mut self) -> KvResult<()> {
        // EXEC ends the MULTI and clears watches whatever it returns.
        let reply = redis::cmd("EXEC").query::<redis::Value>(&mut *self.conn);
        self.in_multi = false;
        self.watching = false;
        match reply {
            Ok(redis::Value::Nil) => Err(KvError::TransactionAborted),
            Ok(_) => Ok(()),
            Err(err) => {
                if let Err(discard_err) = redis::cmd("DISCARD").query::<()>(&mut *self.conn) {
                    debug!(error = %discard_err, "DISCARD after failed EXEC also failed");
                }
                Err(err.into())
            }
        }
    }
}

/// Turn an interleaved `field, value, ...` reply into pairs. A dangling
/// trailing element is dropped.
fn pair_up(flat: Vec<Vec<u8>>) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut pairs = Vec::with_capacity(flat.len() / 2);
    let mut items = flat.into_iter();
    while let (Some(field), Some(value)) = (items.next(), items.next()) {
        pairs.push((field, value));
    }
    pairs
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    #[test]
    fn test_retry_succeeds_after_transient_failures() {
        let retries = Cell::new(0);
        let result = run_with_retry(
            &quick_policy(5),
            |attempt| {
                if attempt < 3 {
                    Err(KvError::Connectivity("connection reset".into()))
                } else {
                    Ok(attempt)
                }
            },
            |_, _| retries.set(retries.get() + 1),
        );
        assert_eq!(result.unwrap(), 3);
        assert_eq!(retries.get(), 2);
    }

    #[test]
    fn test_retry_gives_up_after_max_attempts() {
        let runs = Cell::new(0);
        let err = run_with_retry(
            &quick_policy(3),
            |_| -> KvResult<()> {
                runs.set(runs.get() + 1);
                Err(KvError::TransactionAborted)
            },
            |_, _| {},
        )
        .unwrap_err();

        assert_eq!(runs.get(), 3);
        match err {
            KvError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, KvError::TransactionAborted));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_transient_error_is_not_retried() {
        let runs = Cell::new(0);
        let err = run_with_retry(
            &quick_policy(5),
            |_| -> KvResult<()> {
                runs.set(runs.get() + 1);
                Err(KvError::Aborted("caller bailed".into()))
            },
            |_, _| panic!("must not retry"),
        )
        .unwrap_err();
        assert_eq!(runs.get(), 1);
        assert!(matches!(err, KvError::Aborted(_)));
    }

    #[test]
    fn test_single_attempt_policy() {
        let err = run_with_retry(
            &RetryPolicy::none(),
            |_| -> KvResult<()> { Err(KvError::Connectivity("down".into())) },
            |_, _| panic!("must not retry"),
        )
        .unwrap_err();
        assert!(matches!(err, KvError::RetriesExhausted { attempts: 1, .. }));
    }

    /// Records the name of every command sent and answers `OK`.
    #[derive(Default)]
    struct RecordingConnection {
        sent: Vec<String>,
    }

    fn command_name(packed: &[u8]) -> String {
        // `*<n>\r\n$<len>\r\n<NAME>\r\n...`
        String::from_utf8_lossy(packed)
            .split("\r\n")
            .nth(2)
            .unwrap_or_default()
            .to_string()
    }

    impl ConnectionLike for RecordingConnection {
        fn req_packed_command(&mut self, cmd: &[u8]) -> redis::RedisResult<redis::Value> {
            self.sent.push(command_name(cmd));
            Ok(redis::Value::Okay)
        }

        fn req_packed_commands(
            &mut self,
            cmd: &[u8],
            _offset: usize,
            count: usize,
        ) -> redis::RedisResult<Vec<redis::Value>> {
            self.sent.push(command_name(cmd));
            Ok(vec![redis::Value::Okay; count])
        }

        fn get_db(&self) -> i64 {
            0
        }

        fn check_connection(&mut self) -> bool {
            true
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_reset_discards_open_multi() {
        let mut conn = RecordingConnection::default();
        let mut handle = RemoteTxn::new(&mut conn, true);
        handle.watch(&[b"k".as_slice()]).unwrap();
        handle.multi().unwrap();
        handle.set(b"k", b"v").unwrap();
        handle.reset();
        handle.reset();
        assert_eq!(conn.sent, ["WATCH", "MULTI", "SET", "DISCARD"]);
    }

    #[test]
    fn test_reset_unwatches_outside_multi() {
        let mut conn = RecordingConnection::default();
        let mut handle = RemoteTxn::new(&mut conn, true);
        handle.watch(&[b"a".as_slice(), b"b".as_slice()]).unwrap();
        handle.reset();
        assert_eq!(conn.sent, ["WATCH", "UNWATCH"]);
    }

    #[test]
    fn test_exec_leaves_nothing_to_reset() {
        let mut conn = RecordingConnection::default();
        let mut handle = RemoteTxn::new(&mut conn, true);
        handle.watch(&[b"k".as_slice()]).unwrap();
        handle.multi().unwrap();
        handle.exec().unwrap();
        handle.reset();
        assert_eq!(conn.sent, ["WATCH", "MULTI", "EXEC"]);
    }

    #[test]
    fn test_reset_on_clean_connection_sends_nothing() {
        let mut conn = RecordingConnection::default();
        let mut handle = RemoteTxn::new(&mut conn, true);
        handle.set(b"k", b"v").unwrap();
        handle.del(b"k").unwrap();
        handle.reset();
        assert_eq!(conn.sent, ["SET", "DEL"]);
    }

    #[derive(Debug, PartialEq)]
    struct FakeConn {
        id: u32,
        open: bool,
    }

    #[test]
    fn test_refresh_keeps_open_connection() {
        let mut conn = FakeConn { id: 1, open: true };
        let replaced = refresh_if_closed(&mut conn, |c| c.open, || panic!("must not check out")).unwrap();
        assert!(!replaced);
        assert_eq!(conn.id, 1);
    }

    #[test]
    fn test_refresh_replaces_closed_connection() {
        let mut conn = FakeConn { id: 1, open: false };
        let replaced =
            refresh_if_closed(&mut conn, |c| c.open, || Ok(FakeConn { id: 2, open: true })).unwrap();
        assert!(replaced);
        assert_eq!(conn, FakeConn { id: 2, open: true });
    }

    #[test]
    fn test_refresh_propagates_checkout_failure() {
        let mut conn = FakeConn { id: 1, open: false };
        let err = refresh_if_closed(&mut conn, |c| c.open, || {
            Err(KvError::Connectivity("pool timed out".into()))
        })
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(conn.id, 1);
    }

    #[test]
    fn test_pair_up() {
        let flat = vec![b"f1".to_vec(), b"v1".to_vec(), b"f2".to_vec(), Vec::new()];
        assert_eq!(
            pair_up(flat),
            vec![(b"f1".to_vec(), b"v1".to_vec()), (b"f2".to_vec(), Vec::new())]
        );
        assert_eq!(pair_up(vec![b"dangling".to_vec()]), Vec::new());
    }

    #[test]
    fn test_connect_to_closed_port_fails() {
        let config = NetworkedConfig {
            address: "127.0.0.1:1".to_string(),
            pool_size: 1,
            connection_timeout_ms: 200,
            ..Default::default()
        };
        let err = NetworkedDatabase::connect(&config, 0).unwrap_err();
        assert!(matches!(err, KvError::Connectivity(_)), "{err}");
    }
}
