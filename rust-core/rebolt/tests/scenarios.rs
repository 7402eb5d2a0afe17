// SPDX-License-Identifier: PMPL-1.0-or-later
//! Behaviour shared by both backends.
//!
//! Each scenario runs against an embedded store. The networked variants need
//! a disposable Redis server: set `REBOLT_REDIS_ADDR` (for example
//! `127.0.0.1:6379`) and run with `--ignored --test-threads=1`. They use
//! database 13 and delete every key in it.

use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

use rebolt::{Backend, Database, KvError, KvResult, Store, StoreConfig, Txn};

const NETWORKED_INDEX: u32 = 13;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn embedded_db() -> (tempfile::TempDir, Database) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&StoreConfig::embedded(dir.path().join("scenarios.redb"))).unwrap();
    let db = store.database(Backend::Embedded, 0).unwrap();
    (dir, db)
}

fn networked_db() -> Database {
    networked_db_with_pool(10)
}

fn networked_db_with_pool(pool_size: u32) -> Database {
    init_tracing();
    let addr = std::env::var("REBOLT_REDIS_ADDR").unwrap_or_else(|_| "127.0.0.1:6379".to_string());
    let mut config = StoreConfig::networked(addr);
    if let Some(net) = config.networked.as_mut() {
        net.pool_size = pool_size;
    }
    let store = Store::open(&config).unwrap();
    let db = store.database(Backend::Networked, NETWORKED_INDEX).unwrap();
    clear(&db).unwrap();
    db
}

fn bytes_set(items: &[&str]) -> BTreeSet<Vec<u8>> {
    items.iter().map(|s| s.as_bytes().to_vec()).collect()
}

fn all_keys(tx: &mut Txn<'_>) -> KvResult<BTreeSet<Vec<u8>>> {
    Ok(tx.keys("*")?.into_iter().collect())
}

fn clear(db: &Database) -> KvResult<()> {
    db.update(|tx| {
        for key in tx.keys("*")? {
            tx.del(&key)?;
        }
        Ok(())
    })
}

// ===========================================================================
// Scenario bodies
// ===========================================================================

fn scalars_and_keys(db: &Database) {
    db.update(|tx| {
        tx.set("hello", "world")?;
        tx.set("hi", "hero")?;
        tx.set("other", "value")
    })
    .unwrap();

    let matched: BTreeSet<Vec<u8>> = db
        .view(|tx| tx.keys("h*"))
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(matched, bytes_set(&["hello", "hi"]));

    let value = db.view(|tx| tx.get("hello")).unwrap();
    assert_eq!(value.as_deref(), Some(&b"world"[..]));
}

fn set_membership(db: &Database) {
    db.update(|tx| {
        tx.sadd("set", "hello")?;
        tx.sadd("set", "hi")?;
        tx.srem("set", "hi")
    })
    .unwrap();

    db.view(|tx| {
        let members: BTreeSet<Vec<u8>> = tx.smembers("set")?.into_iter().collect();
        assert_eq!(members, bytes_set(&["hello"]));
        assert!(tx.sismember("set", "hello")?);
        assert!(!tx.sismember("set", "hi")?);
        Ok(())
    })
    .unwrap();
}

fn hash_batch(db: &Database) {
    db.update(|tx| tx.hmset_flat("hash", &["hello", "world", "hi", "hero"]))
        .unwrap();

    let values = db.view(|tx| tx.hmget("hash", &["hello", "hi", "absent"])).unwrap();
    assert_eq!(
        values,
        vec![Some(b"world".to_vec()), Some(b"hero".to_vec()), None]
    );

    let all: BTreeSet<(Vec<u8>, Vec<u8>)> =
        db.view(|tx| tx.hgetall("hash")).unwrap().into_iter().collect();
    assert_eq!(all.len(), 2);
    assert!(all.contains(&(b"hi".to_vec(), b"hero".to_vec())));
}

fn empty_hash_value(db: &Database) {
    db.update(|tx| tx.hset("ehash", "statusHost", "")).unwrap();

    let value = db.view(|tx| tx.hget("ehash", "statusHost")).unwrap();
    assert_eq!(value, Some(Vec::new()));
    let missing = db.view(|tx| tx.hget("ehash", "other")).unwrap();
    assert_eq!(missing, None);
}

fn delete_everything(db: &Database) {
    db.update(|tx| {
        tx.set("a", "1")?;
        tx.sadd("b", "x")?;
        tx.hset("c", "f", "v")
    })
    .unwrap();

    clear(db).unwrap();
    assert!(db.view(all_keys).unwrap().is_empty());
}

fn odd_hmset_writes_nothing(db: &Database) {
    let err = db
        .update(|tx| tx.hmset_flat("hash", &["f1", "v1", "f2"]))
        .unwrap_err();
    assert!(matches!(err, KvError::OddArgumentCount(3)));
    assert!(db.view(|tx| tx.hgetall("hash")).unwrap().is_empty());
}

// ===========================================================================
// Embedded
// ===========================================================================

#[test]
fn test_embedded_scalars_and_keys() {
    let (_dir, db) = embedded_db();
    scalars_and_keys(&db);
}

#[test]
fn test_embedded_set_membership() {
    let (_dir, db) = embedded_db();
    set_membership(&db);
}

#[test]
fn test_embedded_hash_batch() {
    let (_dir, db) = embedded_db();
    hash_batch(&db);
}

#[test]
fn test_embedded_empty_hash_value() {
    let (_dir, db) = embedded_db();
    empty_hash_value(&db);
}

#[test]
fn test_embedded_delete_everything() {
    let (_dir, db) = embedded_db();
    delete_everything(&db);
}

#[test]
fn test_embedded_odd_hmset_writes_nothing() {
    let (_dir, db) = embedded_db();
    odd_hmset_writes_nothing(&db);
}

#[test]
fn test_embedded_failed_update_leaves_no_partial_state() {
    let (_dir, db) = embedded_db();
    db.update(|tx| tx.set("kept", "before")).unwrap();

    let err = db
        .update(|tx| -> KvResult<()> {
            tx.set("kept", "after")?;
            tx.sadd("new-set", "member")?;
            Err(KvError::Aborted("caller gave up".to_string()))
        })
        .unwrap_err();
    assert!(matches!(err, KvError::Aborted(_)));

    db.view(|tx| {
        assert_eq!(tx.get("kept")?.as_deref(), Some(&b"before"[..]));
        assert_eq!(all_keys(tx)?, bytes_set(&["kept"]));
        Ok(())
    })
    .unwrap();

    let stats = db.stats();
    assert_eq!(stats.updates, 2);
    assert_eq!(stats.commits, 2);
    assert_eq!(stats.rollbacks, 1);
}

#[test]
fn test_embedded_view_sees_snapshot_during_concurrent_update() {
    let (_dir, db) = embedded_db();
    db.update(|tx| tx.set("counter", "1")).unwrap();

    let reader_ready = Arc::new(Barrier::new(2));
    let writer_done = Arc::new(Barrier::new(2));

    let reader = {
        let db = db.clone();
        let reader_ready = Arc::clone(&reader_ready);
        let writer_done = Arc::clone(&writer_done);
        thread::spawn(move || {
            db.view(|tx| {
                let before = tx.get("counter")?;
                reader_ready.wait();
                writer_done.wait();
                let after = tx.get("counter")?;
                Ok((before, after))
            })
        })
    };

    reader_ready.wait();
    db.update(|tx| tx.set("counter", "2")).unwrap();
    writer_done.wait();

    let (before, after) = reader.join().unwrap().unwrap();
    assert_eq!(before.as_deref(), Some(&b"1"[..]));
    assert_eq!(after.as_deref(), Some(&b"1"[..]));

    let now = db.view(|tx| tx.get("counter")).unwrap();
    assert_eq!(now.as_deref(), Some(&b"2"[..]));
}

#[test]
fn test_embedded_namespaces_share_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.redb");
    let store = Store::open(&StoreConfig::embedded(&path)).unwrap();

    let zero = store.database(Backend::Embedded, 0).unwrap();
    let one = store.database(Backend::Embedded, 1).unwrap();
    zero.update(|tx| tx.set("k", "zero")).unwrap();
    one.update(|tx| tx.set("k", "one")).unwrap();

    assert_eq!(zero.view(|tx| tx.get("k")).unwrap(), Some(b"zero".to_vec()));
    assert_eq!(one.view(|tx| tx.get("k")).unwrap(), Some(b"one".to_vec()));

    one.update(|tx| tx.del("k")).unwrap();
    assert_eq!(zero.view(|tx| tx.get("k")).unwrap(), Some(b"zero".to_vec()));
}

// ===========================================================================
// Networked (needs a Redis server)
// ===========================================================================

#[test]
#[ignore = "needs a Redis server at REBOLT_REDIS_ADDR"]
fn test_networked_scalars_and_keys() {
    scalars_and_keys(&networked_db());
}

#[test]
#[ignore = "needs a Redis server at REBOLT_REDIS_ADDR"]
fn test_networked_set_membership() {
    set_membership(&networked_db());
}

#[test]
#[ignore = "needs a Redis server at REBOLT_REDIS_ADDR"]
fn test_networked_hash_batch() {
    hash_batch(&networked_db());
}

#[test]
#[ignore = "needs a Redis server at REBOLT_REDIS_ADDR"]
fn test_networked_empty_hash_value() {
    empty_hash_value(&networked_db());
}

#[test]
#[ignore = "needs a Redis server at REBOLT_REDIS_ADDR"]
fn test_networked_delete_everything() {
    delete_everything(&networked_db());
}

#[test]
#[ignore = "needs a Redis server at REBOLT_REDIS_ADDR"]
fn test_networked_odd_hmset_writes_nothing() {
    odd_hmset_writes_nothing(&networked_db());
}

#[test]
#[ignore = "needs a Redis server at REBOLT_REDIS_ADDR"]
fn test_networked_watch_multi_exec() {
    let db = networked_db();
    db.update(|tx| {
        tx.watch(&["balance"])?;
        tx.multi()?;
        tx.set("balance", "10")?;
        tx.exec()
    })
    .unwrap();

    let balance = db.view(|tx| tx.get("balance")).unwrap();
    assert_eq!(balance.as_deref(), Some(&b"10"[..]));
}

#[test]
#[ignore = "needs a Redis server at REBOLT_REDIS_ADDR"]
fn test_networked_failed_multi_leaves_connection_clean() {
    // One pooled connection, so the next call reuses the aborted one.
    let db = networked_db_with_pool(1);
    db.update(|tx| tx.set("k", "real")).unwrap();

    let err = db
        .update(|tx| -> KvResult<()> {
            tx.watch(&["k"])?;
            tx.multi()?;
            tx.set("k", "queued")?;
            Err(KvError::Aborted("caller gave up".to_string()))
        })
        .unwrap_err();
    assert!(matches!(err, KvError::Aborted(_)));

    let value = db.view(|tx| tx.get("k")).unwrap();
    assert_eq!(value.as_deref(), Some(&b"real"[..]));

    db.update(|tx| {
        tx.multi()?;
        tx.set("k", "committed")?;
        tx.exec()
    })
    .unwrap();
    let value = db.view(|tx| tx.get("k")).unwrap();
    assert_eq!(value.as_deref(), Some(&b"committed"[..]));
}
