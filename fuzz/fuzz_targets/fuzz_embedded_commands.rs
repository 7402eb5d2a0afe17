// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for embedded key encoding and glob enumeration

#![no_main]

use libfuzzer_sys::fuzz_target;
use rebolt::{Backend, KvError, Store, StoreConfig};

fuzz_target!(|data: &[u8]| {
    let Ok(store) = Store::open(&StoreConfig::in_memory()) else {
        return;
    };
    let Ok(db) = store.database(Backend::Embedded, 0) else {
        return;
    };

    // First byte splits the input into a key and a field list.
    let (split, rest) = match data.split_first() {
        Some((split, rest)) => (*split as usize % (rest.len() + 1), rest),
        None => return,
    };
    let (key, tail) = rest.split_at(split);
    let args: Vec<&[u8]> = tail.chunks(3).collect();

    let written = db.update(|tx| {
        tx.set(key, tail)?;
        match tx.hmset_flat(key, &args) {
            Err(KvError::OddArgumentCount(n)) => assert_eq!(n % 2, 1),
            other => other?,
        }
        Ok(())
    });
    assert!(written.is_ok());

    // Every stored key must be listed by "*" regardless of its bytes.
    let listed = db.view(|tx| tx.keys("*")).unwrap_or_default();
    assert!(listed.iter().any(|k| k.as_slice() == key));

    // Arbitrary patterns may be rejected but must not panic.
    if let Ok(pattern) = std::str::from_utf8(tail) {
        match db.view(|tx| tx.keys(pattern)) {
            Ok(_) | Err(KvError::InvalidPattern { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
});
