// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-database transaction statistics.
//
// Every `Database` handle (and its clones) shares one set of counters.
// Counters are monotonically increasing until `reset`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Snapshot of the counters for one database handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    /// `update` calls started.
    pub updates: u64,
    /// `view` calls started.
    pub views: u64,
    /// Callbacks that finished successfully (and committed, on redb).
    pub commits: u64,
    /// Callbacks that finished with an error.
    pub rollbacks: u64,
    /// Extra callback runs made by the networked retry policy.
    pub retries: u64,
}

#[derive(Debug, Default)]
struct Counters {
    updates: AtomicU64,
    views: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    retries: AtomicU64,
}

/// Shared, lock-free counter set.
#[derive(Debug, Clone, Default)]
pub(crate) struct StatsRecorder {
    counters: Arc<Counters>,
}

impl StatsRecorder {
    pub(crate) fn begin(&self, writable: bool) {
        let counter = if writable {
            &self.counters.updates
        } else {
            &self.counters.views
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn finish<T, E>(&self, result: &Result<T, E>) {
        let counter = if result.is_ok() {
            &self.counters.commits
        } else {
            &self.counters.rollbacks
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retry(&self) {
        self.counters.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DatabaseStats {
        let c = &self.counters;
        DatabaseStats {
            updates: c.updates.load(Ordering::Relaxed),
            views: c.views.load(Ordering::Relaxed),
            commits: c.commits.load(Ordering::Relaxed),
            rollbacks: c.rollbacks.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        let c = &self.counters;
        for counter in [&c.updates, &c.views, &c.commits, &c.rollbacks, &c.retries] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
