// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Error types for rebolt.
//
// One enum covers both backends: configuration and connectivity failures
// raised while acquiring a database, codec rejections, redb engine errors,
// Redis command errors, and the retry-exhaustion error of the networked
// scope provider.

use thiserror::Error;

use crate::backend::Backend;

/// Result alias used throughout the crate.
pub type KvResult<T> = Result<T, KvError>;

/// Errors that can occur when acquiring or using a database.
#[derive(Debug, Error)]
pub enum KvError {
    /// The store configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The requested backend was never configured on this store.
    #[error("{0} backend is not configured on this store")]
    NotConfigured(Backend),

    /// A pooled connection to the networked store could not be established
    /// or verified.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// A value could not be converted to bytes or pattern text.
    #[error("unsupported value type: {0}")]
    UnsupportedValueType(String),

    /// A glob pattern passed to `keys` could not be compiled.
    #[error("invalid key pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why the glob compiler rejected it.
        reason: String,
    },

    /// A flat field/value argument list had an odd number of elements.
    #[error("hash arguments must come in field/value pairs, got {0} elements")]
    OddArgumentCount(usize),

    /// A write was attempted inside a read-only embedded transaction.
    #[error("write attempted in a read-only transaction")]
    ReadOnlyTransaction,

    /// The embedded engine reported an error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A command sent to the networked store failed.
    #[error("remote error: {0}")]
    Remote(#[from] redis::RedisError),

    /// `EXEC` returned nil because a watched key changed.
    #[error("transaction aborted: a watched key was modified")]
    TransactionAborted,

    /// The networked retry policy gave up.
    #[error("giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// How many times the callback ran.
        attempts: u32,
        /// The error returned by the last attempt.
        #[source]
        source: Box<KvError>,
    },

    /// Failed to serialize or deserialize a typed value.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A callback asked for its transaction to be rolled back.
    #[error("aborted: {0}")]
    Aborted(String),

    /// A blocking task driving a transaction could not be joined.
    #[error("background task failed: {0}")]
    Background(String),

    /// An I/O error occurred while preparing the store file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KvError {
    /// Whether the failure is connection-level and worth retrying on the
    /// networked backend.
    ///
    /// A nil `EXEC` counts as transient: the optimistic `WATCH`/`MULTI`
    /// pattern expects the callback to run again.
    pub fn is_transient(&self) -> bool {
        match self {
            KvError::Connectivity(_) | KvError::TransactionAborted => true,
            KvError::Remote(err) => {
                err.is_io_error()
                    || err.is_connection_dropped()
                    || err.is_connection_refusal()
                    || err.is_timeout()
                    || matches!(
                        err.kind(),
                        redis::ErrorKind::TryAgain | redis::ErrorKind::BusyLoadingError
                    )
            }
            _ => false,
        }
    }
}

macro_rules! storage_error_from {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for KvError {
                fn from(err: $ty) -> Self {
                    KvError::Storage(redb::Error::from(err).to_string())
                }
            }
        )+
    };
}

storage_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl From<r2d2::Error> for KvError {
    fn from(err: r2d2::Error) -> Self {
        KvError::Connectivity(err.to_string())
    }
}
