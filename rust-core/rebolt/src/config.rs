// SPDX-License-Identifier: PMPL-1.0-or-later
//! Store configuration.
//!
//! Either backend may be left out; asking a [`crate::Store`] for a backend
//! it was not configured with fails with `NotConfigured`. Every field except
//! the embedded path and the networked address has a default, so a JSON
//! document only needs the parts it changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KvError, KvResult};

/// File mode for a newly created embedded store file.
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// Configuration for both backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// The embedded redb store, if used.
    pub embedded: Option<EmbeddedConfig>,
    /// The networked Redis store, if used.
    pub networked: Option<NetworkedConfig>,
}

impl StoreConfig {
    /// Embedded store backed by the file at `path`.
    pub fn embedded(path: impl Into<PathBuf>) -> Self {
        Self {
            embedded: Some(EmbeddedConfig {
                path: Some(path.into()),
                ..Default::default()
            }),
            networked: None,
        }
    }

    /// Embedded store kept entirely in memory.
    pub fn in_memory() -> Self {
        Self {
            embedded: Some(EmbeddedConfig {
                in_memory: true,
                ..Default::default()
            }),
            networked: None,
        }
    }

    /// Networked store at `address` (`host:port` for TCP).
    pub fn networked(address: impl Into<String>) -> Self {
        Self {
            embedded: None,
            networked: Some(NetworkedConfig {
                address: address.into(),
                ..Default::default()
            }),
        }
    }

    /// Parse a JSON configuration document.
    pub fn from_json_str(json: &str) -> KvResult<Self> {
        serde_json::from_str(json).map_err(|e| KvError::Configuration(format!("invalid config: {e}")))
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> KvResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            KvError::Configuration(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Reject configurations that could never open.
    pub fn validate(&self) -> KvResult<()> {
        if self.embedded.is_none() && self.networked.is_none() {
            return Err(KvError::Configuration(
                "no backend configured: set `embedded`, `networked`, or both".to_string(),
            ));
        }
        if let Some(embedded) = &self.embedded {
            embedded.validate()?;
        }
        if let Some(networked) = &self.networked {
            networked.validate()?;
        }
        Ok(())
    }
}

/// Embedded (redb) store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddedConfig {
    /// Path of the store file. Required unless `in_memory` is set.
    pub path: Option<PathBuf>,
    /// Keep the store in memory instead of on disk; `path` is ignored.
    pub in_memory: bool,
    /// Unix permission bits used when the file is created.
    pub mode: u32,
    /// redb page cache size in bytes; redb's default when unset.
    pub cache_size: Option<usize>,
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self {
            path: None,
            in_memory: false,
            mode: DEFAULT_FILE_MODE,
            cache_size: None,
        }
    }
}

impl EmbeddedConfig {
    fn validate(&self) -> KvResult<()> {
        if self.in_memory {
            return Ok(());
        }
        match &self.path {
            Some(path) if !path.as_os_str().is_empty() => Ok(()),
            _ => Err(KvError::Configuration(
                "embedded store needs a path (or `in_memory: true`)".to_string(),
            )),
        }
    }
}

/// Transport used to reach the networked store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// `host:port` over TCP.
    Tcp,
    /// A Unix domain socket path.
    Unix,
}

/// Networked (Redis) store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkedConfig {
    /// Transport for `address`.
    pub network: Network,
    /// `host:port` for TCP, a socket path for Unix.
    pub address: String,
    /// Maximum connections per database index.
    pub pool_size: u32,
    /// How long to wait for a free pooled connection, in milliseconds.
    pub connection_timeout_ms: u64,
    /// Retry behaviour for failed callbacks.
    pub retry: RetryPolicy,
}

impl Default for NetworkedConfig {
    fn default() -> Self {
        Self {
            network: Network::Tcp,
            address: String::new(),
            pool_size: 10,
            connection_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl NetworkedConfig {
    /// Pool checkout timeout.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Connection URL selecting database `index`.
    pub fn url(&self, index: u32) -> String {
        match self.network {
            Network::Tcp => format!("redis://{}/{}", self.address, index),
            Network::Unix => format!("redis+unix://{}?db={}", self.address, index),
        }
    }

    fn validate(&self) -> KvResult<()> {
        if self.address.trim().is_empty() {
            return Err(KvError::Configuration(
                "networked store needs an address".to_string(),
            ));
        }
        if self.pool_size == 0 {
            return Err(KvError::Configuration(
                "networked pool_size must be at least 1".to_string(),
            ));
        }
        self.retry.validate()
    }
}

/// Bounded retry with exponential backoff, applied to transient
/// networked failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total runs of a callback, including the first.
    pub max_attempts: u32,
    /// Delay before the second run, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Run once, never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay after failed attempt number `attempt` (1-based): doubles each
    /// time, capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    fn validate(&self) -> KvResult<()> {
        if self.max_attempts == 0 {
            return Err(KvError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
