//! Core types for the caching system.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Envelope written to storage for every cached value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
  pub value: T,
  pub stored_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
  pub fn new(value: T, ttl: Duration) -> Self {
    let stored_at = Utc::now();
    Self {
      value,
      stored_at,
      expires_at: stored_at + ttl,
    }
  }

  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    now > self.expires_at
  }
}

/// Result from a cache-backed read, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Fresh data from the server.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Unexpired cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Local provisional data served because the server is unavailable.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: None,
    }
  }
}

/// Indicates where data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Cached server data that has not expired
  Cache,
  /// Network unavailable, serving the local provisional value
  Offline,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Network => write!(f, "network"),
      Self::Cache => write!(f, "cache"),
      Self::Offline => write!(f, "offline"),
    }
  }
}
