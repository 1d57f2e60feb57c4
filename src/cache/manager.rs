//! Cache manager: put/get with TTL and lazy eviction.

use chrono::{Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

use super::traits::CacheEntry;
use crate::store::KeyValueStore;

/// Default time-to-live for cached values.
const DEFAULT_TTL_MINUTES: i64 = 60;

/// Cache manager that never fails: storage and serialization faults are
/// logged and reported as `false` / `None`.
pub struct CacheManager<S: KeyValueStore> {
  store: Arc<S>,
  default_ttl: Duration,
}

impl<S: KeyValueStore> CacheManager<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      default_ttl: Duration::minutes(DEFAULT_TTL_MINUTES),
    }
  }

  /// Set the TTL used by [`CacheManager::put`].
  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  /// Cache `value` under `key` with the default TTL.
  pub fn put<T: Serialize>(&self, key: &str, value: &T) -> bool {
    self.put_for(key, value, self.default_ttl)
  }

  /// Cache `value` under `key`, expiring after `ttl`.
  pub fn put_for<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
    let entry = CacheEntry::new(value, ttl);

    let encoded = match serde_json::to_string(&entry) {
      Ok(encoded) => encoded,
      Err(e) => {
        tracing::warn!(key, error = %e, "failed to serialize cache entry");
        return false;
      }
    };

    match self.store.set(key, &encoded) {
      Ok(()) => true,
      Err(e) => {
        tracing::warn!(key, error = %e, "failed to write cache entry");
        false
      }
    }
  }

  /// Read the value cached under `key`, or `None` if missing, expired or
  /// unreadable.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    self.get_entry(key).map(|entry| entry.value)
  }

  /// Like [`CacheManager::get`] but keeps the envelope timestamps.
  pub fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
    let raw = match self.store.get(key) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        tracing::warn!(key, error = %e, "failed to read cache entry");
        return None;
      }
    };

    let entry: CacheEntry<T> = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        tracing::debug!(key, error = %e, "discarding undecodable cache entry");
        return None;
      }
    };

    if entry.is_expired_at(Utc::now()) {
      tracing::debug!(key, expired_at = %entry.expires_at, "evicting expired cache entry");
      self.remove(key);
      return None;
    }

    Some(entry)
  }

  /// Drop the entry under `key`.
  pub fn remove(&self, key: &str) -> bool {
    match self.store.remove(key) {
      Ok(()) => true,
      Err(e) => {
        tracing::warn!(key, error = %e, "failed to remove cache entry");
        false
      }
    }
  }
}

impl<S: KeyValueStore> Clone for CacheManager<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      default_ttl: self.default_ttl,
    }
  }
}
