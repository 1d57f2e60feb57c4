//! In-process storage backend for tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{
  atomic::{AtomicBool, Ordering},
  Mutex,
};

use super::traits::KeyValueStore;

/// Storage that keeps everything in a `HashMap`.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<String, String>>,
  fail_writes: AtomicBool,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every subsequent `set`/`remove` fail.
  pub fn fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  fn check_writable(&self) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(eyre!("Memory store is read-only"));
    }
    Ok(())
  }
}

impl KeyValueStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    self.check_writable()?;
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self.check_writable()?;
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.remove(key);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_set_get_remove() {
    let store = MemoryStore::new();
    assert_eq!(store.get("a").unwrap(), None);

    store.set("a", "1").unwrap();
    assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

    store.remove("a").unwrap();
    assert_eq!(store.get("a").unwrap(), None);
  }

  #[test]
  fn test_failing_writes() {
    let store = MemoryStore::new();
    store.set("a", "1").unwrap();
    store.fail_writes(true);

    assert!(store.set("a", "2").is_err());
    assert!(store.remove("a").is_err());
    assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
  }
}
