//! Storage trait and the well-known keys the wallet writes.

use color_eyre::Result;

/// Well-known storage keys.
pub mod keys {
  /// Provisional or reconciled balance, 4-decimal string.
  pub const WALLET_BALANCE: &str = "walletBalance";
  /// Ordered sequence of offline transactions.
  pub const OFFLINE_TRANSACTIONS: &str = "offlineTransactions";
  /// Denormalized history for display.
  pub const WALLET_TRANSACTIONS: &str = "walletTransactions";
  /// Bearer credential for the wallet API.
  pub const TOKEN: &str = "token";
  /// Last authoritative balance fetched from the server (TTL cached).
  pub const BALANCE_SNAPSHOT: &str = "balanceSnapshot";
}

/// Trait for local storage backends.
pub trait KeyValueStore: Send + Sync {
  /// Read the raw value stored under `key`.
  fn get(&self, key: &str) -> Result<Option<String>>;

  /// Write `value` under `key`, replacing any previous value.
  fn set(&self, key: &str, value: &str) -> Result<()>;

  /// Delete `key`. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<()>;
}
