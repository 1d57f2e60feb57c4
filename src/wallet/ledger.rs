//! Offline transaction ledger and provisional balance.
//!
//! The ledger is an ordered JSON array under `offlineTransactions`. It is only
//! ever appended to or updated in place; entries are never removed. Every
//! change is mirrored into the display list under `walletTransactions`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

use super::types::{round4, DisplayTransaction, OfflineTransaction};
use crate::error::{WalletError, WalletResult};
use crate::store::{keys, KeyValueStore};

/// Local ledger over a key-value store.
pub struct Ledger<S: KeyValueStore> {
  store: Arc<S>,
  seed_balance: Decimal,
}

impl<S: KeyValueStore> Ledger<S> {
  pub fn new(store: Arc<S>, seed_balance: Decimal) -> Self {
    Self {
      store,
      seed_balance: round4(seed_balance),
    }
  }

  /// Current cached balance, or the seed balance if none was ever stored.
  pub fn balance(&self) -> WalletResult<Decimal> {
    let raw = self
      .store
      .get(keys::WALLET_BALANCE)
      .map_err(WalletError::storage)?;

    let Some(raw) = raw else {
      return Ok(self.seed_balance);
    };

    match Decimal::from_str(raw.trim()) {
      Ok(balance) => Ok(round4(balance)),
      Err(e) => {
        tracing::warn!(value = %raw, error = %e, "unreadable cached balance, using seed");
        Ok(self.seed_balance)
      }
    }
  }

  /// Overwrite the cached balance.
  pub fn set_balance(&self, balance: Decimal) -> WalletResult<()> {
    self
      .store
      .set(keys::WALLET_BALANCE, &round4(balance).to_string())
      .map_err(WalletError::storage)
  }

  /// All ledger entries, oldest first.
  pub fn transactions(&self) -> WalletResult<Vec<OfflineTransaction>> {
    let raw = self
      .store
      .get(keys::OFFLINE_TRANSACTIONS)
      .map_err(WalletError::storage)?;

    match raw {
      // A corrupt ledger is an error rather than empty, so it never gets overwritten
      Some(raw) => Ok(serde_json::from_str(&raw)?),
      None => Ok(Vec::new()),
    }
  }

  /// Display history, most recent first. Unreadable history reads as empty.
  pub fn history(&self) -> Vec<DisplayTransaction> {
    match self.store.get(keys::WALLET_TRANSACTIONS) {
      Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "unreadable transaction history");
        Vec::new()
      }),
      Ok(None) => Vec::new(),
      Err(e) => {
        tracing::warn!(error = %e, "failed to read transaction history");
        Vec::new()
      }
    }
  }

  /// Debit `amount` from the provisional balance and queue the transaction.
  ///
  /// Returns the new ledger entry and the provisional balance.
  pub fn debit(
    &self,
    kind: &str,
    amount: Decimal,
    description: &str,
  ) -> WalletResult<(OfflineTransaction, Decimal)> {
    // Finer amounts would round away in the balance but not in the ledger
    if (amount.is_sign_negative() && !amount.is_zero()) || amount.normalize().scale() > 4 {
      return Err(WalletError::InvalidAmount(amount));
    }
    let amount = round4(amount);

    let current = self.balance()?;
    if amount > current {
      return Err(WalletError::InsufficientBalance {
        requested: amount,
        available: current,
      });
    }

    let mut transactions = self.transactions()?;
    let now = Utc::now();
    let tx = OfflineTransaction::new(
      next_id(&transactions, now),
      kind,
      amount,
      description,
      now,
    );

    let new_balance = round4(current - amount);
    self.set_balance(new_balance)?;

    transactions.push(tx.clone());
    if let Err(e) = self.save_transactions(&transactions) {
      // Keep balance and ledger consistent
      if let Err(restore) = self.set_balance(current) {
        tracing::error!(error = %restore, "failed to restore balance after ledger write failure");
      }
      return Err(e);
    }

    self.mirror(&tx);

    tracing::info!(
      id = tx.id,
      kind = %tx.kind,
      amount = %tx.amount,
      balance = %new_balance,
      "recorded offline debit"
    );
    Ok((tx, new_balance))
  }

  /// Persist `transactions` and mirror the entry at `index` into history.
  pub fn commit_entry(
    &self,
    transactions: &[OfflineTransaction],
    index: usize,
  ) -> WalletResult<()> {
    self.save_transactions(transactions)?;
    if let Some(tx) = transactions.get(index) {
      self.mirror(tx);
    }
    Ok(())
  }

  fn save_transactions(&self, transactions: &[OfflineTransaction]) -> WalletResult<()> {
    let encoded = serde_json::to_string(transactions)?;
    self
      .store
      .set(keys::OFFLINE_TRANSACTIONS, &encoded)
      .map_err(WalletError::storage)
  }

  /// Upsert `tx` into the display history. Failures are logged only.
  fn mirror(&self, tx: &OfflineTransaction) {
    let mut history = self.history();
    let entry = DisplayTransaction::from(tx);

    match history.iter_mut().find(|h| h.id == entry.id) {
      Some(existing) => *existing = entry,
      None => history.insert(0, entry),
    }

    let result = serde_json::to_string(&history)
      .map_err(|e| e.to_string())
      .and_then(|encoded| {
        self
          .store
          .set(keys::WALLET_TRANSACTIONS, &encoded)
          .map_err(|e| e.to_string())
      });

    if let Err(e) = result {
      tracing::warn!(id = tx.id, error = %e, "failed to update transaction history");
    }
  }
}

/// Millisecond timestamp id, strictly greater than every existing id.
fn next_id(transactions: &[OfflineTransaction], now: DateTime<Utc>) -> i64 {
  let candidate = now.timestamp_millis();
  match transactions.iter().map(|t| t.id).max() {
    Some(last) if last >= candidate => last + 1,
    _ => candidate,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;
  use crate::wallet::types::TxStatus;

  fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
  }

  fn ledger() -> (Arc<MemoryStore>, Ledger<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (store.clone(), Ledger::new(store, dec("100")))
  }

  #[test]
  fn test_seed_balance_on_first_use() {
    let (store, ledger) = ledger();
    assert_eq!(ledger.balance().unwrap().to_string(), "100.0000");
    // Reading does not persist the seed
    assert!(store.get(keys::WALLET_BALANCE).unwrap().is_none());
  }

  #[test]
  fn test_insufficient_balance_leaves_state_untouched() {
    let (store, ledger) = ledger();
    ledger.set_balance(dec("10")).unwrap();

    for amount in ["10.0001", "11", "1000000"] {
      let err = ledger.debit("transfer", dec(amount), "x").unwrap_err();
      assert!(matches!(err, WalletError::InsufficientBalance { .. }));
    }

    assert_eq!(
      store.get(keys::WALLET_BALANCE).unwrap().as_deref(),
      Some("10.0000")
    );
    assert!(ledger.transactions().unwrap().is_empty());
    assert!(ledger.history().is_empty());
  }

  #[test]
  fn test_negative_amount_rejected() {
    let (_, ledger) = ledger();
    let err = ledger.debit("transfer", dec("-1"), "x").unwrap_err();
    assert!(matches!(err, WalletError::InvalidAmount(_)));
  }

  #[test]
  fn test_sequential_debits_accumulate() {
    let (store, ledger) = ledger();
    let amounts = ["12.3456", "0.0001", "7", "30.5"];

    for amount in amounts {
      ledger.debit("purchase", dec(amount), "trip").unwrap();
    }

    let transactions = ledger.transactions().unwrap();
    assert_eq!(transactions.len(), amounts.len());
    assert!(transactions.iter().all(|t| t.status == TxStatus::Pending));

    assert_eq!(
      store.get(keys::WALLET_BALANCE).unwrap().as_deref(),
      Some("50.1543")
    );
  }

  #[test]
  fn test_amount_finer_than_balance_scale_rejected() {
    let (store, ledger) = ledger();

    let err = ledger.debit("transfer", dec("0.00005"), "x").unwrap_err();
    assert!(matches!(err, WalletError::InvalidAmount(_)));
    assert!(store.get(keys::WALLET_BALANCE).unwrap().is_none());
    assert!(ledger.transactions().unwrap().is_empty());

    // Trailing zeros beyond the scale are fine
    let (tx, _) = ledger.debit("transfer", dec("1.500000"), "x").unwrap();
    assert_eq!(tx.amount.to_string(), "1.5000");
  }

  #[test]
  fn test_ledger_total_matches_balance_change() {
    let (_, ledger) = ledger();
    ledger.debit("transfer", dec("0.0001"), "x").unwrap();
    let (_, balance) = ledger.debit("transfer", dec("0.0001"), "x").unwrap();
    assert_eq!(balance.to_string(), "99.9998");

    let total: Decimal = ledger.transactions().unwrap().iter().map(|t| t.amount).sum();
    assert_eq!(dec("100") - balance, total);
  }

  #[test]
  fn test_debit_entire_balance() {
    let (_, ledger) = ledger();
    let (_, balance) = ledger.debit("transfer", dec("100"), "all").unwrap();
    assert_eq!(balance.to_string(), "0.0000");
  }

  #[test]
  fn test_ids_are_unique_and_ordered() {
    let (_, ledger) = ledger();
    for _ in 0..5 {
      ledger.debit("transfer", dec("1"), "x").unwrap();
    }

    let ids: Vec<i64> = ledger.transactions().unwrap().iter().map(|t| t.id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
  }

  #[test]
  fn test_history_mirrors_ledger() {
    let (_, ledger) = ledger();
    let (first, _) = ledger.debit("transfer", dec("1"), "first").unwrap();
    let (second, _) = ledger.debit("transfer", dec("2"), "second").unwrap();

    let history = ledger.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, second.id);
    assert_eq!(history[1].id, first.id);

    let mut transactions = ledger.transactions().unwrap();
    transactions[0].mark_synced();
    ledger.commit_entry(&transactions, 0).unwrap();

    let history = ledger.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].status, "Completed");
    assert_eq!(history[0].status, "Pending synchronization");
  }

  #[test]
  fn test_corrupt_ledger_is_not_overwritten() {
    let (store, ledger) = ledger();
    store.set(keys::OFFLINE_TRANSACTIONS, "not json").unwrap();

    assert!(ledger.debit("transfer", dec("1"), "x").is_err());
    assert_eq!(
      store.get(keys::OFFLINE_TRANSACTIONS).unwrap().as_deref(),
      Some("not json")
    );
    assert_eq!(ledger.balance().unwrap(), dec("100"));
  }

  #[test]
  fn test_unreadable_balance_falls_back_to_seed() {
    let (store, ledger) = ledger();
    store.set(keys::WALLET_BALANCE, "abc").unwrap();
    assert_eq!(ledger.balance().unwrap().to_string(), "100.0000");
  }

  #[test]
  fn test_storage_failure_surfaces() {
    let (store, ledger) = ledger();
    store.fail_writes(true);

    let err = ledger.debit("transfer", dec("1"), "x").unwrap_err();
    assert!(matches!(err, WalletError::Storage(_)));
    assert_eq!(ledger.balance().unwrap(), dec("100"));
  }
}
