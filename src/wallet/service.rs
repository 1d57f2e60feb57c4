//! Offline wallet service: debits, synchronization and reconciliation.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::ledger::Ledger;
use super::types::{DisplayTransaction, OfflineTransaction, RetryPolicy, TxStatus};
use crate::api::{SyncRequest, WalletApi};
use crate::cache::{CacheManager, CacheResult};
use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::error::{WalletError, WalletResult};
use crate::store::{keys, KeyValueStore};

/// Outcome of a successful debit.
#[derive(Debug)]
pub struct DebitReceipt {
  pub success: bool,
  /// Provisional balance, not yet confirmed by the server
  pub new_balance: Decimal,
  pub transaction: OfflineTransaction,
  /// Background sync started because the device was online
  pub sync_task: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  NoCredential,
  Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  /// Preconditions not met; nothing was attempted
  Skipped(SkipReason),
  /// Every due entry was attempted
  Completed,
  /// Health probe failed; remaining entries were left for later
  Aborted,
}

/// What a `sync_pending` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
  pub outcome: SyncOutcome,
  /// Ids marked synced, in the order they were submitted
  pub synced: Vec<i64>,
  /// Ids that ran out of attempts during this call
  pub dead_lettered: Vec<i64>,
  /// Entries still pending afterwards
  pub still_pending: usize,
  /// Authoritative balance written during reconciliation
  pub reconciled_balance: Option<Decimal>,
}

impl SyncReport {
  fn skipped(reason: SkipReason) -> Self {
    Self {
      outcome: SyncOutcome::Skipped(reason),
      synced: Vec::new(),
      dead_lettered: Vec::new(),
      still_pending: 0,
      reconciled_balance: None,
    }
  }

  pub fn any_synced(&self) -> bool {
    !self.synced.is_empty()
  }
}

/// Tri-state server availability for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
  Offline,
  Degraded,
  Available,
}

impl std::fmt::Display for ServerStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Offline => write!(f, "offline"),
      Self::Degraded => write!(f, "degraded"),
      Self::Available => write!(f, "available"),
    }
  }
}

/// Last server-confirmed balance, cached with a TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
  pub balance: Decimal,
  pub fetched_at: DateTime<Utc>,
}

struct Inner<S: KeyValueStore, C: Connectivity + ?Sized> {
  store: Arc<S>,
  ledger: Ledger<S>,
  cache: CacheManager<S>,
  connectivity: Arc<C>,
  api: WalletApi,
  policy: RetryPolicy,
  /// Serializes every ledger/balance mutation
  write_lock: Mutex<()>,
}

/// Offline-first wallet service.
///
/// Cheap to clone; clones share storage and the write lock.
pub struct OfflineService<S: KeyValueStore, C: Connectivity + ?Sized> {
  inner: Arc<Inner<S, C>>,
}

impl<S: KeyValueStore, C: Connectivity + ?Sized> Clone for OfflineService<S, C> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<S, C> OfflineService<S, C>
where
  S: KeyValueStore + 'static,
  C: Connectivity + ?Sized + 'static,
{
  pub fn new(config: &Config, store: Arc<S>, connectivity: Arc<C>) -> Result<Self> {
    let api = WalletApi::new(&config.server)?;
    let wallet = &config.wallet;

    let policy = RetryPolicy {
      max_attempts: wallet.max_attempts.max(1),
      base_delay: wallet.backoff_base()?,
      max_delay: wallet.backoff_max()?,
    };

    let cache = CacheManager::new(Arc::clone(&store)).with_default_ttl(wallet.cache_ttl()?);

    Ok(Self {
      inner: Arc::new(Inner {
        ledger: Ledger::new(Arc::clone(&store), wallet.seed_balance),
        store,
        cache,
        connectivity,
        api,
        policy,
        write_lock: Mutex::new(()),
      }),
    })
  }

  /// Provisional local balance.
  pub fn balance(&self) -> WalletResult<Decimal> {
    self.inner.ledger.balance()
  }

  pub fn transactions(&self) -> WalletResult<Vec<OfflineTransaction>> {
    self.inner.ledger.transactions()
  }

  pub fn pending_transactions(&self) -> WalletResult<Vec<OfflineTransaction>> {
    Ok(
      self
        .transactions()?
        .into_iter()
        .filter(|t| t.is_pending())
        .collect(),
    )
  }

  pub fn history(&self) -> Vec<DisplayTransaction> {
    self.inner.ledger.history()
  }

  /// Store the bearer credential used for sync.
  pub fn login(&self, token: &str) -> WalletResult<()> {
    self
      .inner
      .store
      .set(keys::TOKEN, token.trim())
      .map_err(WalletError::storage)
  }

  /// Forget the credential and the cached server snapshot.
  pub fn logout(&self) -> WalletResult<()> {
    self.inner.cache.remove(keys::BALANCE_SNAPSHOT);
    self
      .inner
      .store
      .remove(keys::TOKEN)
      .map_err(WalletError::storage)
  }

  fn token(&self) -> Option<String> {
    match self.inner.store.get(keys::TOKEN) {
      Ok(token) => token.filter(|t| !t.is_empty()),
      Err(e) => {
        tracing::warn!(error = %e, "failed to read credential");
        None
      }
    }
  }

  /// Debit the provisional balance and queue the transaction for sync.
  ///
  /// When online, a sync is started in the background once the debit is
  /// recorded; its result never affects this call.
  pub async fn record_debit(
    &self,
    kind: &str,
    amount: Decimal,
    description: &str,
  ) -> WalletResult<DebitReceipt> {
    let (transaction, new_balance) = {
      let _guard = self.inner.write_lock.lock().await;
      self.inner.ledger.debit(kind, amount, description)?
    };

    let sync_task = if self.inner.connectivity.is_online().await {
      let service = self.clone();
      Some(tokio::spawn(async move {
        match service.sync_pending().await {
          Ok(report) => tracing::debug!(?report, "background sync finished"),
          Err(e) => tracing::warn!(error = %e, "background sync failed"),
        }
      }))
    } else {
      None
    };

    Ok(DebitReceipt {
      success: true,
      new_balance,
      transaction,
      sync_task,
    })
  }

  /// Push due pending transactions to the server, oldest first.
  ///
  /// Each entry is preceded by a health probe; a failed probe aborts the rest
  /// of the batch. Status changes are persisted per entry. If anything synced,
  /// the local balance is replaced by the server's.
  pub async fn sync_pending(&self) -> WalletResult<SyncReport> {
    let _guard = self.inner.write_lock.lock().await;

    let Some(token) = self.token() else {
      tracing::debug!("no credential stored, skipping sync");
      return Ok(SyncReport::skipped(SkipReason::NoCredential));
    };
    if !self.inner.connectivity.is_online().await {
      tracing::debug!("offline, skipping sync");
      return Ok(SyncReport::skipped(SkipReason::Offline));
    }

    let ledger = &self.inner.ledger;
    let mut transactions = ledger.transactions()?;
    let now = Utc::now();
    let due: Vec<usize> = transactions
      .iter()
      .enumerate()
      .filter(|(_, t)| t.is_due(now))
      .map(|(i, _)| i)
      .collect();

    let mut report = SyncReport {
      outcome: SyncOutcome::Completed,
      synced: Vec::new(),
      dead_lettered: Vec::new(),
      still_pending: 0,
      reconciled_balance: None,
    };

    tracing::info!(due = due.len(), "starting sync");

    for index in due {
      if !self.inner.api.health(Some(&token)).await {
        tracing::warn!("server unreachable, aborting sync batch");
        report.outcome = SyncOutcome::Aborted;
        break;
      }

      let tx = &mut transactions[index];
      let request = SyncRequest::from(&*tx);

      match self.inner.api.submit_transaction(&token, &request).await {
        Ok(resp) => {
          tracing::debug!(id = tx.id, server_balance = ?resp.new_balance, "transaction synced");
          tx.mark_synced();
          report.synced.push(tx.id);
        }
        Err(WalletError::NetworkUnreachable(e)) => {
          // Not the server's answer, so it does not count as an attempt
          tracing::debug!(id = tx.id, error = %e, "submit did not reach server");
          continue;
        }
        Err(e) => {
          tracing::debug!(id = tx.id, error = %e, "submit rejected");
          if tx.record_rejection(e.to_string(), Utc::now(), &self.inner.policy) {
            tracing::warn!(id = tx.id, attempts = tx.attempts, "transaction marked failed");
            report.dead_lettered.push(tx.id);
          }
        }
      }

      ledger.commit_entry(&transactions, index)?;
    }

    report.still_pending = transactions.iter().filter(|t| t.is_pending()).count();

    if report.any_synced() {
      report.reconciled_balance = self.reconcile(&token).await;
    }

    tracing::info!(
      synced = report.synced.len(),
      failed = report.dead_lettered.len(),
      pending = report.still_pending,
      outcome = ?report.outcome,
      "sync finished"
    );
    Ok(report)
  }

  /// Replace the local balance with the server's. Failures are logged only.
  async fn reconcile(&self, token: &str) -> Option<Decimal> {
    match self.inner.api.fetch_balance(token).await {
      Ok(balance) => {
        if let Err(e) = self.inner.ledger.set_balance(balance) {
          tracing::warn!(error = %e, "failed to store reconciled balance");
          return None;
        }
        self.cache_snapshot(balance);
        tracing::info!(balance = %balance, "balance reconciled with server");
        Some(balance)
      }
      Err(e) => {
        tracing::warn!(error = %e, "failed to fetch authoritative balance");
        None
      }
    }
  }

  fn cache_snapshot(&self, balance: Decimal) {
    let snapshot = BalanceSnapshot {
      balance,
      fetched_at: Utc::now(),
    };
    self.inner.cache.put(keys::BALANCE_SNAPSHOT, &snapshot);
  }

  /// Balance with its provenance.
  ///
  /// While transactions are waiting for sync the server has not applied them
  /// yet, so the provisional local balance is returned untouched. Otherwise an
  /// unexpired server snapshot that still matches the local balance is served
  /// from cache, then the server is asked, and when it cannot be reached the
  /// local balance is returned.
  pub async fn refresh_balance(&self, force: bool) -> WalletResult<CacheResult<Decimal>> {
    let _guard = self.inner.write_lock.lock().await;
    let local = self.balance()?;

    let pending = self.pending_transactions()?.len();
    if pending > 0 {
      tracing::debug!(pending, "unsynced transactions, keeping provisional balance");
      return Ok(CacheResult::offline(local));
    }

    if !force {
      if let Some(snapshot) = self
        .inner
        .cache
        .get::<BalanceSnapshot>(keys::BALANCE_SNAPSHOT)
      {
        if snapshot.balance == local {
          return Ok(CacheResult::from_cache(local, snapshot.fetched_at));
        }
      }
    }

    let Some(token) = self.token() else {
      return Ok(CacheResult::offline(local));
    };
    if !self.inner.connectivity.is_online().await {
      return Ok(CacheResult::offline(local));
    }

    match self.reconcile(&token).await {
      Some(balance) => Ok(CacheResult::from_network(balance)),
      None => Ok(CacheResult::offline(self.balance()?)),
    }
  }

  /// Put every failed transaction back in the queue. Returns how many.
  pub async fn retry_failed(&self) -> WalletResult<usize> {
    let _guard = self.inner.write_lock.lock().await;
    let ledger = &self.inner.ledger;
    let mut transactions = ledger.transactions()?;
    let mut revived = 0;

    for index in 0..transactions.len() {
      if transactions[index].status == TxStatus::Failed {
        transactions[index].reset();
        ledger.commit_entry(&transactions, index)?;
        revived += 1;
      }
    }

    tracing::info!(revived, "requeued failed transactions");
    Ok(revived)
  }

  /// Availability report for display; no effect on the ledger.
  pub async fn check_server_status(&self) -> ServerStatus {
    if !self.inner.connectivity.is_online().await {
      return ServerStatus::Offline;
    }

    let token = self.token();
    if self.inner.api.health(token.as_deref()).await {
      ServerStatus::Available
    } else {
      ServerStatus::Degraded
    }
  }
}
