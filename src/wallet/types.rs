//! Ledger entries, display entries and the retry policy.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Decimal places kept for wallet amounts.
pub const BALANCE_SCALE: u32 = 4;

/// Round to 4 decimal places and pin the scale, so 40 prints as "40.0000".
pub fn round4(value: Decimal) -> Decimal {
  let mut rounded =
    value.round_dp_with_strategy(BALANCE_SCALE, RoundingStrategy::MidpointAwayFromZero);
  rounded.rescale(BALANCE_SCALE);
  rounded
}

/// Sync state of an offline transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
  Pending,
  Synced,
  /// Gave up after too many rejections; only `retry_failed` revives it
  Failed,
}

impl TxStatus {
  /// Label shown to the user.
  pub fn label(&self) -> &'static str {
    match self {
      Self::Pending => "Pending synchronization",
      Self::Synced => "Completed",
      Self::Failed => "Failed",
    }
  }
}

/// A balance-changing operation recorded locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineTransaction {
  /// Creation time in epoch milliseconds, bumped to stay unique
  pub id: i64,
  #[serde(rename = "type")]
  pub kind: String,
  pub amount: Decimal,
  pub description: String,
  pub created_at: DateTime<Utc>,
  pub status: TxStatus,
  /// Mirror of `status == Synced`
  pub synced: bool,
  #[serde(default)]
  pub attempts: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub next_attempt_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_error: Option<String>,
}

impl OfflineTransaction {
  pub fn new(
    id: i64,
    kind: impl Into<String>,
    amount: Decimal,
    description: impl Into<String>,
    created_at: DateTime<Utc>,
  ) -> Self {
    Self {
      id,
      kind: kind.into(),
      amount,
      description: description.into(),
      created_at,
      status: TxStatus::Pending,
      synced: false,
      attempts: 0,
      next_attempt_at: None,
      last_error: None,
    }
  }

  pub fn is_pending(&self) -> bool {
    self.status == TxStatus::Pending
  }

  /// Pending and outside its backoff window.
  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    self.is_pending() && self.next_attempt_at.map_or(true, |at| at <= now)
  }

  pub fn mark_synced(&mut self) {
    self.status = TxStatus::Synced;
    self.synced = true;
    self.next_attempt_at = None;
    self.last_error = None;
  }

  /// Count a server rejection. Returns true if the entry is now dead-lettered.
  pub fn record_rejection(
    &mut self,
    error: impl Into<String>,
    now: DateTime<Utc>,
    policy: &RetryPolicy,
  ) -> bool {
    self.attempts += 1;
    self.last_error = Some(error.into());

    if self.attempts >= policy.max_attempts {
      self.status = TxStatus::Failed;
      self.next_attempt_at = None;
      true
    } else {
      self.next_attempt_at = Some(now + policy.delay_after(self.attempts));
      false
    }
  }

  /// Put a failed entry back in the queue with a clean slate.
  pub fn reset(&mut self) {
    self.status = TxStatus::Pending;
    self.synced = false;
    self.attempts = 0;
    self.next_attempt_at = None;
    self.last_error = None;
  }
}

/// Entry of the denormalized history list read by the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayTransaction {
  pub id: i64,
  #[serde(rename = "type")]
  pub kind: String,
  /// Signed: debits are negative
  pub amount: Decimal,
  pub description: String,
  pub date: DateTime<Utc>,
  pub status: String,
}

impl From<&OfflineTransaction> for DisplayTransaction {
  fn from(tx: &OfflineTransaction) -> Self {
    Self {
      id: tx.id,
      kind: tx.kind.clone(),
      amount: -tx.amount,
      description: tx.description.clone(),
      date: tx.created_at,
      status: tx.status.label().to_string(),
    }
  }
}

/// Bounded exponential backoff for rejected submissions.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      base_delay: Duration::seconds(30),
      max_delay: Duration::hours(1),
    }
  }
}

impl RetryPolicy {
  /// `base * 2^(attempts - 1)`, capped at `max_delay`.
  pub fn delay_after(&self, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(30);
    let factor = 1i32 << exponent;
    self
      .base_delay
      .checked_mul(factor)
      .map_or(self.max_delay, |d| d.min(self.max_delay))
  }
}
