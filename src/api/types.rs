//! Serde types matching the wallet backend's request and response bodies.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::wallet::OfflineTransaction;

/// Body posted to both sync endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRequest {
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(with = "rust_decimal::serde::float")]
  pub amount: Decimal,
  pub description: String,
  pub date: DateTime<Utc>,
}

impl From<&OfflineTransaction> for SyncRequest {
  fn from(tx: &OfflineTransaction) -> Self {
    Self {
      kind: tx.kind.clone(),
      amount: tx.amount,
      description: tx.description.clone(),
      date: tx.created_at,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
  #[serde(default)]
  pub success: bool,
  #[serde(default)]
  pub new_balance: Option<Decimal>,
  #[serde(default)]
  pub message: Option<String>,
}

/// `balance` may arrive as a JSON number or a numeric string.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
  pub balance: Decimal,
}
