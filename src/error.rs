//! Error taxonomy for wallet operations.

use rust_decimal::Decimal;
use thiserror::Error;

/// Failures surfaced by the ledger and the synchronizer.
///
/// None of these are fatal to the process: each one leaves local state as it
/// was so the operation can be retried later.
#[derive(Debug, Error)]
pub enum WalletError {
  /// Debit larger than the cached balance.
  #[error("insufficient balance: requested {requested}, available {available}")]
  InsufficientBalance {
    requested: Decimal,
    available: Decimal,
  },

  #[error("invalid amount {0}: must be non-negative with at most 4 decimal places")]
  InvalidAmount(Decimal),

  /// Local storage read/write fault.
  #[error("storage failure: {0}")]
  Storage(String),

  #[error("serialization failure: {0}")]
  Serialization(#[from] serde_json::Error),

  /// Server could not be reached (probe failed, connect error, timeout).
  #[error("network unreachable: {0}")]
  NetworkUnreachable(String),

  /// Endpoint answered 404; the caller may try the legacy route.
  #[error("endpoint not found: {0}")]
  EndpointNotFound(String),

  /// Server answered but refused the request.
  #[error("rejected by server: {0}")]
  RemoteRejected(String),
}

impl WalletError {
  pub fn storage(report: color_eyre::Report) -> Self {
    Self::Storage(format!("{:#}", report))
  }
}

impl From<reqwest::Error> for WalletError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() || e.is_connect() || e.is_request() {
      Self::NetworkUnreachable(e.to_string())
    } else {
      Self::RemoteRejected(e.to_string())
    }
  }
}

pub type WalletResult<T> = std::result::Result<T, WalletError>;
