//! Offline-first wallet: provisional balance, transaction ledger and the
//! synchronizer that reconciles both with the backend.

mod ledger;
mod service;
mod types;

pub use service::{OfflineService, SyncOutcome};
pub use types::{round4, OfflineTransaction};
