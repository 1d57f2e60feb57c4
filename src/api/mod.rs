//! HTTP client for the wallet backend.

mod client;
mod types;

pub use client::WalletApi;
pub use types::SyncRequest;
