//! Durable local key-value storage.
//!
//! Every piece of wallet state (balance, ledger, display history, auth token,
//! cached snapshots) lives under a string key in one of these backends. The
//! rest of the crate only sees the [`KeyValueStore`] trait, so tests can run
//! against an in-memory store while the CLI uses [`SqliteStore`].

#[cfg(test)]
mod memory;
mod sqlite;
mod traits;

#[cfg(test)]
pub use memory::MemoryStore;
pub use sqlite::{data_dir, SqliteStore};
pub use traits::{keys, KeyValueStore};
