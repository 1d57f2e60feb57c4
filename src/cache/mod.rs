//! Time-boxed cache of JSON values on top of the local store.
//!
//! Entries carry their own expiry and are evicted lazily: an expired entry is
//! deleted the first time it is read. There is no background sweep, so stale
//! entries stay on disk until read or overwritten.

mod manager;
mod traits;

pub use manager::CacheManager;
pub use traits::{CacheResult, CacheSource};
