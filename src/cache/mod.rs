//! Named cache buckets holding request/response pairs.
//!
//! This module provides:
//! - A blocking `CacheStorage` backend trait and its SQLite implementation
//! - Async `Caches` / `Cache` handles mirroring the host cache API
//! - All-or-nothing population of a bucket via `Cache::add_all`

mod layer;
mod storage;
mod traits;

pub use layer::{Cache, Caches};
pub use storage::SqliteStorage;
pub use traits::{BucketId, CacheEntry, CacheStorage, CachedEntry};
