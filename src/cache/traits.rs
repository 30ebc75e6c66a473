//! Core traits and types for cache bucket storage.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::http::{RequestKey, Response};

/// Storage-level identifier of an opened bucket.
pub type BucketId = i64;

/// An entry to be written into a bucket.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: RequestKey,
  pub response: Response,
}

/// An entry read back from a bucket.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub key: RequestKey,
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Operations are blocking; the async [`Caches`](super::Caches) facade moves
/// them off the runtime threads.
pub trait CacheStorage: Send + Sync + 'static {
  /// Open a bucket by name, creating it if absent.
  fn open_bucket(&self, name: &str) -> Result<BucketId>;

  fn has_bucket(&self, name: &str) -> Result<bool>;

  /// Delete a bucket and every entry in it. Returns false if it did not exist.
  fn delete_bucket(&self, name: &str) -> Result<bool>;

  /// Names of all buckets, in creation order.
  fn bucket_names(&self) -> Result<Vec<String>>;

  /// Write all entries, or none of them.
  fn put_all(&self, bucket: BucketId, entries: &[CacheEntry]) -> Result<()>;

  fn put(&self, bucket: BucketId, entry: &CacheEntry) -> Result<()> {
    self.put_all(bucket, std::slice::from_ref(entry))
  }

  fn match_entry(&self, bucket: BucketId, key: &RequestKey) -> Result<Option<CachedEntry>>;

  fn entries(&self, bucket: BucketId) -> Result<Vec<CachedEntry>>;

  fn delete_entry(&self, bucket: BucketId, key: &RequestKey) -> Result<bool>;
}
