//! Async handles over cache storage: the host's `caches` object and the
//! individual buckets it opens.

use color_eyre::Result;
use futures::future::try_join_all;
use reqwest::Method;
use std::sync::Arc;
use tracing::debug;

use super::traits::{BucketId, CacheEntry, CacheStorage};
use crate::error::CacheError;
use crate::http::{Request, Response};
use crate::net::Fetch;

/// Run a blocking storage call off the async runtime threads.
async fn run_blocking<S, T, F>(storage: &Arc<S>, f: F) -> Result<T>
where
  S: CacheStorage,
  T: Send + 'static,
  F: FnOnce(&S) -> Result<T> + Send + 'static,
{
  let storage = Arc::clone(storage);
  tokio::task::spawn_blocking(move || f(storage.as_ref()))
    .await
    .map_err(CacheError::from)?
}

/// Entry point to named cache buckets.
pub struct Caches<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> Caches<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Open a bucket, creating it if absent.
  pub async fn open(&self, name: &str) -> Result<Cache<S>> {
    let owned = name.to_string();
    let id = run_blocking(&self.storage, move |s| s.open_bucket(&owned)).await?;
    Ok(Cache {
      storage: Arc::clone(&self.storage),
      id,
      name: name.to_string(),
    })
  }

  pub async fn has(&self, name: &str) -> Result<bool> {
    let name = name.to_string();
    run_blocking(&self.storage, move |s| s.has_bucket(&name)).await
  }

  pub async fn delete(&self, name: &str) -> Result<bool> {
    let name = name.to_string();
    run_blocking(&self.storage, move |s| s.delete_bucket(&name)).await
  }

  /// Names of every bucket.
  pub async fn keys(&self) -> Result<Vec<String>> {
    run_blocking(&self.storage, |s| s.bucket_names()).await
  }
}

impl<S: CacheStorage> Clone for Caches<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}

/// An opened cache bucket.
pub struct Cache<S: CacheStorage> {
  storage: Arc<S>,
  id: BucketId,
  name: String,
}

impl<S: CacheStorage> Cache<S> {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Look up the stored response for `request`. Never reads the body.
  pub async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
    let key = request.key();
    let id = self.id;
    let entry = run_blocking(&self.storage, move |s| s.match_entry(id, &key)).await?;
    Ok(entry.map(|e| e.response))
  }

  /// Store `response` under `request`, replacing any previous entry.
  pub async fn put(&self, request: &Request, response: Response) -> Result<()> {
    let entry = CacheEntry {
      key: cacheable_key(request)?,
      response,
    };
    let id = self.id;
    run_blocking(&self.storage, move |s| s.put(id, &entry)).await
  }

  /// Fetch `request` and store the response if it is ok.
  pub async fn add<F: Fetch + ?Sized>(&self, fetcher: &F, request: Request) -> Result<()> {
    self.add_all(fetcher, vec![request]).await
  }

  /// Fetch every request concurrently and store all responses in one write.
  ///
  /// Nothing is written unless every fetch succeeded with a 2xx status.
  pub async fn add_all<F: Fetch + ?Sized>(&self, fetcher: &F, requests: Vec<Request>) -> Result<()> {
    let keys = requests
      .iter()
      .map(cacheable_key)
      .collect::<Result<Vec<_>>>()?;

    let responses = try_join_all(requests.into_iter().map(|r| fetch_ok(fetcher, r))).await?;

    let entries: Vec<CacheEntry> = keys
      .into_iter()
      .zip(responses)
      .map(|(key, response)| CacheEntry { key, response })
      .collect();

    debug!(cache = %self.name, count = entries.len(), "storing fetched entries");

    let id = self.id;
    run_blocking(&self.storage, move |s| s.put_all(id, &entries)).await
  }

  /// Requests for every stored entry.
  pub async fn keys(&self) -> Result<Vec<Request>> {
    let id = self.id;
    let entries = run_blocking(&self.storage, move |s| s.entries(id)).await?;
    Ok(entries.iter().map(|e| e.key.to_request()).collect())
  }

  pub async fn delete(&self, request: &Request) -> Result<bool> {
    let key = request.key();
    let id = self.id;
    run_blocking(&self.storage, move |s| s.delete_entry(id, &key)).await
  }
}

/// Fetch a request, treating non-2xx statuses as failures.
async fn fetch_ok<F: Fetch + ?Sized>(fetcher: &F, request: Request) -> Result<Response> {
  let url = request.url().to_string();
  let response = fetcher.fetch(request).await?;
  if !response.is_ok() {
    return Err(
      CacheError::BadStatus {
        url,
        status: response.status,
      }
      .into(),
    );
  }
  Ok(response)
}

fn cacheable_key(request: &Request) -> Result<crate::http::RequestKey> {
  if request.method() != Method::GET {
    return Err(CacheError::MethodNotCacheable(request.method().to_string()).into());
  }
  Ok(request.key())
}
