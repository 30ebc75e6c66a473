//! Error taxonomy for cache, network and signal failures.
//!
//! Functions in this crate return `color_eyre::Result`; the variants below are
//! raised into the report so callers can recover them with
//! `report.downcast_ref::<CacheError>()`.

use reqwest::StatusCode;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  #[error("Request for {url} returned status {status}")]
  BadStatus { url: String, status: StatusCode },

  #[error("Network request to {url} failed")]
  Network {
    url: String,
    #[source]
    source: BoxError,
  },

  #[error("Failed to {action}")]
  Storage {
    action: &'static str,
    #[source]
    source: rusqlite::Error,
  },

  #[error("Cache storage lock poisoned")]
  LockPoisoned,

  #[error("Request body has already been consumed")]
  BodyAlreadyUsed,

  #[error("Only GET requests can be cached, got {0}")]
  MethodNotCacheable(String),

  #[error("Cache name cannot be empty")]
  EmptyName,

  #[error("respond_with was already called for this fetch signal")]
  AlreadyResponded,

  #[error("Agent failed to install and is redundant")]
  Redundant,

  #[error("Agent install is already in progress")]
  InstallInProgress,

  #[error("Host signal channel closed")]
  HostClosed,

  #[error("Invalid URL '{input}'")]
  InvalidUrl {
    input: String,
    #[source]
    source: url::ParseError,
  },

  #[error("Stored cache entry is corrupt: {0}")]
  CorruptEntry(String),

  #[error(transparent)]
  Join(#[from] tokio::task::JoinError),
}

impl CacheError {
  pub fn network(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
    Self::Network {
      url: url.into(),
      source: source.into(),
    }
  }

  /// Build a closure mapping a SQLite error into a `Storage` report.
  pub(crate) fn storage(action: &'static str) -> impl Fn(rusqlite::Error) -> color_eyre::Report {
    move |source| Self::Storage { action, source }.into()
  }
}
