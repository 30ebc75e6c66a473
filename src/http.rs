//! Request and response value objects exchanged between the host, the cache
//! and the network.

use bytes::Bytes;
use color_eyre::Result;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::CacheError;

/// An outgoing resource request.
///
/// The body is single-use: once [`Request::take_body`] has been called the
/// request can no longer be duplicated. Callers that need to both inspect a
/// request and forward it must [`Request::duplicate`] it before the first
/// read. `Request` is intentionally not `Clone`.
#[derive(Debug)]
pub struct Request {
  method: Method,
  url: Url,
  headers: HeaderMap,
  body: Option<Bytes>,
  body_used: bool,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: HeaderMap::new(),
      body: None,
      body_used: false,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// Parse `url` and build a GET request for it.
  pub fn parse(url: &str) -> Result<Self> {
    let parsed = Url::parse(url).map_err(|source| CacheError::InvalidUrl {
      input: url.to_string(),
      source,
    })?;
    Ok(Self::get(parsed))
  }

  pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn headers(&self) -> &HeaderMap {
    &self.headers
  }

  pub fn body_used(&self) -> bool {
    self.body_used
  }

  /// Consume the body. Fails if it was already taken.
  pub fn take_body(&mut self) -> Result<Option<Bytes>> {
    if self.body_used {
      return Err(CacheError::BodyAlreadyUsed.into());
    }
    self.body_used = true;
    Ok(self.body.take())
  }

  /// Copy this request so it can be consumed independently.
  pub fn duplicate(&self) -> Result<Self> {
    if self.body_used {
      return Err(CacheError::BodyAlreadyUsed.into());
    }
    Ok(Self {
      method: self.method.clone(),
      url: self.url.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
      body_used: false,
    })
  }

  /// Identity of this request inside a cache bucket.
  pub fn key(&self) -> RequestKey {
    RequestKey::new(self.method.clone(), &self.url)
  }
}

/// Cache key for a request: method plus URL with the fragment removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: Method,
  pub url: Url,
}

impl RequestKey {
  pub fn new(method: Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self { method, url }
  }

  /// Stable, fixed-length hash used as the storage key.
  pub fn hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Rebuild a body-less request carrying this key.
  pub fn to_request(&self) -> Request {
    Request::new(self.method.clone(), self.url.clone())
  }
}

/// A response from the network or from a cache bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  pub url: Option<Url>,
  pub status: StatusCode,
  pub status_text: String,
  pub headers: HeaderMap,
  pub body: Bytes,
}

impl Response {
  pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
    Self {
      url: None,
      status,
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers: HeaderMap::new(),
      body: body.into(),
    }
  }

  pub fn with_url(mut self, url: Url) -> Self {
    self.url = Some(url);
    self
  }

  /// Replace the canonical reason phrase, e.g. with the one the origin sent.
  pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
    self.status_text = text.into();
    self
  }

  pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn with_headers(mut self, headers: HeaderMap) -> Self {
    self.headers = headers;
    self
  }

  /// True for 2xx statuses.
  pub fn is_ok(&self) -> bool {
    self.status.is_success()
  }
}

/// Flatten headers into name/value pairs for storage.
///
/// Values are kept as raw bytes: header values need not be UTF-8.
pub(crate) fn header_pairs(headers: &HeaderMap) -> Vec<(String, Vec<u8>)> {
  headers
    .iter()
    .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
    .collect()
}

pub(crate) fn headers_from_pairs(pairs: Vec<(String, Vec<u8>)>) -> Result<HeaderMap> {
  let mut headers = HeaderMap::with_capacity(pairs.len());
  for (name, value) in pairs {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| CacheError::CorruptEntry(format!("header name '{}': {}", name, e)))?;
    let value = HeaderValue::from_bytes(&value)
      .map_err(|e| CacheError::CorruptEntry(format!("header value for '{}': {}", name, e)))?;
    headers.append(name, value);
  }
  Ok(headers)
}
