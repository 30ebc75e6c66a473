//! The network collaborator the agent falls back to on a cache miss.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use hyper::ext::ReasonPhrase;

use crate::error::CacheError;
use crate::http::{Request, Response};

/// Something that can perform a live fetch.
///
/// Implementations return whatever the origin answers, including 4xx and 5xx
/// responses and the origin's reason phrase. Only transport failures are
/// errors.
#[async_trait]
pub trait Fetch: Send + Sync {
  async fn fetch(&self, request: Request) -> Result<Response>;
}

/// `reqwest`-backed network access.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client })
  }

  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl Fetch for HttpFetcher {
  async fn fetch(&self, mut request: Request) -> Result<Response> {
    let body = request.take_body()?;
    let url = request.url().clone();

    let mut builder = self
      .client
      .request(request.method().clone(), url.clone())
      .headers(request.headers().clone());
    if let Some(body) = body {
      builder = builder.body(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| CacheError::network(url.as_str(), e))?;

    let status = response.status();
    let headers = response.headers().clone();
    let final_url = response.url().clone();
    // hyper only records the phrase when it differs from the canonical one
    let reason = response
      .extensions()
      .get::<ReasonPhrase>()
      .map(|r| String::from_utf8_lossy(r.as_bytes()).into_owned());
    let body = response
      .bytes()
      .await
      .map_err(|e| CacheError::network(url.as_str(), e))?;

    tracing::trace!(url = %url, status = %status, "network fetch complete");

    let mut out = Response::new(status, body).with_headers(headers).with_url(final_url);
    if let Some(reason) = reason {
      out = out.with_status_text(reason);
    }
    Ok(out)
  }
}
