//! Test doubles shared by unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use color_eyre::Result;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use url::Url;

use crate::error::CacheError;
use crate::http::{Request, Response};
use crate::net::Fetch;

pub const ORIGIN: &str = "https://example.com/";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// A request as it reached the network.
#[derive(Clone, Debug)]
pub struct Seen {
  pub method: Method,
  pub path: String,
  pub headers: HeaderMap,
  pub body: Option<Bytes>,
}

/// Serves canned responses by path and records every request it sees.
///
/// Unknown paths answer 404; paths registered with `fail` produce a transport
/// error.
#[derive(Clone, Default)]
pub struct FakeNetwork {
  routes: Arc<Mutex<HashMap<String, Response>>>,
  broken: Arc<Mutex<Vec<String>>>,
  seen: Arc<Mutex<Vec<Seen>>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn serve(self, path: &str, body: &'static str) -> Self {
    self.respond(path, Response::new(StatusCode::OK, body))
  }

  pub fn respond(self, path: &str, response: Response) -> Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(path.to_string(), response.with_url(url(path)));
    self
  }

  pub fn fail(self, path: &str) -> Self {
    self.broken.lock().unwrap().push(path.to_string());
    self
  }

  /// Paths fetched so far, in order.
  pub fn calls(&self) -> Vec<String> {
    self.seen().into_iter().map(|s| s.path).collect()
  }

  /// Full requests fetched so far, in order.
  pub fn seen(&self) -> Vec<Seen> {
    self.seen.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.seen.lock().unwrap().len()
  }

  pub fn reset_calls(&self) {
    self.seen.lock().unwrap().clear();
  }
}

#[async_trait]
impl Fetch for FakeNetwork {
  async fn fetch(&self, mut request: Request) -> Result<Response> {
    let body = request.take_body()?;
    let path = request.url().path().to_string();
    self.seen.lock().unwrap().push(Seen {
      method: request.method().clone(),
      path: path.clone(),
      headers: request.headers().clone(),
      body,
    });

    if self.broken.lock().unwrap().contains(&path) {
      return Err(CacheError::network(request.url().as_str(), "connection refused").into());
    }

    let response = self.routes.lock().unwrap().get(&path).cloned();
    Ok(response.unwrap_or_else(|| Response::new(StatusCode::NOT_FOUND, "not found")))
  }
}
