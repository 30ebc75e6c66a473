//! Integration tests for the agent against a live HTTP origin.
//!
//! Uses wiremock for the origin and tempfile for on-disk cache storage.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use precache::{AgentConfig, AgentState, CacheAgent, CacheError, Fetch, HttpFetcher, Request};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use url::Url;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer, dir: &tempfile::TempDir) -> AgentConfig {
  AgentConfig::new(
    "app-cache-v1",
    ["/app/", "/app/style.css"],
    Url::parse(&server.uri()).unwrap(),
  )
  .with_storage_path(dir.path().join("cache.db"))
}

async fn mount_manifest(server: &MockServer, expected_hits: u64) {
  Mock::given(method("GET"))
    .and(path("/app/"))
    .respond_with(
      ResponseTemplate::new(200)
        .set_body_string("<html>todo</html>")
        .insert_header("content-type", "text/html"),
    )
    .expect(expected_hits)
    .mount(server)
    .await;

  Mock::given(method("GET"))
    .and(path("/app/style.css"))
    .respond_with(
      ResponseTemplate::new(200)
        .set_body_string("body { margin: 0 }")
        .insert_header("content-type", "text/css"),
    )
    .expect(expected_hits)
    .mount(server)
    .await;
}

fn request(server: &MockServer, p: &str) -> Request {
  Request::parse(&format!("{}{}", server.uri(), p)).unwrap()
}

#[tokio::test]
async fn test_install_then_serve_from_cache() {
  let server = MockServer::start().await;
  let dir = tempfile::tempdir().unwrap();
  // Each manifest resource is fetched exactly once, during install
  mount_manifest(&server, 1).await;

  let agent = Arc::new(CacheAgent::open(config(&server, &dir)).unwrap());
  let dispatcher = agent.dispatcher().unwrap();
  dispatcher.dispatch_install().await.unwrap();
  assert_eq!(dispatcher.state().unwrap(), AgentState::Installed);

  for _ in 0..3 {
    let response = dispatcher
      .dispatch_fetch(request(&server, "/app/"))
      .await
      .unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, "<html>todo</html>");
    assert_eq!(response.headers[CONTENT_TYPE], "text/html");
  }

  let css = dispatcher
    .dispatch_fetch(request(&server, "/app/style.css"))
    .await
    .unwrap();
  assert_eq!(css.body, "body { margin: 0 }");
}

#[tokio::test]
async fn test_miss_goes_to_network_and_is_not_stored() {
  let server = MockServer::start().await;
  let dir = tempfile::tempdir().unwrap();
  mount_manifest(&server, 1).await;

  Mock::given(method("GET"))
    .and(path("/app/missing.js"))
    .respond_with(ResponseTemplate::new(200).set_body_string("console.log('live')"))
    .expect(2)
    .mount(&server)
    .await;

  let agent = Arc::new(CacheAgent::open(config(&server, &dir)).unwrap());
  let dispatcher = agent.dispatcher().unwrap();
  dispatcher.dispatch_install().await.unwrap();

  for _ in 0..2 {
    let response = dispatcher
      .dispatch_fetch(request(&server, "/app/missing.js"))
      .await
      .unwrap();
    assert_eq!(response.body, "console.log('live')");
  }

  let cache = agent.caches().open("app-cache-v1").await.unwrap();
  assert_eq!(cache.keys().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_install_fails_on_404() {
  let server = MockServer::start().await;
  let dir = tempfile::tempdir().unwrap();

  Mock::given(method("GET"))
    .and(path("/app/"))
    .respond_with(ResponseTemplate::new(200).set_body_string("<html>todo</html>"))
    .mount(&server)
    .await;

  Mock::given(method("GET"))
    .and(path("/app/style.css"))
    .respond_with(ResponseTemplate::new(404))
    .mount(&server)
    .await;

  let agent = Arc::new(CacheAgent::open(config(&server, &dir)).unwrap());
  let dispatcher = agent.dispatcher().unwrap();

  let err = dispatcher.dispatch_install().await.unwrap_err();
  assert!(matches!(
    err.downcast_ref::<CacheError>(),
    Some(CacheError::BadStatus { status, .. }) if *status == StatusCode::NOT_FOUND
  ));
  assert_eq!(dispatcher.state().unwrap(), AgentState::Redundant);

  let cache = agent.caches().open("app-cache-v1").await.unwrap();
  assert!(cache.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cache_survives_restart() {
  let server = MockServer::start().await;
  let dir = tempfile::tempdir().unwrap();
  mount_manifest(&server, 1).await;

  {
    let agent = Arc::new(CacheAgent::open(config(&server, &dir)).unwrap());
    agent.dispatcher().unwrap().dispatch_install().await.unwrap();
  }

  let agent = CacheAgent::open(config(&server, &dir)).unwrap();
  let cache = agent.caches().open("app-cache-v1").await.unwrap();
  let response = cache
    .match_request(&request(&server, "/app/style.css"))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(response.body, "body { margin: 0 }");
}

#[tokio::test]
async fn test_http_fetcher_forwards_request_unchanged() {
  let server = MockServer::start().await;

  Mock::given(method("POST"))
    .and(path("/app/api"))
    .and(header("x-client", "todo"))
    .and(body_string("{\"done\":true}"))
    .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
    .expect(1)
    .mount(&server)
    .await;

  let fetcher = HttpFetcher::new().unwrap();
  let request = Request::new(
    Method::POST,
    Url::parse(&format!("{}/app/api", server.uri())).unwrap(),
  )
  .with_header(
    "x-client".parse().unwrap(),
    HeaderValue::from_static("todo"),
  )
  .with_body("{\"done\":true}");

  let response = fetcher.fetch(request).await.unwrap();
  assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
  assert_eq!(response.status_text, "Service Unavailable");
  assert_eq!(response.body, "busy");
}

#[tokio::test]
async fn test_miss_forwards_method_headers_and_body() {
  let server = MockServer::start().await;
  let dir = tempfile::tempdir().unwrap();
  mount_manifest(&server, 1).await;

  Mock::given(method("POST"))
    .and(path("/app/api"))
    .and(header("x-client", "todo"))
    .and(body_string("{\"done\":true}"))
    .respond_with(ResponseTemplate::new(201).set_body_string("saved"))
    .expect(1)
    .mount(&server)
    .await;

  let agent = Arc::new(CacheAgent::open(config(&server, &dir)).unwrap());
  let dispatcher = agent.dispatcher().unwrap();
  dispatcher.dispatch_install().await.unwrap();

  let request = Request::new(Method::POST, request(&server, "/app/api").url().clone())
    .with_header(
      "x-client".parse().unwrap(),
      HeaderValue::from_static("todo"),
    )
    .with_body("{\"done\":true}");
  let response = dispatcher.dispatch_fetch(request).await.unwrap();
  assert_eq!(response.status, StatusCode::CREATED);
  assert_eq!(response.body, "saved");
}

/// Answer a single connection with a raw HTTP/1.1 response.
async fn serve_raw_once(raw: &'static str) -> String {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
      let n = socket.read(&mut chunk).await.unwrap();
      if n == 0 {
        break;
      }
      buf.extend_from_slice(&chunk[..n]);
    }
    socket.write_all(raw.as_bytes()).await.unwrap();
    socket.shutdown().await.unwrap();
  });
  format!("http://{}/app/", addr)
}

#[tokio::test]
async fn test_http_fetcher_keeps_origin_reason_phrase() {
  let uri = serve_raw_once(
    "HTTP/1.1 200 Fine Thanks\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
  )
  .await;

  let fetcher = HttpFetcher::new().unwrap();
  let response = fetcher.fetch(Request::parse(&uri).unwrap()).await.unwrap();
  assert_eq!(response.status, StatusCode::OK);
  assert_eq!(response.status_text, "Fine Thanks");
  assert_eq!(response.body, "ok");
}

#[tokio::test]
async fn test_http_fetcher_transport_error() {
  let fetcher = HttpFetcher::new().unwrap();
  // Port 9 (discard) is not expected to accept HTTP connections
  let err = fetcher
    .fetch(Request::parse("http://127.0.0.1:9/app/").unwrap())
    .await
    .unwrap_err();
  assert!(matches!(
    err.downcast_ref::<CacheError>(),
    Some(CacheError::Network { .. })
  ));
}
