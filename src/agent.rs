//! The cache interception agent.
//!
//! On install the agent opens its bucket and stores every manifest resource.
//! On fetch it answers from the bucket when it can and otherwise forwards a
//! duplicate of the request to the network. The bucket is never written
//! during fetch handling.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheStorage, Caches, SqliteStorage};
use crate::config::AgentConfig;
use crate::event::{Dispatcher, FetchEvent, InstallEvent};
use crate::net::{Fetch, HttpFetcher};

pub struct CacheAgent<S: CacheStorage> {
  config: Arc<AgentConfig>,
  caches: Caches<S>,
  network: Arc<dyn Fetch>,
}

impl CacheAgent<SqliteStorage> {
  /// Build an agent backed by on-disk SQLite storage and live HTTP.
  pub fn open(config: AgentConfig) -> Result<Self> {
    config.validate()?;
    let storage = match &config.storage_path {
      Some(path) => SqliteStorage::open(path)?,
      None => SqliteStorage::open_default()?,
    };
    Ok(Self::new(
      config,
      Caches::new(storage),
      Arc::new(HttpFetcher::new()?),
    ))
  }
}

impl<S: CacheStorage> CacheAgent<S> {
  pub fn new(config: AgentConfig, caches: Caches<S>, network: Arc<dyn Fetch>) -> Self {
    Self {
      config: Arc::new(config),
      caches,
      network,
    }
  }

  pub fn config(&self) -> &AgentConfig {
    &self.config
  }

  pub fn caches(&self) -> &Caches<S> {
    &self.caches
  }

  pub fn network(&self) -> Arc<dyn Fetch> {
    Arc::clone(&self.network)
  }

  /// Pre-populate the bucket with the manifest, holding the signal open until
  /// every resource is stored.
  pub fn handle_install(&self, event: &mut InstallEvent) -> Result<()> {
    let config = Arc::clone(&self.config);
    let caches = self.caches.clone();
    let network = Arc::clone(&self.network);

    event.wait_until(async move {
      let requests = config.manifest_requests()?;
      info!(cache = %config.cache_name, resources = requests.len(), "pre-caching manifest");

      let cache = caches.open(&config.cache_name).await?;
      cache.add_all(network.as_ref(), requests).await?;

      info!(cache = %config.cache_name, "manifest cached");
      Ok(())
    });
    Ok(())
  }

  /// Answer the request from the bucket, or from the network on a miss.
  pub fn handle_fetch(&self, event: &mut FetchEvent) -> Result<()> {
    let request = Arc::clone(event.request());
    let cache_name = self.config.cache_name.clone();
    let caches = self.caches.clone();
    let network = Arc::clone(&self.network);

    event.respond_with(async move {
      let cache = caches.open(&cache_name).await?;
      if let Some(response) = cache.match_request(&request).await? {
        debug!(url = %request.url(), "cache hit");
        return Ok(response);
      }

      debug!(url = %request.url(), "cache miss");
      network.fetch(request.duplicate()?).await
    })
  }

  /// Bind the install and fetch handlers on `dispatcher`.
  pub fn register(self: &Arc<Self>, dispatcher: &Dispatcher) -> Result<()> {
    let agent = Arc::clone(self);
    dispatcher.on(move |event: &mut InstallEvent| agent.handle_install(event))?;

    let agent = Arc::clone(self);
    dispatcher.on(move |event: &mut FetchEvent| agent.handle_fetch(event))?;
    Ok(())
  }

  /// A dispatcher scoped by this agent's configuration, with the agent's
  /// handlers already registered.
  pub fn dispatcher(self: &Arc<Self>) -> Result<Dispatcher> {
    let config = Arc::clone(&self.config);
    let dispatcher = Dispatcher::with_scope(self.network(), move |url| config.in_scope(url));
    self.register(&dispatcher)?;
    Ok(dispatcher)
  }
}
