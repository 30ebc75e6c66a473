use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::CacheError;
use crate::http::Request;

/// Bucket name of the reference deployment. Bump the suffix together with the
/// manifest to address a fresh bucket.
pub const DEFAULT_CACHE_NAME: &str = "askia-todo-v1";

/// Resources pre-cached by the reference deployment.
pub const DEFAULT_MANIFEST: &[&str] = &["/askia-todo/", "/askia-todo/style.css"];

const DEFAULT_ORIGIN: &str = "http://localhost/";

/// Immutable configuration handed to the agent at construction time.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
  /// Name of the cache bucket, versioned by suffix (e.g. "app-cache-v1")
  pub cache_name: String,
  /// Root-relative paths fetched and stored on install, in order
  pub manifest: Vec<String>,
  /// Origin the manifest paths are resolved against
  pub origin: Url,
  /// Path prefix of requests routed through the agent (all requests if unset)
  #[serde(default)]
  pub scope: Option<String>,
  /// SQLite file backing the cache storage (platform data dir if unset)
  #[serde(default)]
  pub storage_path: Option<PathBuf>,
}

impl AgentConfig {
  pub fn new<I, P>(cache_name: impl Into<String>, manifest: I, origin: Url) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<String>,
  {
    Self {
      cache_name: cache_name.into(),
      manifest: manifest.into_iter().map(Into::into).collect(),
      origin,
      scope: None,
      storage_path: None,
    }
  }

  /// Configuration of the reference deployment.
  pub fn reference() -> Result<Self> {
    let origin = Url::parse(DEFAULT_ORIGIN).map_err(|source| CacheError::InvalidUrl {
      input: DEFAULT_ORIGIN.to_string(),
      source,
    })?;
    Ok(Self::new(DEFAULT_CACHE_NAME, DEFAULT_MANIFEST.iter().copied(), origin))
  }

  pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
    self.scope = Some(scope.into());
    self
  }

  pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.storage_path = Some(path.into());
    self
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./precache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/precache/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found. `PRECACHE_ORIGIN`
  /// overrides the origin in every case.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::reference()?,
    };

    let config = config.apply_env()?;
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("precache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("precache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: AgentConfig = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  fn apply_env(self) -> Result<Self> {
    match std::env::var("PRECACHE_ORIGIN") {
      Ok(origin) => Ok(Self {
        origin: parse_url(&origin)?,
        ..self
      }),
      Err(_) => Ok(self),
    }
  }

  /// Check the bucket name and that every manifest entry resolves.
  pub fn validate(&self) -> Result<()> {
    if self.cache_name.trim().is_empty() {
      return Err(CacheError::EmptyName.into());
    }
    for path in &self.manifest {
      self.resolve(path)?;
    }
    Ok(())
  }

  /// Resolve a root-relative path against the configured origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|source| {
        CacheError::InvalidUrl {
          input: path.to_string(),
          source,
        }
        .into()
      })
  }

  /// One GET request per manifest entry, in manifest order.
  pub fn manifest_requests(&self) -> Result<Vec<Request>> {
    self
      .manifest
      .iter()
      .map(|path| self.resolve(path).map(Request::get))
      .collect()
  }

  /// Whether a request URL falls inside the configured scope.
  pub fn in_scope(&self, url: &Url) -> bool {
    match &self.scope {
      None => true,
      Some(scope) => match self.resolve(scope) {
        Ok(scope) => url.origin() == scope.origin() && url.path().starts_with(scope.path()),
        Err(_) => false,
      },
    }
  }
}

fn parse_url(input: &str) -> Result<Url> {
  Url::parse(input).map_err(|source| {
    CacheError::InvalidUrl {
      input: input.to_string(),
      source,
    }
    .into()
  })
}
