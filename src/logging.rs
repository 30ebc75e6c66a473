//! Tracing setup for hosts embedding the agent.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "PRECACHE_LOG";

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
  /// Filter directives; falls back to `PRECACHE_LOG`, then `info`
  pub filter: Option<String>,
  /// Write daily-rotated files here instead of stderr
  pub directory: Option<PathBuf>,
}

/// Install a global subscriber.
///
/// The returned guard must be held for as long as file logging should keep
/// flushing.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter = build_filter(config)?;

  match &config.directory {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "precache.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::registry()
        .with(filter)
        .with(
          tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false),
        )
        .try_init()
        .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;
      Ok(None)
    }
  }
}

fn build_filter(config: &LogConfig) -> Result<EnvFilter> {
  match &config.filter {
    Some(directives) => EnvFilter::try_new(directives)
      .map_err(|e| eyre!("Invalid log filter '{}': {}", directives, e)),
    None => Ok(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_explicit_filter() {
    let config = LogConfig {
      filter: Some("precache=debug".to_string()),
      directory: None,
    };
    assert!(build_filter(&config).is_ok());
  }

  #[test]
  fn test_invalid_filter_rejected() {
    let config = LogConfig {
      filter: Some("precache=notalevel".to_string()),
      directory: None,
    };
    assert!(build_filter(&config).is_err());
  }
}
