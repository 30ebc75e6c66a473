//! A cache-first request interception agent.
//!
//! On install the agent pre-populates a named cache bucket with a fixed
//! manifest of resources. Every intercepted fetch is answered from that bucket
//! when an entry matches, and forwarded to the network otherwise.

pub mod agent;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod http;
pub mod logging;
pub mod net;

#[cfg(test)]
mod testing;

pub use agent::CacheAgent;
pub use cache::{Cache, Caches, SqliteStorage};
pub use config::AgentConfig;
pub use error::CacheError;
pub use event::{AgentState, Dispatcher, FetchEvent, InstallEvent, SignalType};
pub use http::{Request, Response};
pub use net::{Fetch, HttpFetcher};
