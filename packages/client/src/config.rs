//! Client configuration, populated from environment variables.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::CachedLoader;
use crate::connection::{Connection, ConnectionError, HttpConnection};
use crate::loader::RestLoader;
use crate::query::{Query, QueryBuilder, DEFAULT_PAGE_SIZE};

/// Runtime configuration for talking to one backend.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `PAGEWISE_BASE_URL` | `http://127.0.0.1:8080` | Base URL request paths are joined onto |
/// | `PAGEWISE_PAGE_SIZE` | `50` | Records requested per page |
/// | `PAGEWISE_MAX_RECORDS` | (absent = no cap) | Stop after dispatching this many records |
/// | `PAGEWISE_TIMEOUT_SECS` | `30` | Per-request HTTP timeout |
/// | `PAGEWISE_CACHE_SIZE` | `16` | Entries per cached on-demand loader |
///
/// Unparseable numeric values fall back to the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub page_size: u64,
    pub max_records: Option<u64>,
    pub timeout_secs: u64,
    pub cache_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ClientConfig {
    /// Populate config from environment variables, applying defaults where absent.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Populate config from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let number = |name: &str| var(name).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            base_url: var("PAGEWISE_BASE_URL").unwrap_or_else(|| "http://127.0.0.1:8080".into()),
            page_size: number("PAGEWISE_PAGE_SIZE")
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_PAGE_SIZE),
            max_records: number("PAGEWISE_MAX_RECORDS"),
            timeout_secs: number("PAGEWISE_TIMEOUT_SECS").unwrap_or(30),
            cache_size: number("PAGEWISE_CACHE_SIZE")
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(16),
        }
    }

    /// Build an [`HttpConnection`] with this config's base URL and timeout.
    pub fn http_connection(&self) -> Result<HttpConnection, ConnectionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        Ok(HttpConnection::new(client, self.base_url.clone()))
    }

    /// Start a query with this config's page size and record cap.
    pub fn query(&self, connection: Arc<dyn Connection>, path: impl Into<String>) -> QueryBuilder {
        Query::builder(connection, path)
            .page_size(self.page_size)
            .max_records(self.max_records)
    }

    /// Wrap `loader` in a cache of the configured size.
    pub fn cached(&self, loader: RestLoader) -> CachedLoader {
        CachedLoader::new(loader, self.cache_size)
    }
}
