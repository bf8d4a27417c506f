//! The backend connection contract and its HTTP implementation.
//!
//! The rest of the crate only needs one operation from a backend:
//! `GET path?params` returning a decoded JSON body. Authentication, proxying
//! and transport-level retries belong to whoever builds the
//! [`reqwest::Client`] handed to [`HttpConnection`].

use async_trait::async_trait;
use pagewise::LoadFailure;
use reqwest::Client;
use tracing::debug;

/// Ordered query-string parameters. Repeated keys are allowed.
pub type QueryParams = Vec<(String, String)>;

// ---------------------------------------------------------------------------
// ConnectionError
// ---------------------------------------------------------------------------

/// Errors a [`Connection`] can return.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    /// The request could not be sent or no response was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend returned a non-2xx HTTP status code.
    #[error("backend returned status {0}")]
    Status(u16),

    /// The body was not valid JSON.
    #[error("could not decode response body: {0}")]
    Decode(String),
}

impl From<ConnectionError> for LoadFailure {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::Transport(msg) => LoadFailure::Transport(msg),
            ConnectionError::Status(code) => LoadFailure::Status(code),
            ConnectionError::Decode(msg) => LoadFailure::Decode(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection trait
// ---------------------------------------------------------------------------

/// A handle on one backend.
///
/// Implementations must tolerate concurrent use: loaders on different records
/// may call [`Connection::get`] at the same time.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Issue `GET {path}` with `params` and return the decoded JSON body.
    async fn get(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<serde_json::Value, ConnectionError>;
}

// ---------------------------------------------------------------------------
// HttpConnection
// ---------------------------------------------------------------------------

/// [`Connection`] over HTTP using a shared [`reqwest::Client`].
///
/// Paths are joined onto `base_url` with exactly one `/` between them.
#[derive(Debug, Clone)]
pub struct HttpConnection {
    client: Client,
    base_url: String,
}

impl HttpConnection {
    /// Create a connection.
    ///
    /// # Arguments
    ///
    /// * `client`: pre-configured `reqwest::Client` (timeouts, default
    ///   headers, proxy).
    /// * `base_url`: e.g. `"https://ssc.example.com/ssc"`.
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn get(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<serde_json::Value, ConnectionError> {
        let url = self.url(path);
        debug!(%url, params = params.len(), "GET");

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectionError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| ConnectionError::Decode(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
