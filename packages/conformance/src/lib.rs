//! Shared helpers for the pagewise conformance test suite.
//!
//! Provides [`spawn_backend`], a function that binds a `TcpListener` on an
//! ephemeral port and serves an in-process issue-tracker backend with axum.
//! The backend speaks the paging dialects the client ships pagers for and
//! records every request it receives, so tests can assert on request counts
//! and parameters over real HTTP.
//!
//! # Routes
//!
//! | Route | Behaviour |
//! |-------|-----------|
//! | `GET /api/v1/issues?start&limit&embed` | Offset pages: `{"data": [...], "count": N}`; `embed=details` inlines details |
//! | `GET /api/v1/issues/{id}/details` | `{"data": {...}}`, or 404 for ids in [`Dataset::missing_details`] |
//! | `GET /api/v1/projects/{id}` | `{"data": {"id", "name"}}` |
//! | `GET /api/v1/feed?after&limit` | Cursor pages: `{"items": [...], "cursor": "..." \| null}` |
//! | `GET /api/v1/flaky?start&limit` | First page as `/issues`, then 500 |
//! | `GET /api/v1/garbage` | 200 with a body that is not JSON |

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use pagewise_client::HttpConnection;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// The records a backend serves.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub issues: Vec<Value>,
    /// Issue ids whose details endpoint answers 404.
    pub missing_details: HashSet<u64>,
}

impl Dataset {
    /// `count` issues with ids `1..=count`.
    ///
    /// - `severity` cycles through `low`, `high`, `critical`;
    /// - `projectId` alternates between 1 and 2;
    /// - every fifth issue is `suppressed`.
    pub fn issues(count: u64) -> Self {
        let severities = ["low", "high", "critical"];
        let issues = (1..=count)
            .map(|id| {
                json!({
                    "id": id,
                    "severity": severities[(id as usize - 1) % severities.len()],
                    "projectId": id % 2 + 1,
                    "suppressed": id % 5 == 0,
                    "foundDate": "2017-09-12T11:24:28.000+0000",
                })
            })
            .collect();
        Self {
            issues,
            missing_details: HashSet::new(),
        }
    }

    pub fn without_details(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.missing_details.extend(ids);
        self
    }

    /// The details document of issue `id`.
    ///
    /// Every fourth issue is `closed`; the rest are `open`.
    pub fn details(&self, id: u64) -> Option<Value> {
        if self.missing_details.contains(&id) || !(1..=self.issues.len() as u64).contains(&id) {
            return None;
        }
        Some(json!({
            "brief": format!("issue {id}"),
            "cwe": 78 + id,
            "state": if id % 4 == 0 { "closed" } else { "open" },
            "lastSeen": "2019-11-26T15:01:01.45",
        }))
    }
}

// ---------------------------------------------------------------------------
// Request log
// ---------------------------------------------------------------------------

/// One request as the backend saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub path: String,
    pub params: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

struct BackendState {
    dataset: Dataset,
    log: Mutex<Vec<RecordedRequest>>,
}

impl BackendState {
    fn record(&self, path: String, params: &[(String, String)]) {
        self.log
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(RecordedRequest {
                path,
                params: params.to_vec(),
            });
    }

    fn param<T: std::str::FromStr>(params: &[(String, String)], key: &str) -> Option<T> {
        params
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.parse().ok())
    }

    /// The issue slice for offset paging, with embeds applied.
    fn issue_page(&self, params: &[(String, String)]) -> Value {
        let start: usize = Self::param(params, "start").unwrap_or(0);
        let limit: usize = Self::param(params, "limit").unwrap_or(50);
        let embed_details = Self::param::<String>(params, "embed")
            .is_some_and(|e| e.split(',').any(|name| name == "details"));

        let data: Vec<Value> = self
            .dataset
            .issues
            .iter()
            .skip(start)
            .take(limit)
            .map(|issue| {
                let mut issue = issue.clone();
                if embed_details {
                    let id = issue["id"].as_u64().unwrap_or_default();
                    if let Some(details) = self.dataset.details(id) {
                        issue["details"] = details;
                    }
                }
                issue
            })
            .collect();
        json!({"data": data, "count": self.dataset.issues.len()})
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

type Shared = State<Arc<BackendState>>;
type Params = Query<Vec<(String, String)>>;

async fn list_issues(State(state): Shared, Query(params): Params) -> Json<Value> {
    state.record("/api/v1/issues".into(), &params);
    Json(state.issue_page(&params))
}

async fn issue_details(
    State(state): Shared,
    Path(id): Path<u64>,
    Query(params): Params,
) -> Response {
    state.record(format!("/api/v1/issues/{id}/details"), &params);
    match state.dataset.details(id) {
        Some(details) => Json(json!({ "data": details })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn project(State(state): Shared, Path(id): Path<u64>, Query(params): Params) -> Json<Value> {
    state.record(format!("/api/v1/projects/{id}"), &params);
    Json(json!({ "data": { "id": id, "name": format!("project-{id}") } }))
}

async fn feed(State(state): Shared, Query(params): Params) -> Json<Value> {
    state.record("/api/v1/feed".into(), &params);
    let after: usize = BackendState::param::<String>(&params, "after")
        .and_then(|c| c.strip_prefix('c').and_then(|n| n.parse().ok()))
        .unwrap_or(0);
    let limit: usize = BackendState::param(&params, "limit").unwrap_or(50);

    let items: Vec<Value> = state.dataset.issues.iter().skip(after).take(limit).cloned().collect();
    let next = after + items.len();
    let cursor = if next < state.dataset.issues.len() {
        json!(format!("c{next}"))
    } else {
        Value::Null
    };
    Json(json!({ "items": items, "cursor": cursor }))
}

async fn flaky(State(state): Shared, Query(params): Params) -> Response {
    state.record("/api/v1/flaky".into(), &params);
    if BackendState::param::<usize>(&params, "start").unwrap_or(0) > 0 {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(state.issue_page(&params)).into_response()
}

async fn garbage(State(state): Shared, Query(params): Params) -> &'static str {
    state.record("/api/v1/garbage".into(), &params);
    "this is not json"
}

/// Build the backend router over `dataset`.
fn router(state: Arc<BackendState>) -> Router {
    Router::new()
        .route("/api/v1/issues", get(list_issues))
        .route("/api/v1/issues/{id}/details", get(issue_details))
        .route("/api/v1/projects/{id}", get(project))
        .route("/api/v1/feed", get(feed))
        .route("/api/v1/flaky", get(flaky))
        .route("/api/v1/garbage", get(garbage))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// MockBackend
// ---------------------------------------------------------------------------

/// A running mock backend.
pub struct MockBackend {
    base_url: String,
    state: Arc<BackendState>,
}

impl MockBackend {
    /// Base URL, e.g. `http://127.0.0.1:51234`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// An [`HttpConnection`] pointed at this backend.
    pub fn connection(&self) -> Arc<HttpConnection> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("build reqwest client");
        Arc::new(HttpConnection::new(client, self.base_url.clone()))
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state
            .log
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Requests whose path equals `path`.
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests().into_iter().filter(|r| r.path == path).collect()
    }

    /// Requests whose path starts with `prefix`.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.path.starts_with(prefix))
            .count()
    }
}

/// Start an ephemeral in-process backend serving `dataset`.
///
/// The backend runs in a background `tokio` task bound to an OS-assigned port
/// on `127.0.0.1`.
///
/// # Panics
///
/// Panics if the TCP listener cannot be bound or the server fails to start.
pub async fn spawn_backend(dataset: Dataset) -> MockBackend {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("get local addr");

    let state = Arc::new(BackendState {
        dataset,
        log: Mutex::new(Vec::new()),
    });
    let app = router(Arc::clone(&state));

    tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock backend error");
    });

    MockBackend {
        base_url: format!("http://{addr}"),
        state,
    }
}
