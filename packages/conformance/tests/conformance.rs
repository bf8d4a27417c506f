//! End-to-end conformance tests for pagewise.
//!
//! Each test spawns an ephemeral in-process backend (real TCP, real HTTP) via
//! [`pagewise_conformance::spawn_backend`] and drives a [`Query`] against it
//! through [`pagewise_client::HttpConnection`]. Assertions are made both on
//! what the processor received and on the requests the backend logged.
//!
//! # Coverage
//!
//! | Test | Behaviour |
//! |------|-----------|
//! | `offset_paging_reads_every_issue_in_order` | page sequence, dispatch order |
//! | `known_total_avoids_trailing_empty_page` | termination on exhausted count |
//! | `exclude_filter_keeps_later_records` | EXCLUDE mode, no blocking |
//! | `include_and_exclude_are_complementary` | INCLUDE/EXCLUDE equivalence |
//! | `on_demand_details_load_once_per_record` | memoized on-demand loads |
//! | `embed_request_replaces_per_record_loads` | query-config-aware embed |
//! | `cached_lookup_fetches_each_project_once` | bounded lookup cache |
//! | `field_selection_is_sent_with_loads` | request customization hook |
//! | `dates_in_loaded_fields_convert` | multi-format date conversion |
//! | `cursor_feed_follows_tokens` | cursor pager |
//! | `max_records_caps_output` | record cap mid-page |
//! | `server_error_mid_run_reports_progress` | error with dispatched count |
//! | `non_json_page_is_reported` | decode failure |
//! | `missing_details_fail_or_skip` | field error policy |

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use pagewise::{JsonMap, OnDemandLoader};
use pagewise_client::pipeline::{AllOf, FieldEquals, Filter, Predicate, ResolveFields};
use pagewise_client::{
    CachedLoader, CollectProcessor, ConnectionError, CursorPager, DecodeError, FieldErrorPolicy,
    FieldSelection, Query, QueryErrorKind, QueryState, RestLoader,
};
use pagewise_conformance::{spawn_backend, Dataset, MockBackend};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ISSUES: &str = "/api/v1/issues";

fn ids(records: &[JsonMap]) -> Vec<u64> {
    records
        .iter()
        .filter_map(|r| r.record_id())
        .map(|id| id.parse().unwrap())
        .collect()
}

fn details_loader(backend: &MockBackend) -> Arc<dyn OnDemandLoader> {
    Arc::new(RestLoader::new(
        backend.connection(),
        "/api/v1/issues/{id}/details",
        Some("data"),
    ))
}

// ---------------------------------------------------------------------------
// Paging
// ---------------------------------------------------------------------------

#[tokio::test]
async fn offset_paging_reads_every_issue_in_order() {
    let backend = spawn_backend(Dataset::issues(7)).await;
    let query = Query::builder(backend.connection(), ISSUES).page_size(3).build();

    let mut sink = CollectProcessor::new();
    let summary = query.run(&mut sink).await.unwrap();

    assert_eq!(ids(&sink.records), [1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(summary.pages, 3);
    let starts: Vec<_> = backend
        .requests_to(ISSUES)
        .iter()
        .map(|r| r.param("start").unwrap().to_string())
        .collect();
    assert_eq!(starts, ["0", "3", "6"]);
}

#[tokio::test]
async fn known_total_avoids_trailing_empty_page() {
    let backend = spawn_backend(Dataset::issues(6)).await;
    let query = Query::builder(backend.connection(), ISSUES).page_size(3).build();
    assert_eq!(query.collect().await.unwrap().len(), 6);
    assert_eq!(backend.requests_to(ISSUES).len(), 2);
}

#[tokio::test]
async fn cursor_feed_follows_tokens() {
    let backend = spawn_backend(Dataset::issues(5)).await;
    let query = Query::builder(backend.connection(), "/api/v1/feed")
        .page_size(2)
        .pager(CursorPager::new().with_has_more_key(None))
        .build();

    assert_eq!(ids(&query.collect().await.unwrap()), [1, 2, 3, 4, 5]);
    let cursors: Vec<_> = backend
        .requests_to("/api/v1/feed")
        .iter()
        .map(|r| r.param("after").map(str::to_string))
        .collect();
    assert_eq!(cursors, [None, Some("c2".into()), Some("c4".into())]);
}

#[tokio::test]
async fn max_records_caps_output() {
    let backend = spawn_backend(Dataset::issues(20)).await;
    let query = Query::builder(backend.connection(), ISSUES)
        .page_size(4)
        .max_records(Some(6))
        .build();
    assert_eq!(ids(&query.collect().await.unwrap()), [1, 2, 3, 4, 5, 6]);
    assert_eq!(backend.requests_to(ISSUES).len(), 2);
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exclude_filter_keeps_later_records() {
    let backend = spawn_backend(Dataset::issues(10)).await;
    let query = Query::builder(backend.connection(), ISSUES)
        .page_size(4)
        .filter(Filter::exclude(FieldEquals::new("suppressed", ["true"])))
        .build();

    let mut sink = CollectProcessor::new();
    let summary = query.run(&mut sink).await.unwrap();
    assert_eq!(ids(&sink.records), [1, 2, 3, 4, 6, 7, 8, 9]);
    assert_eq!(summary.rejected, 2);
    assert_eq!(summary.fetched, 10);
}

#[tokio::test]
async fn include_and_exclude_are_complementary() {
    let backend = spawn_backend(Dataset::issues(9)).await;
    let severe = || {
        let both: Vec<Box<dyn Predicate>> = vec![
            Box::new(FieldEquals::new("severity", ["high", "critical"])),
            Box::new(FieldEquals::new("projectId", ["2"])),
        ];
        AllOf(both)
    };

    let kept = Query::builder(backend.connection(), ISSUES)
        .filter(Filter::include(severe()))
        .build()
        .collect()
        .await
        .unwrap();
    let dropped = Query::builder(backend.connection(), ISSUES)
        .filter(Filter::exclude(severe()))
        .build()
        .collect()
        .await
        .unwrap();

    // Odd ids belong to project 2; ids 1, 4, 7 are low severity.
    assert_eq!(ids(&kept), [3, 5, 9]);
    assert_eq!(kept.len() + dropped.len(), 9);
    assert!(ids(&dropped).iter().all(|id| !ids(&kept).contains(id)));
}

// ---------------------------------------------------------------------------
// On-demand fields
// ---------------------------------------------------------------------------

#[tokio::test]
async fn on_demand_details_load_once_per_record() {
    let backend = spawn_backend(Dataset::issues(8)).await;
    let query = Query::builder(backend.connection(), ISSUES)
        .page_size(5)
        .filter(
            Filter::include(FieldEquals::new("details.state", ["open"]))
                .with_on_demand("details", details_loader(&backend)),
        )
        .build();

    let mut records = query.collect().await.unwrap();
    assert_eq!(ids(&records), [1, 2, 3, 5, 6, 7]);

    for record in &mut records {
        let brief = record.get_path::<String>("details.brief").await.unwrap();
        let cwe = record.get_path::<i64>("details.cwe").await.unwrap();
        assert_eq!(brief, Some(format!("issue {}", record.record_id().unwrap())));
        assert!(cwe.is_some());
    }
    // One details request per listed record, however often it was read.
    assert_eq!(backend.count_prefix("/api/v1/issues/"), 8);
}

#[tokio::test]
async fn embed_request_replaces_per_record_loads() {
    let backend = spawn_backend(Dataset::issues(5)).await;
    let query = Query::builder(backend.connection(), ISSUES)
        .filter(
            Filter::exclude(FieldEquals::new("details.state", ["closed"]))
                .with_on_demand("details", details_loader(&backend))
                .with_embed("details"),
        )
        .build();

    assert_eq!(ids(&query.collect().await.unwrap()), [1, 2, 3, 5]);
    assert_eq!(backend.count_prefix("/api/v1/issues/"), 0);
    assert_eq!(backend.requests_to(ISSUES)[0].param("embed"), Some("details"));
}

#[tokio::test]
async fn cached_lookup_fetches_each_project_once() {
    let backend = spawn_backend(Dataset::issues(9)).await;
    let project: Arc<dyn OnDemandLoader> = Arc::new(CachedLoader::new(
        RestLoader::new(backend.connection(), "/api/v1/projects/{projectId}", Some("data")),
        4,
    ));
    let query = Query::builder(backend.connection(), ISSUES)
        .page_size(4)
        .on_demand("project", project)
        .enrich(ResolveFields::new(["project"]))
        .build();

    let records = query.collect().await.unwrap();
    assert_eq!(records.len(), 9);
    assert_eq!(
        records[0].to_json()["project"]["name"],
        serde_json::json!("project-2")
    );
    assert_eq!(backend.count_prefix("/api/v1/projects/"), 2);
}

#[tokio::test]
async fn field_selection_is_sent_with_loads() {
    let backend = spawn_backend(Dataset::issues(2)).await;
    let loader = RestLoader::new(
        backend.connection(),
        "/api/v1/issues/{id}/details",
        Some("data"),
    )
    .with_customizer(FieldSelection::new("fields", ["brief", "state"]));
    let query = Query::builder(backend.connection(), ISSUES)
        .on_demand("details", Arc::new(loader))
        .enrich(ResolveFields::new(["details"]))
        .build();

    query.collect().await.unwrap();
    let loads = backend.requests_to("/api/v1/issues/1/details");
    assert_eq!(loads.len(), 1);
    assert_eq!(loads[0].param("fields"), Some("brief,state"));
}

#[tokio::test]
async fn dates_in_loaded_fields_convert() {
    let backend = spawn_backend(Dataset::issues(1)).await;
    let query = Query::builder(backend.connection(), ISSUES)
        .on_demand("details", details_loader(&backend))
        .build();

    let mut records = query.collect().await.unwrap();
    let record = &mut records[0];

    let found = record.get::<DateTime<Utc>>("foundDate").await.unwrap().unwrap();
    assert_eq!(found, Utc.with_ymd_and_hms(2017, 9, 12, 11, 24, 28).unwrap());

    let seen = record
        .get_path::<DateTime<Utc>>("details.lastSeen")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        seen,
        Utc.with_ymd_and_hms(2019, 11, 26, 15, 1, 1).unwrap() + chrono::Duration::milliseconds(450)
    );
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_error_mid_run_reports_progress() {
    let backend = spawn_backend(Dataset::issues(10)).await;
    let query = Query::builder(backend.connection(), "/api/v1/flaky").page_size(3).build();

    let mut sink = CollectProcessor::new();
    let err = query.run(&mut sink).await.unwrap_err();

    assert_eq!(ids(&sink.records), [1, 2, 3]);
    assert_eq!(err.dispatched, 3);
    assert_eq!(err.page, 1);
    assert_eq!(err.state, QueryState::FetchingPage);
    assert!(matches!(
        err.kind,
        QueryErrorKind::Transport(ConnectionError::Status(500))
    ));
    assert_eq!(backend.requests_to("/api/v1/flaky").len(), 2, "no automatic retry");
}

#[tokio::test]
async fn non_json_page_is_reported() {
    let backend = spawn_backend(Dataset::issues(1)).await;
    let err = Query::builder(backend.connection(), "/api/v1/garbage")
        .build()
        .collect()
        .await
        .unwrap_err();
    assert_eq!(err.dispatched, 0);
    assert_eq!(err.state, QueryState::Decoding);
    assert!(matches!(err.kind, QueryErrorKind::Decode(DecodeError::Body(_))));
}

#[tokio::test]
async fn missing_details_fail_or_skip() {
    let backend = spawn_backend(Dataset::issues(4).without_details([2])).await;
    let build = |policy| {
        Query::builder(backend.connection(), ISSUES)
            .filter(
                Filter::include(FieldEquals::new("details.state", ["open"]))
                    .with_on_demand("details", details_loader(&backend)),
            )
            .on_field_error(policy)
            .build()
    };

    let err = build(FieldErrorPolicy::Fail).collect().await.unwrap_err();
    assert_eq!(err.dispatched, 1);
    let message = err.to_string();
    assert!(message.contains("details"), "{message}");
    assert!(message.contains("404"), "{message}");

    let mut sink = CollectProcessor::new();
    let summary = build(FieldErrorPolicy::SkipRecord).run(&mut sink).await.unwrap();
    assert_eq!(ids(&sink.records), [1, 3]);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.rejected, 1);
}
