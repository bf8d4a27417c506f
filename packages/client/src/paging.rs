//! Pagers: adapters between the query engine and a backend's paging scheme.
//!
//! A [`Pager`] knows two things about a backend:
//!
//! 1. which query parameters request the next page, given the current
//!    [`PagingState`];
//! 2. how to split a page body into records and continuation metadata.
//!
//! | Pager | Request parameters | Continuation |
//! |-------|--------------------|--------------|
//! | [`OffsetPager`] | `start`, `limit` | short page, or `count` exhausted |
//! | [`CursorPager`] | `after`, `limit` | short page, `cursor` absent, or `has_more` false |
//! | [`PageNumberPager`] | `page`, `size` | short page, or `total_pages` reached |
//!
//! Every parameter and key name is configurable. Item and metadata keys may
//! be dotted paths (`meta.next`). An items key of `None` means the page body
//! is itself the array of records.

use std::fmt;
use std::str::FromStr;

use pagewise::JsonMap;

use crate::connection::QueryParams;
use crate::error::{json_kind, DecodeError};

// ---------------------------------------------------------------------------
// State and pages
// ---------------------------------------------------------------------------

/// Progress of one query run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagingState {
    /// Zero-based index of the page about to be (or last) requested.
    pub page_index: u64,
    /// Number of records the backend has returned before this page.
    pub offset: u64,
    /// Opaque continuation token from the previous page.
    pub cursor: Option<String>,
    pub page_size: u64,
    /// Total record count, when the backend reports one.
    pub total: Option<u64>,
    pub fetched: u64,
    pub dispatched: u64,
}

impl PagingState {
    pub fn new(page_size: u64) -> Self {
        Self {
            page_size: page_size.max(1),
            ..Self::default()
        }
    }
}

/// One decoded page.
#[derive(Debug, Default)]
pub struct Page {
    pub records: Vec<JsonMap>,
    /// Token to send with the next request, for cursor backends.
    pub next_cursor: Option<String>,
    pub total: Option<u64>,
    /// The backend has nothing after this page.
    pub last: bool,
}

pub trait Pager: Send + Sync {
    fn page_params(&self, state: &PagingState) -> QueryParams;

    fn decode(&self, body: serde_json::Value, state: &PagingState) -> Result<Page, DecodeError>;
}

// ---------------------------------------------------------------------------
// OffsetPager
// ---------------------------------------------------------------------------

/// `?start=<offset>&limit=<page size>` paging with an optional total count.
#[derive(Debug, Clone)]
pub struct OffsetPager {
    start_param: String,
    limit_param: String,
    items_key: Option<String>,
    total_key: Option<String>,
}

impl Default for OffsetPager {
    fn default() -> Self {
        Self {
            start_param: "start".into(),
            limit_param: "limit".into(),
            items_key: Some("data".into()),
            total_key: Some("count".into()),
        }
    }
}

impl OffsetPager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(mut self, start: impl Into<String>, limit: impl Into<String>) -> Self {
        self.start_param = start.into();
        self.limit_param = limit.into();
        self
    }

    pub fn with_items_key(mut self, key: Option<&str>) -> Self {
        self.items_key = key.map(str::to_string);
        self
    }

    pub fn with_total_key(mut self, key: Option<&str>) -> Self {
        self.total_key = key.map(str::to_string);
        self
    }
}

impl Pager for OffsetPager {
    fn page_params(&self, state: &PagingState) -> QueryParams {
        vec![
            (self.start_param.clone(), state.offset.to_string()),
            (self.limit_param.clone(), state.page_size.to_string()),
        ]
    }

    fn decode(
        &self,
        mut body: serde_json::Value,
        state: &PagingState,
    ) -> Result<Page, DecodeError> {
        let total = match &self.total_key {
            Some(key) => read_u64(&body, key)?,
            None => None,
        };
        let records = take_items(&mut body, self.items_key.as_deref())?;
        let seen = state.offset + records.len() as u64;
        let last = (records.len() as u64) < state.page_size
            || total.or(state.total).is_some_and(|t| seen >= t);
        Ok(Page {
            records,
            next_cursor: None,
            total,
            last,
        })
    }
}

// ---------------------------------------------------------------------------
// CursorPager
// ---------------------------------------------------------------------------

/// Opaque-token paging: each page names the cursor of the next one.
///
/// The run ends on a page shorter than the page size even when it still
/// carries a cursor.
#[derive(Debug, Clone)]
pub struct CursorPager {
    cursor_param: String,
    limit_param: String,
    items_key: Option<String>,
    next_key: String,
    has_more_key: Option<String>,
}

impl Default for CursorPager {
    fn default() -> Self {
        Self {
            cursor_param: "after".into(),
            limit_param: "limit".into(),
            items_key: Some("items".into()),
            next_key: "cursor".into(),
            has_more_key: Some("has_more".into()),
        }
    }
}

impl CursorPager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(mut self, cursor: impl Into<String>, limit: impl Into<String>) -> Self {
        self.cursor_param = cursor.into();
        self.limit_param = limit.into();
        self
    }

    pub fn with_items_key(mut self, key: Option<&str>) -> Self {
        self.items_key = key.map(str::to_string);
        self
    }

    pub fn with_next_key(mut self, key: impl Into<String>) -> Self {
        self.next_key = key.into();
        self
    }

    pub fn with_has_more_key(mut self, key: Option<&str>) -> Self {
        self.has_more_key = key.map(str::to_string);
        self
    }
}

impl Pager for CursorPager {
    fn page_params(&self, state: &PagingState) -> QueryParams {
        let mut params = vec![(self.limit_param.clone(), state.page_size.to_string())];
        if let Some(cursor) = &state.cursor {
            params.push((self.cursor_param.clone(), cursor.clone()));
        }
        params
    }

    fn decode(
        &self,
        mut body: serde_json::Value,
        state: &PagingState,
    ) -> Result<Page, DecodeError> {
        let next_cursor = match lookup(&body, &self.next_key) {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) if s.is_empty() => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            Some(other) => {
                return Err(DecodeError::BadMetadata {
                    key: self.next_key.clone(),
                    expected: "cursor",
                    actual: json_kind(other),
                })
            }
        };
        let has_more = match &self.has_more_key {
            Some(key) => match lookup(&body, key) {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::Bool(b)) => Some(*b),
                Some(other) => {
                    return Err(DecodeError::BadMetadata {
                        key: key.clone(),
                        expected: "boolean",
                        actual: json_kind(other),
                    })
                }
            },
            None => None,
        };
        let records = take_items(&mut body, self.items_key.as_deref())?;
        let last = next_cursor.is_none()
            || has_more == Some(false)
            || (records.len() as u64) < state.page_size;
        Ok(Page {
            records,
            next_cursor,
            total: None,
            last,
        })
    }
}

// ---------------------------------------------------------------------------
// PageNumberPager
// ---------------------------------------------------------------------------

/// `?page=<n>&size=<page size>` paging, numbered from `first_page`.
#[derive(Debug, Clone)]
pub struct PageNumberPager {
    page_param: String,
    size_param: String,
    first_page: u64,
    items_key: Option<String>,
    total_pages_key: Option<String>,
}

impl Default for PageNumberPager {
    fn default() -> Self {
        Self {
            page_param: "page".into(),
            size_param: "size".into(),
            first_page: 1,
            items_key: Some("items".into()),
            total_pages_key: Some("total_pages".into()),
        }
    }
}

impl PageNumberPager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(mut self, page: impl Into<String>, size: impl Into<String>) -> Self {
        self.page_param = page.into();
        self.size_param = size.into();
        self
    }

    /// Number of the first page; most backends count from 1, some from 0.
    pub fn with_first_page(mut self, first: u64) -> Self {
        self.first_page = first;
        self
    }

    pub fn with_items_key(mut self, key: Option<&str>) -> Self {
        self.items_key = key.map(str::to_string);
        self
    }

    pub fn with_total_pages_key(mut self, key: Option<&str>) -> Self {
        self.total_pages_key = key.map(str::to_string);
        self
    }
}

impl Pager for PageNumberPager {
    fn page_params(&self, state: &PagingState) -> QueryParams {
        vec![
            (
                self.page_param.clone(),
                (self.first_page + state.page_index).to_string(),
            ),
            (self.size_param.clone(), state.page_size.to_string()),
        ]
    }

    fn decode(
        &self,
        mut body: serde_json::Value,
        state: &PagingState,
    ) -> Result<Page, DecodeError> {
        let total_pages = match &self.total_pages_key {
            Some(key) => read_u64(&body, key)?,
            None => None,
        };
        let records = take_items(&mut body, self.items_key.as_deref())?;
        let last = (records.len() as u64) < state.page_size
            || total_pages.is_some_and(|pages| state.page_index + 1 >= pages);
        Ok(Page {
            records,
            next_cursor: None,
            total: None,
            last,
        })
    }
}

// ---------------------------------------------------------------------------
// PagingMode
// ---------------------------------------------------------------------------

/// Names the shipped pagers, for configuration by string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PagingMode {
    #[default]
    Offset,
    Cursor,
    Page,
}

impl PagingMode {
    /// Build the pager for this mode with its default parameter names,
    /// reading records from `items_key` when given.
    pub fn pager(self, items_key: Option<Option<&str>>) -> Box<dyn Pager> {
        match (self, items_key) {
            (Self::Offset, None) => Box::new(OffsetPager::new()),
            (Self::Offset, Some(k)) => Box::new(OffsetPager::new().with_items_key(k)),
            (Self::Cursor, None) => Box::new(CursorPager::new()),
            (Self::Cursor, Some(k)) => Box::new(CursorPager::new().with_items_key(k)),
            (Self::Page, None) => Box::new(PageNumberPager::new()),
            (Self::Page, Some(k)) => Box::new(PageNumberPager::new().with_items_key(k)),
        }
    }
}

impl fmt::Display for PagingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Offset => "offset",
            Self::Cursor => "cursor",
            Self::Page => "page",
        })
    }
}

impl FromStr for PagingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offset" => Ok(Self::Offset),
            "cursor" => Ok(Self::Cursor),
            "page" => Ok(Self::Page),
            other => Err(format!(
                "unknown paging mode {other:?}; expected one of: offset, cursor, page"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Body helpers
// ---------------------------------------------------------------------------

fn pointer(dotted: &str) -> String {
    dotted
        .split('.')
        .map(|seg| format!("/{}", seg.replace('~', "~0").replace('/', "~1")))
        .collect()
}

fn lookup<'a>(body: &'a serde_json::Value, dotted: &str) -> Option<&'a serde_json::Value> {
    body.pointer(&pointer(dotted))
}

fn read_u64(body: &serde_json::Value, key: &str) -> Result<Option<u64>, DecodeError> {
    let bad = |actual| DecodeError::BadMetadata {
        key: key.to_string(),
        expected: "non-negative integer",
        actual,
    };
    match lookup(body, key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| bad("number")),
        Some(serde_json::Value::String(s)) => s.trim().parse().map(Some).map_err(|_| bad("string")),
        Some(other) => Err(bad(json_kind(other))),
    }
}

/// Move the record array out of `body` and convert each element.
fn take_items(
    body: &mut serde_json::Value,
    items_key: Option<&str>,
) -> Result<Vec<JsonMap>, DecodeError> {
    let key = items_key.unwrap_or("");
    let items = match items_key {
        Some(k) => body
            .pointer_mut(&pointer(k))
            .map(serde_json::Value::take)
            .ok_or_else(|| DecodeError::MissingItems(k.to_string()))?,
        None => body.take(),
    };
    let serde_json::Value::Array(items) = items else {
        return Err(DecodeError::NotAList {
            key: key.to_string(),
            actual: json_kind(&items),
        });
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            serde_json::Value::Object(map) => Ok(JsonMap::from(map)),
            other => Err(DecodeError::NotAnObject {
                index,
                actual: json_kind(&other),
            }),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(page_index: u64, offset: u64, page_size: u64) -> PagingState {
        PagingState {
            page_index,
            offset,
            ..PagingState::new(page_size)
        }
    }

    #[test]
    fn offset_params_follow_state() {
        let params = OffsetPager::new().page_params(&state(2, 20, 10));
        assert_eq!(
            params,
            [
                ("start".to_string(), "20".to_string()),
                ("limit".to_string(), "10".to_string())
            ]
        );
    }

    #[test]
    fn offset_full_page_continues_until_total() {
        let pager = OffsetPager::new();
        let body = json!({"data": [{"id": 1}, {"id": 2}], "count": 5});
        let page = pager.decode(body, &state(0, 0, 2)).unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.total, Some(5));
        assert!(!page.last);

        let body = json!({"data": [{"id": 5}, {"id": 6}], "count": 6});
        assert!(pager.decode(body, &state(2, 4, 2)).unwrap().last);
    }

    #[test]
    fn offset_short_page_is_last() {
        let body = json!({"data": [{"id": 1}]});
        let page = OffsetPager::new().decode(body, &state(0, 0, 2)).unwrap();
        assert!(page.last);
    }

    #[test]
    fn offset_uses_total_from_earlier_page() {
        let mut st = state(1, 2, 2);
        st.total = Some(4);
        let body = json!({"data": [{"id": 3}, {"id": 4}]});
        assert!(OffsetPager::new().decode(body, &st).unwrap().last);
    }

    #[test]
    fn bare_array_body() {
        let pager = OffsetPager::new().with_items_key(None).with_total_key(None);
        let page = pager.decode(json!([{"id": 1}, {"id": 2}]), &state(0, 0, 2)).unwrap();
        assert_eq!(page.records.len(), 2);
        assert!(!page.last);
    }

    #[test]
    fn cursor_pager_follows_tokens() {
        let pager = CursorPager::new().with_next_key("meta.next").with_has_more_key(None);
        assert_eq!(
            pager.page_params(&PagingState::new(3)),
            [("limit".to_string(), "3".to_string())]
        );

        let body = json!({"items": [{"id": 1}, {"id": 2}, {"id": 3}], "meta": {"next": "abc"}});
        let page = pager.decode(body, &PagingState::new(3)).unwrap();
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
        assert!(!page.last);

        let mut st = PagingState::new(3);
        st.cursor = page.next_cursor;
        assert!(pager
            .page_params(&st)
            .contains(&("after".to_string(), "abc".to_string())));

        let body = json!({"items": [], "meta": {"next": null}});
        assert!(pager.decode(body, &st).unwrap().last);
    }

    #[test]
    fn short_cursor_page_ends_run_despite_token() {
        let body = json!({"items": [{"id": 1}], "cursor": "t2", "has_more": true});
        let page = CursorPager::new().decode(body, &PagingState::new(2)).unwrap();
        assert_eq!(page.next_cursor.as_deref(), Some("t2"));
        assert!(page.last, "a page shorter than page_size is the last one");
    }

    #[test]
    fn cursor_has_more_false_ends_run() {
        let body = json!({"items": [{"id": 1}], "cursor": "x", "has_more": false});
        let page = CursorPager::new().decode(body, &PagingState::new(1)).unwrap();
        assert!(page.last);
    }

    #[test]
    fn page_number_counts_from_first_page() {
        let pager = PageNumberPager::new().with_first_page(0);
        assert_eq!(
            pager.page_params(&state(3, 30, 10))[0],
            ("page".to_string(), "3".to_string())
        );
        let body = json!({"items": [{"id": 1}, {"id": 2}], "total_pages": 2});
        assert!(!pager.decode(body.clone(), &state(0, 0, 2)).unwrap().last);
        assert!(pager.decode(body, &state(1, 2, 2)).unwrap().last);
    }

    #[test]
    fn decode_errors_name_the_problem() {
        let pager = OffsetPager::new();
        assert_eq!(
            pager.decode(json!({"items": []}), &PagingState::new(1)).unwrap_err(),
            DecodeError::MissingItems("data".into())
        );
        assert_eq!(
            pager.decode(json!({"data": {"id": 1}}), &PagingState::new(1)).unwrap_err(),
            DecodeError::NotAList {
                key: "data".into(),
                actual: "object"
            }
        );
        assert_eq!(
            pager.decode(json!({"data": [{"id": 1}, 7]}), &PagingState::new(1)).unwrap_err(),
            DecodeError::NotAnObject {
                index: 1,
                actual: "number"
            }
        );
        assert!(matches!(
            pager.decode(json!({"data": [], "count": "many"}), &PagingState::new(1)),
            Err(DecodeError::BadMetadata { .. })
        ));
    }

    #[test]
    fn paging_mode_from_str() {
        assert_eq!("cursor".parse::<PagingMode>(), Ok(PagingMode::Cursor));
        let err = "keyset".parse::<PagingMode>().unwrap_err();
        assert!(err.contains("expected one of: offset, cursor, page"), "{err}");
    }
}
