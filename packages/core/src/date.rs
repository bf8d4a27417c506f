//! Multi-format date parsing.
//!
//! Backends disagree on how they encode timestamps. [`parse_date`] tries each
//! known encoding in a fixed priority order and returns the first match, so
//! callers see one date type regardless of which backend produced the record.
//!
//! | Priority | Example |
//! |----------|---------|
//! | 1 | `2017-09-12T11:24:28.000+0000` |
//! | 2 | `2026-02-18T12:00:00Z` |
//! | 3 | `2019-11-26 15:01:01` |
//! | 4 | `2019-11-26T15:01:01.45` |
//! | 5 | `2019-11-26` |
//!
//! Zone-less encodings are taken as UTC. A zone-less fraction must have at
//! least two digits; `2019-11-26T15:01:01.4` is rejected.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use regex::Regex;

struct DateFormat {
    name: &'static str,
    shape: &'static LazyLock<Regex>,
    parse: fn(&str) -> Option<DateTime<FixedOffset>>,
}

static ISO_OFFSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?[+-]\d{2}:?\d{2}$")
        .expect("invalid iso offset regex")
});

static RFC3339_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|z|[+-]\d{2}:\d{2})$")
        .expect("invalid rfc3339 regex")
});

static SPACED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}$").expect("invalid spaced regex")
});

static ISO_LOCAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d{2,9})?$")
        .expect("invalid iso local regex")
});

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("invalid date regex"));

static FORMATS: [DateFormat; 5] = [
    DateFormat {
        name: "iso-8601 with offset",
        shape: &ISO_OFFSET_RE,
        parse: parse_iso_offset,
    },
    DateFormat {
        name: "rfc 3339",
        shape: &RFC3339_RE,
        parse: parse_rfc3339,
    },
    DateFormat {
        name: "space-separated date-time",
        shape: &SPACED_RE,
        parse: parse_spaced,
    },
    DateFormat {
        name: "iso-8601 local",
        shape: &ISO_LOCAL_RE,
        parse: parse_iso_local,
    },
    DateFormat {
        name: "bare date",
        shape: &DATE_RE,
        parse: parse_bare_date,
    },
];

fn parse_iso_offset(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z").ok()
}

fn parse_rfc3339(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok()
}

fn parse_spaced(s: &str) -> Option<DateTime<FixedOffset>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().fixed_offset())
}

fn parse_iso_local(s: &str) -> Option<DateTime<FixedOffset>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().fixed_offset())
}

fn parse_bare_date(s: &str) -> Option<DateTime<FixedOffset>> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().fixed_offset())
}

/// Parse `text` with the first matching known encoding.
///
/// Returns `None` when no encoding matches.
pub fn parse_date(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    FORMATS
        .iter()
        .filter(|f| f.shape.is_match(text))
        .find_map(|f| (f.parse)(text))
}

/// Names of the accepted encodings in priority order, for error messages.
pub fn accepted_formats() -> Vec<&'static str> {
    FORMATS.iter().map(|f| f.name).collect()
}
