//! Normalization rules shared by every adapter before a [`crate::Paper`] is built.
//!
//! Every function here is total: unusable input yields `None` or an empty
//! collection, never a panic or an error.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use url::Url;

/// Split a delimited author list into trimmed, non-empty names.
///
/// When the string contains a semicolon, semicolons (and the word "and") are
/// the only separators, so "Last, First" names survive intact. Otherwise commas
/// and "and" both separate.
pub fn split_authors(raw: &str) -> Vec<String> {
    let unified = and_separator().replace_all(raw, ";");
    let parts: Vec<&str> = if raw.contains(';') {
        unified.split(';').collect()
    } else {
        unified.split([',', ';']).collect()
    };
    parts
        .into_iter()
        .map(clean_text)
        .filter(|name| name.chars().any(char::is_alphanumeric))
        .collect()
}

fn and_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s+and\s+").expect("valid regex"))
}

/// Parse a date, trying full timestamp, then full date, then year-month, then year.
///
/// Year-month input lands on the first of the month and year-only input on
/// January 1st. Anything else gives `None`.
pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    if let Ok(d) = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    if s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) {
        return year_start(s.parse().ok()?);
    }
    None
}

/// Midnight on January 1st of `year`.
pub fn year_start(year: i32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)
}

/// First standalone four-digit number in free text ("Issued Date: 2023-01-15" gives 2023).
pub fn extract_year(text: &str) -> Option<i32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\b(\d{4})\b").expect("valid regex"));
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

/// Identifier for sources with no native one: the detail URL's trailing path
/// segment, or a hash of the title when there is no usable URL.
///
/// Title-derived identifiers change whenever the title changes, and URL-derived
/// ones change if the source reorganizes its URLs.
pub fn derive_id(url: &str, title: &str) -> String {
    if let Some(segment) = last_path_segment(url) {
        return segment;
    }
    let mut hasher = DefaultHasher::new();
    clean_text(title).to_lowercase().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn last_path_segment(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Resolve `href` against `base`; hrefs that cannot be resolved are returned as-is.
pub fn absolute_url(base: &str, href: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(href.trim()))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.trim().to_string())
}

/// Collapse runs of whitespace (including newlines) into single spaces.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Merge an abstract given as labeled sections, bare paragraphs, or flat text.
///
/// Sections win over paragraphs, which win over flat text. The chosen parts
/// are joined with newlines in document order.
pub fn assemble_abstract(sections: &[String], paragraphs: &[String], flat: &str) -> Option<String> {
    let join = |parts: &[String]| {
        let kept: Vec<String> = parts
            .iter()
            .map(|p| clean_text(p))
            .filter(|p| !p.is_empty())
            .collect();
        (!kept.is_empty()).then(|| kept.join("\n"))
    };
    join(sections)
        .or_else(|| join(paragraphs))
        .or_else(|| Some(clean_text(flat)).filter(|f| !f.is_empty()))
}
