//! Regional date normalization.
//!
//! Portal close dates arrive in whatever shape the portal's CMS emits:
//! `DD/MM/YYYY`, "13 February 2026", ISO timestamps, or (NZ GETS) a full
//! "2:00 PM 13 Feb 2026 (NZDT)" locale string. Everything funnels into a
//! canonical `YYYY-MM-DD` string, or `None` when nothing parseable is there.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

/// Normalize free-text date input to `YYYY-MM-DD`.
///
/// Parsing order, first match wins:
/// 1. ISO-prefixed input — take the date portion verbatim (validated).
/// 2. `DD/MM/YYYY` — Australian day-first order, never US month-first.
/// 3. `DD Month YYYY` — full or 3-letter English month names.
/// 4. Generic chrono fallback formats.
///
/// Never panics or errors; anything unrecognizable yields `None`.
pub fn normalize_date(input: Option<&str>) -> Option<String> {
    let s = input?.trim();
    if s.is_empty() {
        return None;
    }

    // 1. Already ISO-prefixed (possibly a full timestamp)
    if let Some(iso) = iso_prefix(s) {
        return Some(iso);
    }

    // 2. DD/MM/YYYY — region-specific day-first order
    if let Ok(d) = NaiveDate::parse_from_str(s, "%d/%m/%Y") {
        return Some(d.format("%Y-%m-%d").to_string());
    }

    // 3. DD Month YYYY (full name or abbreviation)
    for fmt in ["%d %B %Y", "%d %b %Y", "%d %B, %Y", "%d %b, %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d.format("%Y-%m-%d").to_string());
        }
    }

    // 4. Generic fallbacks seen in the wild on portal pages
    for fmt in ["%B %d, %Y", "%b %d, %Y", "%d-%m-%Y", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d.format("%Y-%m-%d").to_string());
        }
    }

    None
}

fn iso_prefix(s: &str) -> Option<String> {
    if s.len() < 10 || !s.is_char_boundary(10) {
        return None;
    }
    let head = &s[..10];
    if head.as_bytes()[4] != b'-' || head.as_bytes()[7] != b'-' {
        return None;
    }
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()?;
    Some(head.to_string())
}

/// NZ GETS pre-pass: pull a `DD Mon YYYY` substring out of the portal's
/// "HH:MM AM/PM DD Mon YYYY (timezone)" close-date strings, then delegate to
/// the generic normalizer.
pub fn normalize_nz_date(input: Option<&str>) -> Option<String> {
    let s = input?.trim();
    static NZ_DATE: OnceLock<Regex> = OnceLock::new();
    let re = NZ_DATE
        .get_or_init(|| Regex::new(r"(\d{1,2}\s+[A-Za-z]{3,9}\s+\d{4})").expect("nz date regex"));

    if let Some(cap) = re.captures(s) {
        if let Some(normalized) = normalize_date(Some(&cap[1])) {
            return Some(normalized);
        }
    }
    normalize_date(Some(s))
}
