use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(([^<>()\[\]\\.,;:\s@"]+(\.[^<>()\[\]\\.,;:\s@"]+)*)|(".+"))@((\[[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\])|(([a-zA-Z\-0-9]+\.)+[a-zA-Z]{2,}))$"#)
        .expect("email pattern compiles")
});
static BATCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}$").expect("batch pattern compiles"));
static ACADEMIC_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]{4})-([0-9]{4})$").expect("academic year pattern compiles"));

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(&email.to_lowercase())
}

/// Exactly 13 ASCII digits.
pub fn is_valid_registration_number(value: &str) -> bool {
    value.len() == 13 && value.bytes().all(|b| b.is_ascii_digit())
}

/// Exactly 10 ASCII digits.
pub fn is_valid_mobile_number(value: &str) -> bool {
    value.len() == 10 && value.bytes().all(|b| b.is_ascii_digit())
}

/// `YYYY-YY`, e.g. `2022-26`.
pub fn is_valid_batch(value: &str) -> bool {
    BATCH_RE.is_match(value)
}

/// `YYYY-YYYY` where the second year follows the first.
pub fn is_valid_academic_year(value: &str) -> bool {
    let Some(caps) = ACADEMIC_YEAR_RE.captures(value) else {
        return false;
    };
    let first: u32 = caps[1].parse().unwrap_or(0);
    let second: u32 = caps[2].parse().unwrap_or(0);
    second == first + 1
}

pub fn is_valid_stipend(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

/// Accepts a calendar date (`2024-01-01`, read as midnight UTC) or an RFC 3339 timestamp.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
