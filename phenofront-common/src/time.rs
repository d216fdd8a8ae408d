//! Timestamp utilities
//!
//! Query parameters carry times as `MM/DD/YYYY HH:mm`, interpreted as UTC.
//! An empty parameter means "unset" and is not an error.

use crate::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Textual format of start/end query parameters
pub const QUERY_TIME_FORMAT: &str = "%m/%d/%Y %H:%M";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parse an optional query time
///
/// Empty (or all-whitespace) input yields `None`; anything else must match
/// [`QUERY_TIME_FORMAT`] exactly or `InvalidArgument` is returned.
pub fn parse_query_time(text: &str) -> Result<Option<DateTime<Utc>>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    NaiveDateTime::parse_from_str(text, QUERY_TIME_FORMAT)
        .map(|naive| Some(naive.and_utc()))
        .map_err(|e| {
            Error::InvalidArgument(format!(
                "'{}' is not a time of the form MM/DD/YYYY HH:mm ({})",
                text, e
            ))
        })
}

/// Render a time the way query parameters expect it
pub fn format_query_time(time: &DateTime<Utc>) -> String {
    time.format(QUERY_TIME_FORMAT).to_string()
}
