use std::time::Duration;

use reqwest::header::HeaderMap;

pub const REMAINING_HEADER: &str = "ratelimit-remaining";
pub const RESET_HEADER: &str = "ratelimit-reset";
pub const RESET_BUFFER: Duration = Duration::from_secs(2);

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
}

/// How long to wait before the key may be used again, if at all.
///
/// A missing or unreadable remaining-count header counts as zero, so the
/// client waits for the reset header (seconds, missing = 0) plus
/// [`RESET_BUFFER`] unless quota is known to remain.
pub fn backoff_from_headers(headers: &HeaderMap) -> Option<Duration> {
    let remaining = header_i64(headers, REMAINING_HEADER).unwrap_or(0);
    if remaining > 0 {
        return None;
    }
    let reset = header_i64(headers, RESET_HEADER).unwrap_or(0).max(0) as u64;
    Some(Duration::from_secs(reset) + RESET_BUFFER)
}
