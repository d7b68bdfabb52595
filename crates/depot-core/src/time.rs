use std::time::{Duration, SystemTime};

use time::OffsetDateTime;

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Time elapsed from `earlier` to `now`, clamped to zero when `earlier` lies in the future.
pub fn elapsed_between(earlier: OffsetDateTime, now: OffsetDateTime) -> Duration {
    let delta = now - earlier;
    if delta.is_negative() {
        Duration::ZERO
    } else {
        delta.unsigned_abs()
    }
}

/// Format a timestamp as an RFC 7231 HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn format_http_date(datetime: OffsetDateTime) -> String {
    httpdate::fmt_http_date(SystemTime::from(datetime))
}

/// Parse an HTTP date header value, returning `None` when it is malformed.
pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    httpdate::parse_http_date(value.trim())
        .ok()
        .map(OffsetDateTime::from)
}
