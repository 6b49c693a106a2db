//! Small helpers shared by the book adapters and store.

use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Current UTC time as an RFC 3339 string.
pub fn now_timestamp() -> String {
    // Rfc3339 only fails for years outside 0..=9999
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
