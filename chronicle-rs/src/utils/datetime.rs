//! DateTime formatting for adjudication prompts.

use chrono::{DateTime, Utc};

/// Format a timestamp as second-precision ISO 8601 UTC (`2024-01-15T10:30:00Z`).
pub fn format_reference_time(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
