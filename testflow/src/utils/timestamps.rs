//! Timestamp helpers.

use chrono::{DateTime, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Returns the whole seconds between two timestamps.
///
/// Negative spans (clock skew between the engine and the runtime) clamp to zero.
#[must_use]
pub fn duration_seconds(start: Timestamp, end: Timestamp) -> i64 {
    (end - start).num_seconds().max(0)
}
