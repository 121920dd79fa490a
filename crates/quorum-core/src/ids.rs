use std::sync::atomic::{AtomicI64, Ordering};

use uuid::Uuid;

/// Generate a globally unique id (RFC-4122 v4 UUID, lowercase hyphenated).
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

static LAST_MS: AtomicI64 = AtomicI64::new(0);

/// Current wall-clock time in milliseconds with a process-wide monotonic
/// floor: successive calls never go backwards, even if the wall clock does.
pub fn timestamp_ms() -> i64 {
    let wall = chrono::Utc::now().timestamp_millis();
    let prev = LAST_MS.fetch_max(wall, Ordering::AcqRel);
    wall.max(prev)
}
