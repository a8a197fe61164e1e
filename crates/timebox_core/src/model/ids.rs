//! Identity and timestamp value types.
//!
//! # Responsibility
//! - Give user ids, sheet ids and server timestamps distinct types.
//! - Derive sheet ids deterministically from their calendar date.
//!
//! # Invariants
//! - `UserId` and `SheetId` are non-blank and never contain `/`, so they are
//!   always safe as a single document path segment.
//! - `SheetId::for_date(d)` is always `sheet-<d>`.
//! - `ServerTimestamp::now()` is strictly increasing within one process.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicI64, Ordering};

const SHEET_ID_PREFIX: &str = "sheet-";

static LAST_ISSUED_MS: AtomicI64 = AtomicI64::new(0);

/// Resolved identity of the signed-in user owning a document namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Returns `None` for blank values or values containing `/`.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        normalize_segment(raw.as_ref()).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Document id of one planning sheet within a user's collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SheetId(String);

impl SheetId {
    /// Wraps an existing document id (for example one read back from the store).
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        normalize_segment(raw.as_ref()).map(Self)
    }

    /// Deterministic id for the sheet owning `date`.
    ///
    /// The caller is expected to pass a validated `YYYY-MM-DD` date.
    pub fn for_date(date: &str) -> Self {
        Self(format!("{SHEET_ID_PREFIX}{}", date.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SheetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque server-assigned timestamp (epoch milliseconds on the wire).
///
/// Callers compare and order timestamps but must not interpret them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerTimestamp(i64);

impl ServerTimestamp {
    /// Issues a fresh timestamp, never equal to or older than the previous one.
    pub fn now() -> Self {
        let wall = Utc::now().timestamp_millis();
        let previous = LAST_ISSUED_MS
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(wall.max(last + 1))
            })
            .unwrap_or(wall);
        Self(wall.max(previous + 1))
    }

    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }
}

fn normalize_segment(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.contains('/') {
        return None;
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::{ServerTimestamp, SheetId, UserId};

    #[test]
    fn sheet_id_is_derived_from_date() {
        assert_eq!(SheetId::for_date("2024-03-01").as_str(), "sheet-2024-03-01");
    }

    #[test]
    fn ids_reject_blank_and_path_separators() {
        assert!(UserId::new("   ").is_none());
        assert!(UserId::new("a/b").is_none());
        assert!(SheetId::new("").is_none());
        assert_eq!(UserId::new(" uid-1 ").expect("valid id").as_str(), "uid-1");
    }

    #[test]
    fn server_timestamps_strictly_increase() {
        let first = ServerTimestamp::now();
        let second = ServerTimestamp::now();
        let third = ServerTimestamp::now();
        assert!(first < second);
        assert!(second < third);
    }
}
