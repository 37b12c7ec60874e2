use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::drawing::DrawingId;

/// Store-assigned, monotonically increasing snapshot sequence number.
///
/// Never user-supplied; the store allocates it atomically on append, so the
/// snapshot with the greatest id is always the well-defined "latest" for its
/// drawing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SnapshotId(pub i64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable, append-only record of a drawing's full canvas state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub drawing_id: DrawingId,
    pub created_at: DateTime<Utc>,
    pub bytes: Vec<u8>,
}
