use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sketchhub_core::{Drawing, Snapshot, SnapshotId};

/// User database model.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub username: String,
    pub password_hash: Vec<u8>,
    pub email: String,
    pub surname: String,
    pub city: String,
    pub description: String,
}

/// Drawing database model.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DrawingRow {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub public: bool,
    pub owner_username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DrawingRow> for Drawing {
    fn from(row: DrawingRow) -> Self {
        Drawing {
            id: row.id,
            title: row.title,
            description: row.description,
            public: row.public,
            owner: row.owner_username,
        }
    }
}

/// Snapshot history entry.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    pub seq: i64,
    pub drawing_id: Uuid,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl From<SnapshotRow> for Snapshot {
    fn from(row: SnapshotRow) -> Self {
        Snapshot {
            id: SnapshotId(row.seq),
            drawing_id: row.drawing_id,
            created_at: row.created_at,
            bytes: row.data,
        }
    }
}
