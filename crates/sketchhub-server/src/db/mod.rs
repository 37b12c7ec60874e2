pub mod models;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::HashMap;

use sketchhub_core::{Drawing, DrawingId, EngineError, Identity, Snapshot, SnapshotId};
use sketchhub_engine::{AccessGuard, DrawingCatalog, SnapshotStore};

use crate::error::AppError;
use models::{DrawingRow, SnapshotRow, UserRow};

fn store_err(err: sqlx::Error) -> EngineError {
    EngineError::StoreUnavailable(err.to_string())
}

/// Database connection wrapper. Also the Postgres-backed implementation of
/// the engine's persistence and authorization traits.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the database
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Insert a user; returns false if the username is already taken.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &[u8],
        surname: &str,
        city: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (username, password_hash, email, surname, city)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (username) DO NOTHING
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(email)
        .bind(surname)
        .bind(city)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn find_user(&self, username: &str) -> Result<Option<UserRow>, AppError> {
        let user = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT username, password_hash, email, surname, city, description
            FROM users WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Create a new drawing. No snapshot exists until the first flush.
    pub async fn create_drawing(
        &self,
        title: &str,
        description: &str,
        public: bool,
        owner: &Identity,
    ) -> Result<Drawing, AppError> {
        let row = sqlx::query_as::<_, DrawingRow>(
            r#"
            INSERT INTO drawings (title, description, public, owner_username)
            VALUES ($1, $2, $3, $4)
            RETURNING id, title, description, public, owner_username, created_at, updated_at
            "#,
        )
        .bind(title)
        .bind(description)
        .bind(public)
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    pub async fn get_drawing(&self, id: DrawingId) -> Result<Option<Drawing>, AppError> {
        let row = sqlx::query_as::<_, DrawingRow>(
            r#"
            SELECT id, title, description, public, owner_username, created_at, updated_at
            FROM drawings WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    /// Update title/description/visibility; owner only. Returns false when no
    /// row matched (absent drawing or wrong owner).
    pub async fn update_drawing(
        &self,
        id: DrawingId,
        owner: &Identity,
        title: &str,
        description: &str,
        public: bool,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE drawings
            SET title = $1, description = $2, public = $3, updated_at = NOW()
            WHERE id = $4 AND owner_username = $5
            "#,
        )
        .bind(title)
        .bind(description)
        .bind(public)
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a pending invitation; grants nothing until accepted.
    pub async fn create_invitation(
        &self,
        drawing_id: DrawingId,
        guest: &Identity,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO invitations (drawing_id, guest_username)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(drawing_id)
        .bind(guest)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert a pending invitation into a collaboration grant. Returns false
    /// when no invitation was pending.
    pub async fn accept_invitation(
        &self,
        drawing_id: DrawingId,
        guest: &Identity,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            "DELETE FROM invitations WHERE drawing_id = $1 AND guest_username = $2",
        )
        .bind(drawing_id)
        .bind(guest)
        .execute(&mut *tx)
        .await?;

        if deleted.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO collaborations (drawing_id, username)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(drawing_id)
        .bind(guest)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl SnapshotStore for Database {
    async fn append(
        &self,
        drawing_id: DrawingId,
        bytes: Vec<u8>,
    ) -> Result<SnapshotId, EngineError> {
        let result = sqlx::query_scalar::<_, i64>(
            "INSERT INTO snapshots (drawing_id, data) VALUES ($1, $2) RETURNING seq",
        )
        .bind(drawing_id)
        .bind(&bytes)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(seq) => Ok(SnapshotId(seq)),
            Err(err) => {
                if err
                    .as_database_error()
                    .map_or(false, |e| e.is_foreign_key_violation())
                {
                    Err(EngineError::NotFound(drawing_id))
                } else {
                    Err(store_err(err))
                }
            }
        }
    }

    async fn latest(&self, drawing_id: DrawingId) -> Result<Option<Snapshot>, EngineError> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT seq, drawing_id, data, created_at
            FROM snapshots WHERE drawing_id = $1
            ORDER BY seq DESC LIMIT 1
            "#,
        )
        .bind(drawing_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        if let Some(row) = row {
            return Ok(Some(row.into()));
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM drawings WHERE id = $1)")
                .bind(drawing_id)
                .fetch_one(&self.pool)
                .await
                .map_err(store_err)?;

        if exists {
            Ok(None)
        } else {
            Err(EngineError::NotFound(drawing_id))
        }
    }

    async fn latest_for_many(
        &self,
        drawing_ids: &[DrawingId],
    ) -> Result<HashMap<DrawingId, Snapshot>, EngineError> {
        // Grouped max per drawing in one query; DISTINCT ON picks the row
        // with the greatest seq for each drawing id.
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT DISTINCT ON (drawing_id) seq, drawing_id, data, created_at
            FROM snapshots
            WHERE drawing_id = ANY($1)
            ORDER BY drawing_id, seq DESC
            "#,
        )
        .bind(drawing_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|row| (row.drawing_id, row.into()))
            .collect())
    }
}

#[async_trait]
impl AccessGuard for Database {
    async fn can_view(
        &self,
        identity: &Identity,
        drawing_id: DrawingId,
    ) -> Result<bool, EngineError> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM drawings d
                WHERE d.id = $1
                  AND (d.public
                       OR d.owner_username = $2
                       OR EXISTS(SELECT 1 FROM collaborations c
                                 WHERE c.drawing_id = d.id AND c.username = $2))
            )
            "#,
        )
        .bind(drawing_id)
        .bind(identity)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)
    }

    async fn can_edit(
        &self,
        identity: &Identity,
        drawing_id: DrawingId,
    ) -> Result<bool, EngineError> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM drawings d
                WHERE d.id = $1
                  AND (d.owner_username = $2
                       OR EXISTS(SELECT 1 FROM collaborations c
                                 WHERE c.drawing_id = d.id AND c.username = $2))
            )
            "#,
        )
        .bind(drawing_id)
        .bind(identity)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)
    }
}

#[async_trait]
impl DrawingCatalog for Database {
    async fn get(&self, drawing_id: DrawingId) -> Result<Option<Drawing>, EngineError> {
        let row = sqlx::query_as::<_, DrawingRow>(
            r#"
            SELECT id, title, description, public, owner_username, created_at, updated_at
            FROM drawings WHERE id = $1
            "#,
        )
        .bind(drawing_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(Into::into))
    }

    async fn visible_to(&self, identity: &Identity) -> Result<Vec<Drawing>, EngineError> {
        let rows = sqlx::query_as::<_, DrawingRow>(
            r#"
            SELECT id, title, description, public, owner_username, created_at, updated_at
            FROM drawings d
            WHERE d.public
               OR d.owner_username = $1
               OR EXISTS(SELECT 1 FROM collaborations c
                         WHERE c.drawing_id = d.id AND c.username = $1)
            ORDER BY d.id
            "#,
        )
        .bind(identity)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
