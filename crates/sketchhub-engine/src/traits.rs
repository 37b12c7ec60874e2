use async_trait::async_trait;
use std::collections::HashMap;

use sketchhub_core::{Drawing, DrawingId, EngineError, Identity, Snapshot, SnapshotId};

/// Durable, append-only history of canvas states per drawing.
///
/// Appends are atomic: a reader never observes a partial snapshot, and the
/// store assigns sequence ids so that "latest" is well-defined even when two
/// appends race for the same drawing.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a new snapshot; fails with `NotFound` if the drawing is absent.
    async fn append(&self, drawing_id: DrawingId, bytes: Vec<u8>)
        -> Result<SnapshotId, EngineError>;

    /// The snapshot with the greatest sequence id, or `None` for a drawing
    /// that exists but has never been flushed.
    async fn latest(&self, drawing_id: DrawingId) -> Result<Option<Snapshot>, EngineError>;

    /// Batched latest lookup for the gallery: one call, not one per drawing.
    /// Drawings without snapshots are simply absent from the result.
    async fn latest_for_many(
        &self,
        drawing_ids: &[DrawingId],
    ) -> Result<HashMap<DrawingId, Snapshot>, EngineError>;
}

/// Read-only authorization queries against the persisted ownership and
/// collaboration relations. Pending invitations grant nothing.
#[async_trait]
pub trait AccessGuard: Send + Sync {
    /// Owner, collaborator, or anyone if the drawing is public.
    async fn can_view(&self, identity: &Identity, drawing_id: DrawingId)
        -> Result<bool, EngineError>;

    /// Owner or collaborator only.
    async fn can_edit(&self, identity: &Identity, drawing_id: DrawingId)
        -> Result<bool, EngineError>;
}

/// Read-only drawing metadata lookups consumed by the engine.
#[async_trait]
pub trait DrawingCatalog: Send + Sync {
    async fn get(&self, drawing_id: DrawingId) -> Result<Option<Drawing>, EngineError>;

    /// Every drawing the identity may view: owned, collaborated, or public.
    async fn visible_to(&self, identity: &Identity) -> Result<Vec<Drawing>, EngineError>;
}
