use std::sync::Arc;

use sketchhub_core::{DrawingId, EngineError, Identity, SnapshotId};

use crate::traits::{DrawingCatalog, SnapshotStore};

/// One gallery entry: a drawing and its latest renderable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasCard {
    pub drawing_id: DrawingId,
    pub title: String,
    pub snapshot_id: SnapshotId,
    pub bytes: Vec<u8>,
}

/// Computes the latest snapshot per visible drawing for listings, without
/// replaying history and without one store query per drawing.
pub struct GalleryProjector {
    catalog: Arc<dyn DrawingCatalog>,
    store: Arc<dyn SnapshotStore>,
}

impl GalleryProjector {
    pub fn new(catalog: Arc<dyn DrawingCatalog>, store: Arc<dyn SnapshotStore>) -> Self {
        Self { catalog, store }
    }

    /// Gallery for one identity: owned, collaborated and public drawings that
    /// have at least one snapshot, ordered by drawing id for determinism.
    pub async fn project(&self, identity: &Identity) -> Result<Vec<CanvasCard>, EngineError> {
        let mut drawings = self.catalog.visible_to(identity).await?;
        drawings.sort_by_key(|d| d.id);

        let ids: Vec<DrawingId> = drawings.iter().map(|d| d.id).collect();
        let mut latest = self.store.latest_for_many(&ids).await?;

        Ok(drawings
            .into_iter()
            .filter_map(|drawing| {
                latest.remove(&drawing.id).map(|snapshot| CanvasCard {
                    drawing_id: drawing.id,
                    title: drawing.title,
                    snapshot_id: snapshot.id,
                    bytes: snapshot.bytes,
                })
            })
            .collect())
    }
}
