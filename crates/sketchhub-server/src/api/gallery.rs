use axum::{extract::State, http::HeaderMap, routing::get, Json, Router};
use serde::Serialize;

use sketchhub_core::{b64, DrawingId, SnapshotId};
use sketchhub_engine::CanvasCard;

use crate::auth::require_identity;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CanvasCardResponse {
    pub drawing_id: DrawingId,
    pub title: String,
    pub snapshot_id: SnapshotId,
    pub data: String,
}

impl From<CanvasCard> for CanvasCardResponse {
    fn from(card: CanvasCard) -> Self {
        Self {
            drawing_id: card.drawing_id,
            title: card.title,
            snapshot_id: card.snapshot_id,
            data: b64::encode(&card.bytes),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GalleryResponse {
    pub canvases: Vec<CanvasCardResponse>,
}

/// Thumbnails for every drawing the identity may view that has at least one
/// snapshot.
async fn gallery(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<GalleryResponse>, AppError> {
    let identity = require_identity(&state, &headers).await?;
    let cards = state.projector.project(&identity).await?;
    Ok(Json(GalleryResponse {
        canvases: cards.into_iter().map(Into::into).collect(),
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/gallery", get(gallery))
}
