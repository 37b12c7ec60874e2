use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use sketchhub_core::{b64, Canvas, Drawing, DrawingId, EngineError, SnapshotId};
use sketchhub_engine::{AccessGuard, SnapshotStore};

use crate::auth::require_identity;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct UpsertCanvasRequest {
    pub title: String,
    pub description: String,
    pub visibility: bool,
}

#[derive(Debug, Serialize)]
pub struct DrawingResponse {
    pub id: DrawingId,
    pub title: String,
    pub description: String,
    pub public: bool,
    pub owner: String,
}

impl From<Drawing> for DrawingResponse {
    fn from(d: Drawing) -> Self {
        Self {
            id: d.id,
            title: d.title,
            description: d.description,
            public: d.public,
            owner: d.owner,
        }
    }
}

/// Latest renderable state of one drawing. A drawing that has never been
/// flushed renders as a blank canvas with no snapshot id.
#[derive(Debug, Serialize)]
pub struct CanvasResponse {
    pub drawing_id: DrawingId,
    pub title: String,
    pub snapshot_id: Option<SnapshotId>,
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub username: String,
}

/// Create a drawing. The canvas gets its first snapshot on the first flush.
async fn create_canvas(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpsertCanvasRequest>,
) -> Result<Json<DrawingResponse>, AppError> {
    let identity = require_identity(&state, &headers).await?;
    let drawing = state
        .db
        .create_drawing(&req.title, &req.description, req.visibility, &identity)
        .await?;
    tracing::info!(drawing = %drawing.id, owner = %identity, "drawing created");
    Ok(Json(drawing.into()))
}

/// Edit title, description or visibility; owner only.
async fn update_canvas(
    State(state): State<AppState>,
    Path(id): Path<DrawingId>,
    headers: HeaderMap,
    Json(req): Json<UpsertCanvasRequest>,
) -> Result<Json<DrawingResponse>, AppError> {
    let identity = require_identity(&state, &headers).await?;
    let updated = state
        .db
        .update_drawing(id, &identity, &req.title, &req.description, req.visibility)
        .await?;

    if !updated {
        return match state.db.get_drawing(id).await? {
            None => Err(AppError::Engine(EngineError::NotFound(id))),
            Some(_) => Err(AppError::Engine(EngineError::Unauthorized(id))),
        };
    }

    let drawing = state
        .db
        .get_drawing(id)
        .await?
        .ok_or(EngineError::NotFound(id))?;
    Ok(Json(drawing.into()))
}

async fn get_canvas(
    State(state): State<AppState>,
    Path(id): Path<DrawingId>,
    headers: HeaderMap,
) -> Result<Json<CanvasResponse>, AppError> {
    let identity = require_identity(&state, &headers).await?;
    let drawing = state
        .db
        .get_drawing(id)
        .await?
        .ok_or(EngineError::NotFound(id))?;
    if !state.db.can_view(&identity, id).await? {
        return Err(AppError::Engine(EngineError::Unauthorized(id)));
    }

    let latest = state.db.latest(id).await?;
    let (snapshot_id, bytes) = match latest {
        Some(snapshot) => (Some(snapshot.id), snapshot.bytes),
        None => (None, Canvas::new().to_vec()),
    };

    Ok(Json(CanvasResponse {
        drawing_id: id,
        title: drawing.title,
        snapshot_id,
        data: b64::encode(&bytes),
    }))
}

/// Owner invites a guest; the invitation grants nothing until accepted.
async fn invite(
    State(state): State<AppState>,
    Path(id): Path<DrawingId>,
    headers: HeaderMap,
    Json(req): Json<InviteRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let identity = require_identity(&state, &headers).await?;
    let drawing = state
        .db
        .get_drawing(id)
        .await?
        .ok_or(EngineError::NotFound(id))?;
    if drawing.owner != identity {
        return Err(AppError::Engine(EngineError::Unauthorized(id)));
    }
    if state.db.find_user(&req.username).await?.is_none() {
        return Err(AppError::BadRequest(format!("no such user: {}", req.username)));
    }

    state.db.create_invitation(id, &req.username).await?;
    tracing::info!(drawing = %id, guest = %req.username, "invitation created");
    Ok(Json(serde_json::json!({ "invited": req.username })))
}

/// Accept a pending invitation, becoming a collaborator.
async fn accept(
    State(state): State<AppState>,
    Path(id): Path<DrawingId>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let identity = require_identity(&state, &headers).await?;
    let accepted = state.db.accept_invitation(id, &identity).await?;
    if !accepted {
        return Err(AppError::BadRequest("no pending invitation".into()));
    }
    tracing::info!(drawing = %id, collaborator = %identity, "invitation accepted");
    Ok(Json(serde_json::json!({ "collaborator": identity })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/canvas", post(create_canvas))
        .route("/canvas/{id}", get(get_canvas).put(update_canvas))
        .route("/canvas/{id}/invite", post(invite))
        .route("/canvas/{id}/accept", post(accept))
}
