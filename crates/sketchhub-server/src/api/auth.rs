use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::hash_password;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub surname: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
}

/// Create a user account and log it in.
async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(AppError::BadRequest("username and password are required".into()));
    }

    let hash = hash_password(&req.password);
    let created = state
        .db
        .create_user(
            &req.username,
            &req.email,
            &hash,
            req.surname.as_deref().unwrap_or(""),
            req.city.as_deref().unwrap_or(""),
        )
        .await?;

    if !created {
        return Err(AppError::BadRequest("username already taken".into()));
    }

    tracing::info!(username = %req.username, "user registered");
    let token = state.tokens.issue(&req.username).await;
    Ok(Json(AuthResponse { token }))
}

/// Verify credentials and issue a bearer token.
async fn authenticate(
    State(state): State<AppState>,
    Json(req): Json<AuthRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let user = state.db.find_user(&req.username).await?;

    match user {
        Some(user) if user.password_hash == hash_password(&req.password) => {
            let token = state.tokens.issue(&req.username).await;
            Ok(Json(AuthResponse { token }))
        }
        _ => Err(AppError::Unauthorized("bad username or password".into())),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/authenticate", post(authenticate))
}
