mod auth;
mod canvas;
mod gallery;
mod health;

use axum::Router;

use crate::AppState;

/// Create the API router
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(auth::router())
        .merge(canvas::router())
        .merge(gallery::router())
}
