mod websocket;

use axum::Router;

use crate::AppState;

/// Create the collaboration router
pub fn router() -> Router<AppState> {
    Router::new().merge(websocket::router())
}
