use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use sketchhub_core::Identity;

use crate::error::AppError;
use crate::AppState;

pub fn hash_password(password: &str) -> Vec<u8> {
    Sha256::digest(password.as_bytes()).to_vec()
}

/// Opaque bearer tokens issued on registration and login. One identity may
/// hold several tokens, one per logged-in client.
#[derive(Default)]
pub struct TokenStore {
    tokens: RwLock<HashMap<String, Identity>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn issue(&self, identity: &Identity) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.tokens
            .write()
            .await
            .insert(token.clone(), identity.clone());
        token
    }

    pub async fn identity_for(&self, token: &str) -> Option<Identity> {
        self.tokens.read().await.get(token).cloned()
    }
}

/// Resolve the authenticated identity from the Authorization header.
pub async fn require_identity(state: &AppState, headers: &HeaderMap) -> Result<Identity, AppError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;

    state
        .tokens
        .identity_for(token)
        .await
        .ok_or_else(|| AppError::Unauthorized("invalid or expired token".into()))
}
