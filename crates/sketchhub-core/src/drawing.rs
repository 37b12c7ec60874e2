use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authenticated user identity (username).
pub type Identity = String;

/// Stable identifier of a drawing.
pub type DrawingId = Uuid;

/// Identifier of one live connection to the engine.
pub type ConnectionId = Uuid;

/// Drawing metadata. The canvas pixels themselves live in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drawing {
    pub id: DrawingId,
    pub title: String,
    pub description: String,
    /// Public drawings are viewable by anyone, editable only by the
    /// owner and collaborators.
    pub public: bool,
    pub owner: Identity,
}
