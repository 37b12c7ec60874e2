use thiserror::Error;

use crate::drawing::DrawingId;

/// Errors surfaced by the session engine and its persistence boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The identity lacks the grant required for this drawing.
    #[error("identity lacks the required grant for drawing {0}")]
    Unauthorized(DrawingId),

    /// The drawing id does not exist.
    #[error("unknown drawing {0}")]
    NotFound(DrawingId),

    /// Malformed operation payload; the working canvas is untouched.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The snapshot store failed; edits stay in memory and are retried.
    #[error("snapshot store unavailable: {0}")]
    StoreUnavailable(String),
}
