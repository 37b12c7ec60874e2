use serde::{Deserialize, Serialize};

use crate::drawing::DrawingId;
use crate::op::DrawOp;

/// Frames a connection sends over the drawing transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Submit one edit operation.
    Op { op: DrawOp },
    /// Ask the session to persist the working canvas now.
    Checkpoint,
}

/// Frames the engine pushes to an attached connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame after attach: the current working canvas.
    Welcome {
        drawing_id: DrawingId,
        #[serde(with = "crate::b64")]
        canvas: Vec<u8>,
    },
    /// An operation accepted from another connection.
    Op { op: DrawOp },
    /// A refused operation or session-level failure; connection stays open.
    Error { message: String },
}
