pub mod b64;
pub mod canvas;
pub mod drawing;
pub mod error;
pub mod message;
pub mod op;
pub mod snapshot;

pub use canvas::{Canvas, CANVAS_BYTES, CANVAS_CHANNELS, CANVAS_HEIGHT, CANVAS_WIDTH};
pub use drawing::{ConnectionId, Drawing, DrawingId, Identity};
pub use error::EngineError;
pub use message::{ClientMessage, ServerMessage};
pub use op::{DrawOp, Point, MAX_BRUSH_SIZE, MAX_STROKE_POINTS};
pub use snapshot::{Snapshot, SnapshotId};
