use serde::{Deserialize, Serialize};

use crate::canvas::{CANVAS_HEIGHT, CANVAS_WIDTH};
use crate::error::EngineError;

/// Upper bound on the brush square side length.
pub const MAX_BRUSH_SIZE: u32 = 64;

/// Upper bound on points carried by a single stroke.
pub const MAX_STROKE_POINTS: usize = 4096;

/// A single canvas coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// One edit operation submitted by a connection.
///
/// Operations are opaque to the transport; the session validates and applies
/// them in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DrawOp {
    /// Paint a square brush of `size` at every point, in order.
    Stroke {
        points: Vec<Point>,
        color: [u8; 3],
        size: u32,
    },
    /// Fill the whole canvas with one color.
    Clear { color: [u8; 3] },
}

impl DrawOp {
    /// Parse and validate a raw JSON payload.
    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        let op: DrawOp =
            serde_json::from_str(raw).map_err(|e| EngineError::InvalidOperation(e.to_string()))?;
        op.validate()?;
        Ok(op)
    }

    /// Reject malformed operations before they touch the working canvas.
    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            DrawOp::Stroke {
                points,
                size,
                ..
            } => {
                if points.is_empty() {
                    return Err(EngineError::InvalidOperation("stroke has no points".into()));
                }
                if points.len() > MAX_STROKE_POINTS {
                    return Err(EngineError::InvalidOperation(format!(
                        "stroke carries {} points, limit is {}",
                        points.len(),
                        MAX_STROKE_POINTS
                    )));
                }
                if *size == 0 || *size > MAX_BRUSH_SIZE {
                    return Err(EngineError::InvalidOperation(format!(
                        "brush size {} out of range 1..={}",
                        size, MAX_BRUSH_SIZE
                    )));
                }
                for p in points {
                    if p.x as usize >= CANVAS_WIDTH || p.y as usize >= CANVAS_HEIGHT {
                        return Err(EngineError::InvalidOperation(format!(
                            "point ({}, {}) outside {}x{} canvas",
                            p.x, p.y, CANVAS_WIDTH, CANVAS_HEIGHT
                        )));
                    }
                }
                Ok(())
            }
            DrawOp::Clear { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stroke_payload() {
        let raw = r#"{"kind":"stroke","points":[{"x":1,"y":2}],"color":[0,0,0],"size":4}"#;
        let op = DrawOp::from_json(raw).unwrap();
        assert_eq!(
            op,
            DrawOp::Stroke {
                points: vec![Point { x: 1, y: 2 }],
                color: [0, 0, 0],
                size: 4,
            }
        );
    }

    #[test]
    fn rejects_garbage_payload() {
        assert!(matches!(
            DrawOp::from_json("not json"),
            Err(EngineError::InvalidOperation(_))
        ));
    }

    #[test]
    fn rejects_out_of_bounds_point() {
        let raw = r#"{"kind":"stroke","points":[{"x":512,"y":0}],"color":[0,0,0],"size":1}"#;
        assert!(matches!(
            DrawOp::from_json(raw),
            Err(EngineError::InvalidOperation(_))
        ));
    }

    #[test]
    fn rejects_zero_brush() {
        let op = DrawOp::Stroke {
            points: vec![Point { x: 0, y: 0 }],
            color: [0, 0, 0],
            size: 0,
        };
        assert!(op.validate().is_err());
    }
}
