use crate::error::EngineError;
use crate::op::DrawOp;

pub const CANVAS_WIDTH: usize = 512;
pub const CANVAS_HEIGHT: usize = 512;
pub const CANVAS_CHANNELS: usize = 3;

/// Exact byte length of a serialized canvas.
pub const CANVAS_BYTES: usize = CANVAS_WIDTH * CANVAS_HEIGHT * CANVAS_CHANNELS;

/// In-memory working state of one drawing: row-major RGB raster, white on
/// creation. A flushed snapshot is exactly `as_bytes()`, so flush-then-load
/// is the identity on canvas bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    pixels: Vec<u8>,
}

impl Canvas {
    pub fn new() -> Self {
        Self {
            pixels: vec![0xFF; CANVAS_BYTES],
        }
    }

    /// Reconstruct a canvas from persisted snapshot bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, EngineError> {
        if bytes.len() != CANVAS_BYTES {
            return Err(EngineError::StoreUnavailable(format!(
                "snapshot blob is {} bytes, expected {}",
                bytes.len(),
                CANVAS_BYTES
            )));
        }
        Ok(Self { pixels: bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.pixels.clone()
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * CANVAS_WIDTH + x) * CANVAS_CHANNELS;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }

    /// Apply a validated operation. A rejected operation leaves the canvas
    /// untouched.
    pub fn apply(&mut self, op: &DrawOp) -> Result<(), EngineError> {
        op.validate()?;
        match op {
            DrawOp::Stroke {
                points,
                color,
                size,
            } => {
                for p in points {
                    self.paint_square(p.x as usize, p.y as usize, *size as usize, *color);
                }
            }
            DrawOp::Clear { color } => {
                for px in self.pixels.chunks_exact_mut(CANVAS_CHANNELS) {
                    px.copy_from_slice(color);
                }
            }
        }
        Ok(())
    }

    fn paint_square(&mut self, cx: usize, cy: usize, size: usize, color: [u8; 3]) {
        let half = size / 2;
        let x0 = cx.saturating_sub(half);
        let y0 = cy.saturating_sub(half);
        let x1 = (cx + half).min(CANVAS_WIDTH - 1);
        let y1 = (cy + half).min(CANVAS_HEIGHT - 1);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let i = (y * CANVAS_WIDTH + x) * CANVAS_CHANNELS;
                self.pixels[i..i + CANVAS_CHANNELS].copy_from_slice(&color);
            }
        }
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Point;

    #[test]
    fn new_canvas_is_white() {
        let canvas = Canvas::new();
        assert_eq!(canvas.as_bytes().len(), CANVAS_BYTES);
        assert_eq!(canvas.pixel(0, 0), [0xFF, 0xFF, 0xFF]);
        assert_eq!(canvas.pixel(511, 511), [0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn stroke_paints_pixels() {
        let mut canvas = Canvas::new();
        canvas
            .apply(&DrawOp::Stroke {
                points: vec![Point { x: 10, y: 10 }],
                color: [1, 2, 3],
                size: 3,
            })
            .unwrap();
        assert_eq!(canvas.pixel(10, 10), [1, 2, 3]);
        assert_eq!(canvas.pixel(9, 11), [1, 2, 3]);
        assert_eq!(canvas.pixel(12, 10), [0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn brush_clamps_at_edges() {
        let mut canvas = Canvas::new();
        canvas
            .apply(&DrawOp::Stroke {
                points: vec![Point { x: 0, y: 0 }, Point { x: 511, y: 511 }],
                color: [0, 0, 0],
                size: 8,
            })
            .unwrap();
        assert_eq!(canvas.pixel(0, 0), [0, 0, 0]);
        assert_eq!(canvas.pixel(511, 511), [0, 0, 0]);
    }

    #[test]
    fn clear_fills_everything() {
        let mut canvas = Canvas::new();
        canvas.apply(&DrawOp::Clear { color: [7, 8, 9] }).unwrap();
        assert_eq!(canvas.pixel(0, 0), [7, 8, 9]);
        assert_eq!(canvas.pixel(300, 200), [7, 8, 9]);
    }

    #[test]
    fn invalid_op_leaves_canvas_untouched() {
        let mut canvas = Canvas::new();
        let before = canvas.to_vec();
        let result = canvas.apply(&DrawOp::Stroke {
            points: vec![Point { x: 9999, y: 0 }],
            color: [0, 0, 0],
            size: 1,
        });
        assert!(result.is_err());
        assert_eq!(canvas.to_vec(), before);
    }

    #[test]
    fn byte_roundtrip_is_identity() {
        let mut canvas = Canvas::new();
        canvas
            .apply(&DrawOp::Stroke {
                points: vec![Point { x: 42, y: 42 }],
                color: [10, 20, 30],
                size: 5,
            })
            .unwrap();
        let restored = Canvas::from_bytes(canvas.to_vec()).unwrap();
        assert_eq!(restored, canvas);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        assert!(matches!(
            Canvas::from_bytes(vec![0; 100]),
            Err(EngineError::StoreUnavailable(_))
        ));
    }
}
