use std::io::Write;

use serde::Serialize;

use crate::bbox::BoundingBox;
use crate::tracker::FramePosition;

/// One line of the position output
#[derive(Debug, Serialize)]
pub struct PositionRecord {
    pub frame_index: usize,
    /// Box center, null for frames before any tracking
    pub position: Option<[f64; 2]>,
    pub bbox: Option<BoundingBox>,
}

impl From<&FramePosition> for PositionRecord {
    fn from(p: &FramePosition) -> Self {
        PositionRecord {
            frame_index: p.frame_index,
            position: p.center.map(|c| [c.x, c.y]),
            bbox: p.bbox,
        }
    }
}

/// Writes positions as JSON lines
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write(&mut self, position: &FramePosition) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, &PositionRecord::from(position))?;
        self.writer.write_all(b"\n")
    }

    pub fn into_inner(mut self) -> std::io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
