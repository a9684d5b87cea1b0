use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, instrument};

use crate::bbox::BoundingBox;
use crate::config::TrackerConfig;
use crate::dataset::FrameSource;
use crate::error::TrackError;
use crate::frame::Frame;
use crate::my_types::*;
use crate::supplier::PointSupplier;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    AwaitingFirstFrame,
    Tracking,
    Finished,
}

/// What the tracker reports for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FramePosition {
    pub frame_index: usize,
    /// Box center, `None` until the first tracking step
    pub center: Option<Vector2d>,
    pub bbox: Option<BoundingBox>,
}

/// State of one tracking run: the box, the detection schedule, the frame
/// counter and the point supplier with everything it carries between
/// frames.
pub struct Tracker<S> {
    supplier: S,
    bbox: BoundingBox,
    buffer: f64,
    detect_interval: usize,
    frame_index: usize,
    phase: Phase,
    // a tracking step has produced points at least once
    tracking_started: bool,
}

impl<S: PointSupplier> Tracker<S> {
    pub fn new(config: &TrackerConfig, supplier: S) -> Result<Self, TrackError> {
        config.validate()?;
        Ok(Self {
            supplier,
            bbox: config.initial_box,
            buffer: config.buffer,
            detect_interval: config.detect_interval,
            frame_index: 0,
            phase: Phase::AwaitingFirstFrame,
            tracking_started: false,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn supplier(&self) -> &S {
        &self.supplier
    }

    /// Whether new features are detected on the frame with this index.
    pub fn is_detection_frame(&self, frame_index: usize) -> bool {
        frame_index % self.detect_interval == 0
    }

    /// Process the next frame of the sequence.
    #[instrument(skip_all, fields(frame = self.frame_index))]
    pub fn step(&mut self, frame: &Frame) -> FramePosition {
        if self.phase == Phase::AwaitingFirstFrame {
            self.phase = Phase::Tracking;
        }

        if let Some(points) = self.supplier.observe(frame) {
            self.tracking_started = true;
            if self.bbox.update(&points, self.buffer) {
                debug!("box moved to {:?}", self.bbox);
            }
        }

        let position = FramePosition {
            frame_index: self.frame_index,
            center: self.tracking_started.then(|| self.bbox.center()),
            bbox: self.tracking_started.then_some(self.bbox),
        };

        if self.is_detection_frame(self.frame_index) {
            self.supplier.replenish(frame);
        }

        self.frame_index += 1;
        position
    }

    /// Pull frames from `source` until it is exhausted or `cancel` is set,
    /// handing every frame's position to `sink`. Returns the number of
    /// frames processed.
    pub fn run<F, K>(
        &mut self,
        source: &mut F,
        cancel: &AtomicBool,
        mut sink: K,
    ) -> Result<usize, TrackError>
    where
        F: FrameSource + ?Sized,
        K: FnMut(&FramePosition) -> Result<(), TrackError>,
    {
        let mut processed = 0;
        let result = loop {
            if cancel.load(Ordering::Relaxed) {
                info!("cancelled after {} frames", processed);
                break Ok(processed);
            }
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break Ok(processed),
                Err(err) => break Err(err),
            };
            let position = self.step(&frame);
            processed += 1;
            if let Err(err) = sink(&position) {
                break Err(err);
            }
        };
        self.phase = Phase::Finished;
        result
    }
}
