use thiserror::Error;

/// Errors that abort a tracking run or reject its setup.
#[derive(Debug, Error)]
pub enum TrackError {
    /// The frame source failed to produce the frame with this index.
    /// There is no recovery from a gap in the sequence.
    #[error("failed to acquire frame {index}")]
    FrameAcquisition {
        index: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid bounding box ({min_x}, {min_y}, {max_x}, {max_y})")]
    InvalidBox {
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to write positions")]
    Output(#[from] std::io::Error),
}

/// The correspondence oracle could not process a point set at all.
/// Callers treat every point of the failed call as lost.
#[derive(Debug, Error)]
pub enum CorrespondenceError {
    #[error("frame sizes differ: {from:?} vs {to:?}")]
    FrameSizeMismatch {
        from: [usize; 2],
        to: [usize; 2],
    },

    #[error("pyramid has {got} levels, {expected} required")]
    MissingLevels { expected: usize, got: usize },
}
