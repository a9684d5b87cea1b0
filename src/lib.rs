pub mod bbox;
pub mod config;
pub mod dataset;
pub mod detector;
pub mod error;
pub mod feature;
pub mod frame;
pub mod image;
pub mod my_types;
pub mod optical_flow;
pub mod output;
pub mod pyramid;
pub mod supplier;
pub mod synthetic;
pub mod tracker;
pub mod validator;

pub use bbox::BoundingBox;
pub use config::{DetectorConfig, FlowConfig, Strategy, TrackerConfig};
pub use dataset::{FrameSource, ImageSequence, IterSource};
pub use detector::{ExclusionMask, FeatureDetector, KeyPoint, ShiTomasi};
pub use error::{CorrespondenceError, TrackError};
pub use frame::Frame;
pub use optical_flow::{CorrespondenceOracle, OpticalFlow};
pub use supplier::{FlowSupplier, PointSupplier, RedetectSupplier};
pub use synthetic::SyntheticSequence;
pub use tracker::{FramePosition, Phase, Tracker};
