use std::str::FromStr;

use crate::bbox::BoundingBox;
use crate::error::TrackError;

/// How the points used for the box update are obtained each frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Track detected points from frame to frame with optical flow
    Flow,
    /// Detect a fresh point set on every frame, nothing carried over
    Redetect,
}

impl FromStr for Strategy {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flow" => Ok(Strategy::Flow),
            "redetect" => Ok(Strategy::Redetect),
            _ => Err(TrackError::InvalidConfig(format!(
                "unknown strategy {s:?}, expected \"flow\" or \"redetect\""
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, clap::Args)]
pub struct TrackerConfig {
    /// Detect new features every this many frames
    #[clap(long, default_value = "5")]
    pub detect_interval: usize,

    /// Forward-backward error a point must stay strictly below
    #[clap(long, default_value = "1.0")]
    pub consistency_threshold: f64,

    /// Margin added around the in-box points before smoothing
    #[clap(long, default_value = "40")]
    pub buffer: f64,

    /// Radius around tracked points where no new feature is detected
    #[clap(long, default_value = "5")]
    pub mask_radius: i32,

    /// min_x,min_y,max_x,max_y
    #[clap(long, default_value = "5,160,50,195", allow_hyphen_values = true)]
    pub initial_box: BoundingBox,

    /// flow | redetect
    #[clap(long, default_value = "flow")]
    pub strategy: Strategy,

    /// Feature count per frame for the redetect strategy
    #[clap(long, default_value = "40")]
    pub redetect_features: usize,

    #[clap(flatten)]
    pub detector: DetectorConfig,

    #[clap(flatten)]
    pub flow: FlowConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            detect_interval: 5,
            consistency_threshold: 1.0,
            buffer: 40.,
            mask_radius: 5,
            initial_box: BoundingBox {
                min_x: 5.,
                min_y: 160.,
                max_x: 50.,
                max_y: 195.,
            },
            strategy: Strategy::Flow,
            redetect_features: 40,
            detector: DetectorConfig::default(),
            flow: FlowConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), TrackError> {
        let invalid = |msg: &str| Err(TrackError::InvalidConfig(msg.to_string()));
        if self.detect_interval == 0 {
            return invalid("detect interval must be at least 1");
        }
        if !(self.consistency_threshold > 0.) {
            return invalid("consistency threshold must be positive");
        }
        // a negative buffer could shrink the box past itself
        if !(self.buffer >= 0.) || !self.buffer.is_finite() {
            return invalid("buffer must be a non-negative number");
        }
        if self.mask_radius < 0 {
            return invalid("mask radius must not be negative");
        }
        if self.redetect_features == 0 {
            return invalid("redetect feature count must be at least 1");
        }
        BoundingBox::new(
            self.initial_box.min_x,
            self.initial_box.min_y,
            self.initial_box.max_x,
            self.initial_box.max_y,
        )?;
        self.detector.validate()?;
        self.flow.validate()
    }
}

/// Parameters of the corner detector
#[derive(Clone, Debug, PartialEq, clap::Args)]
pub struct DetectorConfig {
    /// Maximum number of corners returned per detection
    #[clap(long, default_value = "20")]
    pub max_corners: usize,

    /// Minimal accepted corner quality relative to the best corner
    #[clap(long, default_value = "0.5")]
    pub quality_level: f64,

    /// Minimal distance between returned corners
    #[clap(long, default_value = "7")]
    pub min_distance: f64,

    /// Side of the window the structure tensor is summed over
    #[clap(long, default_value = "10")]
    pub block_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_corners: 20,
            quality_level: 0.5,
            min_distance: 7.,
            block_size: 10,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), TrackError> {
        if self.max_corners == 0 {
            return Err(TrackError::InvalidConfig("max corners must be at least 1".into()));
        }
        if !(self.quality_level > 0. && self.quality_level <= 1.) {
            return Err(TrackError::InvalidConfig("quality level must be in (0, 1]".into()));
        }
        if !(self.min_distance >= 0.) {
            return Err(TrackError::InvalidConfig("min distance must not be negative".into()));
        }
        if self.block_size == 0 {
            return Err(TrackError::InvalidConfig("block size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Parameters of the pyramidal Lucas-Kanade optical flow
#[derive(Clone, Debug, PartialEq, clap::Args)]
pub struct FlowConfig {
    /// Side of the square integration window, odd
    #[clap(long, default_value = "15")]
    pub lk_win_size: usize,

    /// Number of downscaled pyramid levels used on top of the full image
    #[clap(long, default_value = "2")]
    pub lk_levels: usize,

    /// Iteration cap per pyramid level
    #[clap(long, default_value = "10")]
    pub lk_iters: usize,

    /// Iteration stops once the update is shorter than this
    #[clap(long, default_value = "0.03")]
    pub lk_term: f64,

    /// Points are not tracked when the smaller structure tensor eigenvalue,
    /// averaged over the window pixels, is below this
    #[clap(long, default_value = "1e-4")]
    pub lk_min_eig: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            lk_win_size: 15,
            lk_levels: 2,
            lk_iters: 10,
            lk_term: 0.03,
            lk_min_eig: 1e-4,
        }
    }
}

impl FlowConfig {
    pub fn validate(&self) -> Result<(), TrackError> {
        if self.lk_win_size < 3 || self.lk_win_size % 2 == 0 {
            return Err(TrackError::InvalidConfig("window size must be odd and at least 3".into()));
        }
        if self.lk_iters == 0 {
            return Err(TrackError::InvalidConfig("iteration count must be at least 1".into()));
        }
        if !(self.lk_term > 0.) {
            return Err(TrackError::InvalidConfig("termination epsilon must be positive".into()));
        }
        Ok(())
    }
}
