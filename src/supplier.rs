use tracing::{debug, trace, warn};

use crate::config::{DetectorConfig, TrackerConfig};
use crate::detector::{ExclusionMask, FeatureDetector};
use crate::feature::TrajectoryStore;
use crate::frame::{Frame, PyramidFrame};
use crate::my_types::*;
use crate::optical_flow::CorrespondenceOracle;
use crate::validator;

pub trait PointSupplier {
    /// Points observed on `frame`, `None` when no tracking happened on it
    /// (nothing to follow yet).
    fn observe(&mut self, frame: &Frame) -> Option<Vec<Vector2d>>;

    /// Look for new points on `frame`. Called after the box update of a
    /// frame, on detection frames only.
    fn replenish(&mut self, _frame: &Frame) {}
}

/// Follows detected points from frame to frame with a correspondence
/// oracle and keeps only those that pass the forward-backward check.
pub struct FlowSupplier<O, D> {
    oracle: O,
    detector: D,
    detector_params: DetectorConfig,
    consistency_threshold: f64,
    mask_radius: i32,
    store: TrajectoryStore,
    previous: Option<PyramidFrame>,
    /// Buffers of a frame no longer needed, reused for the next one
    spare: Option<PyramidFrame>,
}

impl<O: CorrespondenceOracle, D: FeatureDetector> FlowSupplier<O, D> {
    pub fn new(config: &TrackerConfig, oracle: O, detector: D) -> Self {
        Self {
            oracle,
            detector,
            detector_params: config.detector.clone(),
            consistency_threshold: config.consistency_threshold,
            mask_radius: config.mask_radius,
            store: TrajectoryStore::new(),
            previous: None,
            spare: None,
        }
    }

    pub fn trajectories(&self) -> &TrajectoryStore {
        &self.store
    }

    fn track(&mut self, previous: &PyramidFrame, current: &PyramidFrame) {
        let tips = self.store.tips();
        let ids: Vec<TrackId> = tips.iter().map(|f| f.id).collect();
        let seeds: Vec<Vector2d> = tips.iter().map(|f| f.point).collect();

        let forward = match self.oracle.correspond(previous, current, &seeds) {
            Ok(forward) => forward,
            Err(err) => {
                warn!("forward correspondence failed, dropping {} points: {}", ids.len(), err);
                self.store.remove_all(&ids);
                return;
            }
        };

        // Map back only the points that made it forward
        let (indices, points): (Vec<usize>, Vec<Vector2d>) = forward
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.map(|p| (i, p)))
            .unzip();
        let mut backward = vec![None; seeds.len()];
        match self.oracle.correspond(current, previous, &points) {
            Ok(results) => {
                for (i, p) in indices.into_iter().zip(results) {
                    backward[i] = p;
                }
            }
            Err(err) => warn!("backward correspondence failed: {}", err),
        }

        let verdicts = validator::validate(&seeds, &forward, &backward, self.consistency_threshold);
        let kept = verdicts.iter().filter(|v| v.is_some()).count();
        trace!("kept {} of {} points", kept, seeds.len());
        self.store.apply(&ids, &verdicts);
    }
}

impl<O: CorrespondenceOracle, D: FeatureDetector> PointSupplier for FlowSupplier<O, D> {
    fn observe(&mut self, frame: &Frame) -> Option<Vec<Vector2d>> {
        let levels = self.oracle.pyramid_levels();
        let current = match PyramidFrame::new(&frame.image, levels, self.spare.take()) {
            Ok(current) => current,
            Err(err) => {
                warn!("frame {} unusable for tracking: {:#}", frame.index, err);
                self.store.clear();
                self.previous = None;
                return None;
            }
        };

        let observed = match self.previous.take() {
            Some(previous) if !self.store.is_empty() => {
                self.track(&previous, &current);
                self.spare = Some(previous);
                Some(self.store.tip_points())
            }
            previous => {
                self.spare = previous;
                None
            }
        };
        self.previous = Some(current);
        observed
    }

    fn replenish(&mut self, frame: &Frame) {
        let tips = self.store.tip_points();
        let mask = ExclusionMask::from_tips(
            frame.image.width,
            frame.image.height,
            &tips,
            self.mask_radius,
        );
        let found = self
            .detector
            .detect(&frame.image, Some(&mask), &self.detector_params);
        if found.is_empty() {
            debug!("no new features on frame {}", frame.index);
        }
        for keypoint in &found {
            self.store.insert(keypoint.point, frame.index);
        }
        debug!(
            "detected {} features on frame {}, tracking {}",
            found.len(),
            frame.index,
            self.store.len()
        );
    }
}

/// Detects a new point set on every frame, nothing is carried between
/// frames.
pub struct RedetectSupplier<D> {
    detector: D,
    detector_params: DetectorConfig,
}

impl<D: FeatureDetector> RedetectSupplier<D> {
    pub fn new(config: &TrackerConfig, detector: D) -> Self {
        Self {
            detector,
            detector_params: DetectorConfig {
                max_corners: config.redetect_features,
                ..config.detector.clone()
            },
        }
    }
}

impl<D: FeatureDetector> PointSupplier for RedetectSupplier<D> {
    fn observe(&mut self, frame: &Frame) -> Option<Vec<Vector2d>> {
        let found = self
            .detector
            .detect(&frame.image, None, &self.detector_params);
        trace!("detected {} features on frame {}", found.len(), frame.index);
        // whole pixels, like the membership test of the stateless tracker
        Some(found.iter().map(|k| k.point.map(f64::trunc)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::KeyPoint;
    use crate::error::CorrespondenceError;
    use crate::image::Image;

    /// Moves every point by a fixed offset, `drift` is added on the way back
    struct ShiftOracle {
        shift: Vector2d,
        drift: Vector2d,
        forward: bool,
        fail: bool,
        fail_backward: bool,
    }

    impl ShiftOracle {
        fn new(shift: Vector2d) -> Self {
            Self {
                shift,
                drift: Vector2d::zeros(),
                forward: true,
                fail: false,
                fail_backward: false,
            }
        }
    }

    impl CorrespondenceOracle for ShiftOracle {
        fn correspond(
            &mut self,
            _from: &PyramidFrame,
            _to: &PyramidFrame,
            points: &[Vector2d],
        ) -> Result<Vec<Option<Vector2d>>, CorrespondenceError> {
            let forward = self.forward;
            self.forward = !forward;
            if self.fail || (self.fail_backward && !forward) {
                return Err(CorrespondenceError::MissingLevels { expected: 1, got: 0 });
            }
            let offset = if forward {
                self.shift
            } else {
                -self.shift + self.drift
            };
            Ok(points.iter().map(|p| Some(p + offset)).collect())
        }
    }

    /// Returns the same points every time, remembers the masks it got
    struct FixedDetector {
        points: Vec<Vector2d>,
        masks: Vec<Option<ExclusionMask>>,
    }

    impl FeatureDetector for FixedDetector {
        fn detect(
            &mut self,
            _image: &Image,
            mask: Option<&ExclusionMask>,
            params: &DetectorConfig,
        ) -> Vec<KeyPoint> {
            self.masks.push(mask.cloned());
            self.points
                .iter()
                .filter(|p| mask.map_or(true, |m| m.allows(p.x as usize, p.y as usize)))
                .take(params.max_corners)
                .map(|p| KeyPoint { point: *p, response: 1. })
                .collect()
        }
    }

    fn frame(index: usize) -> Frame {
        Frame {
            index,
            image: Image::filled(64, 48, 0),
        }
    }

    fn supplier(oracle: ShiftOracle, points: Vec<Vector2d>) -> FlowSupplier<ShiftOracle, FixedDetector> {
        let detector = FixedDetector {
            points,
            masks: vec![],
        };
        FlowSupplier::new(&TrackerConfig::default(), oracle, detector)
    }

    #[test]
    fn test_follows_detected_points() {
        let mut s = supplier(
            ShiftOracle::new(Vector2d::new(2., 1.)),
            vec![Vector2d::new(10., 10.), Vector2d::new(30., 20.)],
        );
        assert_eq!(s.observe(&frame(0)), None);
        s.replenish(&frame(0));
        assert_eq!(s.trajectories().len(), 2);

        let points = s.observe(&frame(1)).unwrap();
        assert_eq!(points, vec![Vector2d::new(12., 11.), Vector2d::new(32., 21.)]);
        let points = s.observe(&frame(2)).unwrap();
        assert_eq!(points, vec![Vector2d::new(14., 12.), Vector2d::new(34., 22.)]);
        for tip in s.trajectories().tips() {
            assert_eq!(s.trajectories().get(tip.id).unwrap().len(), 3);
        }
    }

    #[test]
    fn test_inconsistent_points_dropped() {
        let mut oracle = ShiftOracle::new(Vector2d::new(2., 1.));
        // exactly on the threshold
        oracle.drift = Vector2d::new(0., 1.);
        let mut s = supplier(oracle, vec![Vector2d::new(10., 10.)]);
        s.observe(&frame(0));
        s.replenish(&frame(0));
        assert_eq!(s.observe(&frame(1)), Some(vec![]));
        assert!(s.trajectories().is_empty());
    }

    #[test]
    fn test_oracle_failure_drops_all() {
        let mut oracle = ShiftOracle::new(Vector2d::new(1., 1.));
        oracle.fail = true;
        let mut s = supplier(oracle, vec![Vector2d::new(10., 10.), Vector2d::new(20., 20.)]);
        s.observe(&frame(0));
        s.replenish(&frame(0));
        assert_eq!(s.observe(&frame(1)), Some(vec![]));
        assert!(s.trajectories().is_empty());
    }

    #[test]
    fn test_backward_failure_rejects_forward_points() {
        let mut oracle = ShiftOracle::new(Vector2d::new(1., 1.));
        oracle.fail_backward = true;
        let mut s = supplier(oracle, vec![Vector2d::new(10., 10.), Vector2d::new(20., 20.)]);
        s.observe(&frame(0));
        s.replenish(&frame(0));
        assert_eq!(s.observe(&frame(1)), Some(vec![]));
        assert!(s.trajectories().is_empty());
    }

    #[test]
    fn test_replenish_masks_tracked_points() {
        let mut s = supplier(
            ShiftOracle::new(Vector2d::zeros()),
            vec![Vector2d::new(10., 10.), Vector2d::new(30., 20.)],
        );
        s.observe(&frame(0));
        s.replenish(&frame(0));
        s.observe(&frame(1));
        s.replenish(&frame(1));

        // the second detection sees both points blocked and adds nothing
        assert_eq!(s.trajectories().len(), 2);
        let mask = s.detector.masks[1].as_ref().unwrap();
        assert!(!mask.allows(10, 10));
        assert!(!mask.allows(30, 25));
        assert!(mask.allows(30, 26));
    }

    #[test]
    fn test_redetect_truncates() {
        let detector = FixedDetector {
            points: vec![Vector2d::new(10.7, 3.2), Vector2d::new(5.5, 9.9)],
            masks: vec![],
        };
        let mut s = RedetectSupplier::new(&TrackerConfig::default(), detector);
        let points = s.observe(&frame(0)).unwrap();
        assert_eq!(points, vec![Vector2d::new(10., 3.), Vector2d::new(5., 9.)]);
        assert!(s.detector.masks[0].is_none());
        assert_eq!(s.detector_params.max_corners, 40);
    }
}
