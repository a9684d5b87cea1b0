use std::str::FromStr;

use serde::Serialize;
use tracing::trace;

use crate::error::TrackError;
use crate::my_types::*;

/// Axis aligned box in pixel coordinates.
///
/// After construction and after every [`BoundingBox::update`] the box holds
/// `min_x <= max_x` and `min_y <= max_y`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self, TrackError> {
        let valid = [min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite())
            && min_x <= max_x
            && min_y <= max_y;
        if !valid {
            return Err(TrackError::InvalidBox {
                min_x,
                min_y,
                max_x,
                max_y,
            });
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// Strict membership, points on the border are outside.
    pub fn contains(&self, point: &Vector2d) -> bool {
        point.x > self.min_x && point.x < self.max_x && point.y > self.min_y && point.y < self.max_y
    }

    pub fn center(&self) -> Vector2d {
        Vector2d::new(
            (self.min_x + self.max_x) / 2.,
            (self.min_y + self.max_y) / 2.,
        )
    }

    /// Move the box halfway toward the extent of the points inside it,
    /// grown by `buffer` on every side, and round to whole pixels.
    ///
    /// Points outside the box are ignored. When none is inside, the box is
    /// left exactly as it was and `false` is returned.
    pub fn update(&mut self, points: &[Vector2d], buffer: f64) -> bool {
        let mut inside = points.iter().filter(|p| self.contains(p));
        let first = match inside.next() {
            Some(p) => *p,
            None => {
                trace!("no point inside {:?}, keeping box", self);
                return false;
            }
        };

        let (mut lo, mut hi) = (first, first);
        for p in inside {
            lo = lo.inf(p);
            hi = hi.sup(p);
        }

        let raw_min = lo.add_scalar(-buffer);
        let raw_max = hi.add_scalar(buffer);

        self.min_x = smooth(self.min_x, raw_min.x);
        self.min_y = smooth(self.min_y, raw_min.y);
        self.max_x = smooth(self.max_x, raw_max.x);
        self.max_y = smooth(self.max_y, raw_max.y);

        // Holds for any buffer >= 0: the raw extent contains the points,
        // which were inside the old box, and rounding is monotone.
        debug_assert!(self.min_x <= self.max_x && self.min_y <= self.max_y);
        true
    }
}

fn smooth(old: f64, raw: f64) -> f64 {
    ((old + raw) / 2.).round()
}

impl FromStr for BoundingBox {
    type Err = TrackError;

    /// Parse `min_x,min_y,max_x,max_y`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TrackError::InvalidConfig(format!("bounding box {s:?}: {e}")))?;
        match values[..] {
            [min_x, min_y, max_x, max_y] => BoundingBox::new(min_x, min_y, max_x, max_y),
            _ => Err(TrackError::InvalidConfig(format!(
                "bounding box {s:?} must have four comma separated values"
            ))),
        }
    }
}
