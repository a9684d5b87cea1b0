use ndarray as nd;
use tracing::debug;

use crate::config::DetectorConfig;
use crate::image::Image;
use crate::my_types::*;

/// A detected corner and its response
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KeyPoint {
    pub point: Vector2d,
    pub response: f64,
}

/// Pixels where detection is allowed, indexed `[y, x]`.
#[derive(Clone, Debug)]
pub struct ExclusionMask {
    allowed: nd::Array2<bool>,
}

impl ExclusionMask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            allowed: nd::Array2::from_elem((height, width), true),
        }
    }

    /// Block a filled disc of `radius` around every tip. Tips are truncated
    /// to whole pixels first.
    pub fn from_tips(width: usize, height: usize, tips: &[Vector2d], radius: i32) -> Self {
        let mut mask = Self::new(width, height);
        for tip in tips {
            mask.block_disc(tip.x as i64, tip.y as i64, radius as i64);
        }
        mask
    }

    fn block_disc(&mut self, cx: i64, cy: i64, radius: i64) {
        let (height, width) = self.allowed.dim();
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy > radius * radius {
                    continue;
                }
                let (x, y) = (cx + dx, cy + dy);
                if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
                    continue;
                }
                self.allowed[[y as usize, x as usize]] = false;
            }
        }
    }

    /// Pixels outside the mask are allowed.
    pub fn allows(&self, x: usize, y: usize) -> bool {
        self.allowed.get([y, x]).copied().unwrap_or(true)
    }

    pub fn blocked_count(&self) -> usize {
        self.allowed.iter().filter(|a| !**a).count()
    }
}

/// Finds points that are worth tracking.
pub trait FeatureDetector {
    /// Candidate points ranked best first. Never more than
    /// `params.max_corners`, none closer than `params.min_distance` to a
    /// better one and none on a pixel the mask blocks.
    fn detect(
        &mut self,
        image: &Image,
        mask: Option<&ExclusionMask>,
        params: &DetectorConfig,
    ) -> Vec<KeyPoint>;
}

/// Shi-Tomasi corner detector, the corner response is the smaller
/// eigenvalue of the structure tensor summed over a block.
#[derive(Debug, Default)]
pub struct ShiTomasi {
    response: nd::Array2<f64>,
}

impl ShiTomasi {
    pub fn new() -> Self {
        Self::default()
    }

    fn compute_response(&mut self, image: &Image, block_size: usize) {
        let (w, h) = (image.width, image.height);

        // Integral images of the structure tensor entries
        let mut sxx = nd::Array2::<f64>::zeros((h + 1, w + 1));
        let mut syy = nd::Array2::<f64>::zeros((h + 1, w + 1));
        let mut sxy = nd::Array2::<f64>::zeros((h + 1, w + 1));
        for y in 0..h {
            for x in 0..w {
                let (gx, gy) = sobel(image, x as i64, y as i64);
                sxx[[y + 1, x + 1]] = gx * gx + sxx[[y, x + 1]] + sxx[[y + 1, x]] - sxx[[y, x]];
                syy[[y + 1, x + 1]] = gy * gy + syy[[y, x + 1]] + syy[[y + 1, x]] - syy[[y, x]];
                sxy[[y + 1, x + 1]] = gx * gy + sxy[[y, x + 1]] + sxy[[y + 1, x]] - sxy[[y, x]];
            }
        }

        let box_sum = |s: &nd::Array2<f64>, x0: usize, y0: usize, x1: usize, y1: usize| {
            s[[y1, x1]] - s[[y0, x1]] - s[[y1, x0]] + s[[y0, x0]]
        };

        let before = block_size / 2;
        let after = block_size - before;
        self.response = nd::Array2::zeros((h, w));
        for y in 0..h {
            let y0 = y.saturating_sub(before);
            let y1 = usize::min(y + after, h);
            for x in 0..w {
                let x0 = x.saturating_sub(before);
                let x1 = usize::min(x + after, w);
                let a = box_sum(&sxx, x0, y0, x1, y1);
                let c = box_sum(&syy, x0, y0, x1, y1);
                let b = box_sum(&sxy, x0, y0, x1, y1);
                let min_eig = ((a + c) - ((a - c).powi(2) + 4. * b * b).sqrt()) / 2.;
                self.response[[y, x]] = f64::max(min_eig, 0.);
            }
        }
    }
}

impl FeatureDetector for ShiTomasi {
    fn detect(
        &mut self,
        image: &Image,
        mask: Option<&ExclusionMask>,
        params: &DetectorConfig,
    ) -> Vec<KeyPoint> {
        if image.width < 3 || image.height < 3 {
            return vec![];
        }
        self.compute_response(image, params.block_size);
        let allowed = |x: usize, y: usize| mask.map_or(true, |m| m.allows(x, y));

        let mut best = 0_f64;
        for ((y, x), r) in self.response.indexed_iter() {
            if allowed(x, y) && *r > best {
                best = *r;
            }
        }
        if best <= 0. {
            debug!("no corner response in the allowed area");
            return vec![];
        }
        let threshold = best * params.quality_level;

        // Local maxima above the threshold, one pixel border skipped
        let mut candidates = vec![];
        for y in 1..image.height - 1 {
            for x in 1..image.width - 1 {
                let r = self.response[[y, x]];
                if r < threshold || r <= 0. || !allowed(x, y) {
                    continue;
                }
                let window = self.response.slice(nd::s![y - 1..y + 2, x - 1..x + 2]);
                if window.iter().all(|v| *v <= r) {
                    candidates.push(KeyPoint {
                        point: Vector2d::new(x as f64, y as f64),
                        response: r,
                    });
                }
            }
        }
        candidates.sort_by(|a, b| b.response.total_cmp(&a.response));

        let min_distance2 = params.min_distance.powi(2);
        let mut corners: Vec<KeyPoint> = vec![];
        for candidate in candidates {
            if corners.len() >= params.max_corners {
                break;
            }
            let crowded = corners
                .iter()
                .any(|c| (c.point - candidate.point).norm_squared() < min_distance2);
            if !crowded {
                corners.push(candidate);
            }
        }
        corners
    }
}

/// 3x3 Sobel derivative with replicated borders
fn sobel(image: &Image, x: i64, y: i64) -> (f64, f64) {
    let v = |dx: i64, dy: i64| image.value_clamped(x + dx, y + dy) as f64;
    let gx = (v(1, -1) + 2. * v(1, 0) + v(1, 1)) - (v(-1, -1) + 2. * v(-1, 0) + v(-1, 1));
    let gy = (v(-1, 1) + 2. * v(0, 1) + v(1, 1)) - (v(-1, -1) + 2. * v(0, -1) + v(1, -1));
    (gx, gy)
}
