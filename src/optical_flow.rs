use nalgebra as na;
use tracing::trace;

use crate::config::FlowConfig;
use crate::error::CorrespondenceError;
use crate::frame::PyramidFrame;
use crate::image::*;
use crate::my_types::*;

/// Closed per-axis range of integer offsets around a point, `[x, y]`.
type Range = [[i16; 2]; 2];

/// Maps points of one frame to the corresponding points of another.
pub trait CorrespondenceOracle {
    /// Pyramid levels the frames passed to [`Self::correspond`] must carry.
    fn pyramid_levels(&self) -> usize {
        0
    }

    /// One result per input point, `None` where the point could not be
    /// followed. An `Err` means no point of this call could be processed.
    fn correspond(
        &mut self,
        from: &PyramidFrame,
        to: &PyramidFrame,
        points: &[Vector2d],
    ) -> Result<Vec<Option<Vector2d>>, CorrespondenceError>;
}

/// Scratch buffers for the integration window of one point.
struct Window {
    /// Samples of the reference level, one pixel wider than the window on
    /// every side so the gradients can be taken inside it
    template: Matrixd,
    ix: Matrixd,
    iy: Matrixd,
    /// Temporal difference between template and the moved sample
    it: Matrixd,
}

impl Window {
    fn new(side: usize) -> Window {
        Window {
            template: na::DMatrix::zeros(side + 2, side + 2),
            ix: na::DMatrix::zeros(side, side),
            iy: na::DMatrix::zeros(side, side),
            it: na::DMatrix::zeros(side, side),
        }
    }
}

/// Pyramidal Lucas-Kanade optical flow.
pub struct OpticalFlow {
    lk_iters: usize,
    lk_levels: usize,
    lk_win_size: usize,
    lk_term: f64,
    lk_min_eig: f64,
    window: Window,
}

impl OpticalFlow {
    pub fn new(config: &FlowConfig) -> OpticalFlow {
        OpticalFlow {
            lk_iters: config.lk_iters,
            lk_levels: config.lk_levels,
            lk_win_size: config.lk_win_size,
            lk_term: config.lk_term,
            lk_min_eig: config.lk_min_eig,
            window: Window::new(config.lk_win_size),
        }
    }

    /// Coarse to fine: the displacement found on a level seeds the next
    /// finer one. ref http://robots.stanford.edu/cs223b04/algo_tracking.pdf
    fn follow(&mut self, from: &PyramidFrame, to: &PyramidFrame, point: Vector2d) -> Option<Vector2d> {
        let half = (self.lk_win_size - 1) / 2;
        let term2 = self.lk_term * self.lk_term;

        let mut guess = Vector2d::zeros();
        let mut step = Vector2d::zeros();
        for level in (0..=self.lk_levels).rev() {
            let reference = from.get_image_at_level(level);
            let target = to.get_image_at_level(level);
            let scaled = point / (1u32 << level) as f64;

            let range = integration_range(reference, scaled, half, 1)?;
            let w = &mut self.window;
            fill_grid(reference, padded(range), scaled, &mut w.template);
            scharr(&w.template, &mut w.ix, &mut w.iy);
            let structure = structure_tensor(&w.ix, &w.iy);
            if min_eigenvalue(&structure, w.ix.len()) < self.lk_min_eig {
                return None;
            }
            let inverse = structure.try_inverse()?;

            // Running out of iterations keeps the last estimate.
            step = Vector2d::zeros();
            for _ in 0..self.lk_iters {
                let moved = scaled + guess + step;
                // the window is sampled at the moved position, it has to fit
                if !covers(integration_range(target, moved, half, 0)?, range) {
                    return None;
                }
                fill_grid(target, range, moved, &mut w.it);
                w.it *= -1.;
                let shape = w.it.shape();
                w.it += w.template.view((1, 1), shape);

                let mismatch = Vector2d::new(w.it.dot(&w.ix), w.it.dot(&w.iy));
                let eta = inverse * mismatch;
                step += eta;
                if eta.norm_squared() < term2 {
                    break;
                }
            }

            if level > 0 {
                guess = 2. * (guess + step);
            }
        }

        Some(point + guess + step)
    }
}

impl CorrespondenceOracle for OpticalFlow {
    fn pyramid_levels(&self) -> usize {
        self.lk_levels
    }

    fn correspond(
        &mut self,
        from: &PyramidFrame,
        to: &PyramidFrame,
        points: &[Vector2d],
    ) -> Result<Vec<Option<Vector2d>>, CorrespondenceError> {
        let from_size = [from.image.width, from.image.height];
        let to_size = [to.image.width, to.image.height];
        if from_size != to_size {
            return Err(CorrespondenceError::FrameSizeMismatch {
                from: from_size,
                to: to_size,
            });
        }
        let got = usize::min(from.level_count(), to.level_count());
        if got < self.lk_levels {
            return Err(CorrespondenceError::MissingLevels {
                expected: self.lk_levels,
                got,
            });
        }

        Ok(points
            .iter()
            .map(|&point| {
                let followed = self.follow(from, to, point);
                if followed.is_none() {
                    trace!("lost point at {}, {}", point.x, point.y);
                }
                followed
            })
            .collect())
    }
}

fn padded(range: Range) -> Range {
    range.map(|[lo, hi]| [lo - 1, hi + 1])
}

fn covers(outer: Range, inner: Range) -> bool {
    (0..2).all(|axis| outer[axis][0] <= inner[axis][0] && inner[axis][1] <= outer[axis][1])
}

/// Smaller eigenvalue of the structure tensor per window pixel, so the
/// threshold does not depend on the window size.
fn min_eigenvalue(structure: &Matrix2d, area: usize) -> f64 {
    structure.symmetric_eigenvalues().min() / area as f64
}

/// Sum over the window of the gradient outer products.
fn structure_tensor(ix: &Matrixd, iy: &Matrixd) -> Matrix2d {
    let xy = ix.dot(iy);
    Matrix2d::new(ix.dot(ix), xy, xy, iy.dot(iy))
}

const SCHARR_SMOOTH: [f64; 3] = [3., 10., 3.];

/// Scharr derivatives of the interior of `grid`, normalized to unit slope.
fn scharr(grid: &Matrixd, out_x: &mut Matrixd, out_y: &mut Matrixd) {
    let rows = grid.nrows() - 2;
    let cols = grid.ncols() - 2;
    *out_x = Matrixd::zeros(rows, cols);
    *out_y = Matrixd::zeros(rows, cols);
    for y in 0..rows {
        for x in 0..cols {
            let (mut dx, mut dy) = (0., 0.);
            for (k, w) in SCHARR_SMOOTH.iter().enumerate() {
                dx += w * (grid[(y + k, x + 2)] - grid[(y + k, x)]);
                dy += w * (grid[(y + 2, x + k)] - grid[(y, x + k)]);
            }
            out_x[(y, x)] = dx / 32.;
            out_y[(y, x)] = dy / 32.;
        }
    }
}

/// Bilinear samples at `center` shifted by every offset of `range`.
fn fill_grid(level: &Image, range: Range, center: Vector2d, grid: &mut Matrixd) {
    let [[x0, x1], [y0, y1]] = range;
    let rows = (y1 - y0 + 1) as usize;
    let cols = (x1 - x0 + 1) as usize;
    if grid.shape() != (rows, cols) {
        *grid = na::DMatrix::zeros(rows, cols);
    }
    for (row, y) in (y0..=y1).enumerate() {
        for (col, x) in (x0..=x1).enumerate() {
            grid[(row, col)] = bilinear(level, center + Vector2d::new(x as f64, y as f64));
        }
    }
}

/// Returns closed range of integer steps that can be taken without going outside
/// the image borders, keeping `padding` pixels free. Returns None if the center
/// point is outside the level boundaries.
fn integration_range(level: &Image, center: Vector2d, r: usize, padding: i16) -> Option<Range> {
    let r = r as i16;
    let mut range = [[0, 0], [0, 0]];
    for axis in 0..2 {
        let size = level.size(axis);
        let c = center[axis];
        if size == 0 || c < 0. || c > (size - 1) as f64 {
            return None;
        }
        let whole = c as i16;
        // a fractional part needs one more pixel on the right for sampling
        let spill = i16::from(c.fract() > 0.);
        let lo = i16::max(-r, padding - whole);
        let hi = i16::min(r, size as i16 - whole - padding - 1 - spill);
        if lo > hi {
            return None;
        }
        range[axis] = [lo, hi];
    }
    Some(range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticSequence;

    fn pyramid_frame(image: Image, levels: usize) -> PyramidFrame {
        PyramidFrame::new(&image, levels, None).unwrap()
    }

    /// Smooth blob, brightest at (cx, cy)
    fn blob_image(size: usize, cx: f64, cy: f64) -> Image {
        let mut image = Image::filled(size, size, 0);
        for y in 0..size {
            for x in 0..size {
                let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                let v = 20. + 200. * (-d2 / (2. * 8_f64.powi(2))).exp();
                image.set_value(x, y, v as u8);
            }
        }
        image
    }

    /// Concentric rings of a 9x9 patch, brightest in the middle
    fn ring_patch() -> Image {
        let mut patch = Image::filled(9, 9, 0);
        for y in 0..9i32 {
            for x in 0..9i32 {
                let ring = i32::max((x - 4).abs(), (y - 4).abs());
                patch.set_value(x as usize, y as usize, (99 - 11 * ring) as u8);
            }
        }
        patch
    }

    #[test]
    fn test_patch_displacement() {
        let patch = ring_patch();
        let mut image0 = Image::filled(128, 128, 0);
        let mut image1 = image0.clone();
        let (dx, dy) = (-5, 3);
        image0.set_sub_image_i32(60, 60, &patch);
        image1.set_sub_image_i32(60 + dx, 60 + dy, &patch);

        let config = FlowConfig::default();
        let frame0 = pyramid_frame(image0, config.lk_levels);
        let frame1 = pyramid_frame(image1, config.lk_levels);

        let point0 = Vector2d::new(64., 64.);
        let mut flow = OpticalFlow::new(&config);
        let point1 = flow.follow(&frame0, &frame1, point0);
        assert!(point1.is_some());
    }

    #[test]
    fn test_points_near_left_border() {
        // textured square touching the left border, moved two pixels right
        let sequence = SyntheticSequence::new(320, 240, 2, 48, (5, 160), (2, 0), 0);
        let config = FlowConfig::default();
        let frame0 = pyramid_frame(sequence.render(0), config.lk_levels);
        let frame1 = pyramid_frame(sequence.render(1), config.lk_levels);

        let mut flow = OpticalFlow::new(&config);
        let points = [Vector2d::new(13., 176.), Vector2d::new(21., 176.), Vector2d::new(29., 176.)];
        let tracked = flow.correspond(&frame0, &frame1, &points).unwrap();
        for (p0, p1) in points.iter().zip(&tracked) {
            let p1 = p1.unwrap_or_else(|| panic!("lost {p0}"));
            assert!((p1 - p0 - Vector2d::new(2., 0.)).norm() < 1., "{p0} -> {p1}");
        }
    }

    #[test]
    fn test_covers() {
        assert!(covers([[-3, 3], [-3, 3]], [[-2, 3], [-3, 1]]));
        assert!(!covers([[-1, 3], [-3, 3]], [[-2, 3], [-3, 3]]));
        assert!(!covers([[-3, 3], [-3, 2]], [[-3, 3], [-3, 3]]));
    }

    #[test]
    fn test_min_eigenvalue_per_pixel() {
        // x gradient in the first column only, y gradient in the second
        let ix = Matrixd::from_fn(3, 3, |_, col| if col == 0 { 2. } else { 0. });
        let iy = Matrixd::from_fn(3, 3, |_, col| if col == 1 { 3. } else { 0. });
        let structure = structure_tensor(&ix, &iy);
        assert_eq!(structure, Matrix2d::new(12., 0., 0., 27.));
        assert!((min_eigenvalue(&structure, ix.len()) - 12. / 9.).abs() < 1e-12);
    }

    #[test]
    fn test_blob_shift() {
        let config = FlowConfig::default();
        let frame0 = pyramid_frame(blob_image(96, 48., 48.), config.lk_levels);
        let frame1 = pyramid_frame(blob_image(96, 51., 46.), config.lk_levels);

        let mut flow = OpticalFlow::new(&config);
        let points = [Vector2d::new(44., 50.), Vector2d::new(52., 45.)];
        let tracked = flow.correspond(&frame0, &frame1, &points).unwrap();
        for (p0, p1) in points.iter().zip(&tracked) {
            let shift = p1.unwrap() - p0;
            assert!((shift - Vector2d::new(3., -2.)).norm() < 0.5, "shift {shift}");
        }
    }

    #[test]
    fn test_flat_region_is_lost() {
        let config = FlowConfig::default();
        let frame0 = pyramid_frame(Image::filled(64, 64, 90), config.lk_levels);
        let frame1 = pyramid_frame(Image::filled(64, 64, 90), config.lk_levels);
        let mut flow = OpticalFlow::new(&config);
        let tracked = flow.correspond(&frame0, &frame1, &[Vector2d::new(30., 30.)]).unwrap();
        assert_eq!(tracked, vec![None]);
    }

    #[test]
    fn test_point_outside_is_lost() {
        let config = FlowConfig::default();
        let frame0 = pyramid_frame(blob_image(64, 32., 32.), config.lk_levels);
        let frame1 = pyramid_frame(blob_image(64, 32., 32.), config.lk_levels);
        let mut flow = OpticalFlow::new(&config);
        let tracked = flow
            .correspond(&frame0, &frame1, &[Vector2d::new(-3., 30.), Vector2d::new(30., 70.)])
            .unwrap();
        assert_eq!(tracked, vec![None, None]);
    }

    #[test]
    fn test_mismatched_frames_fail() {
        let config = FlowConfig::default();
        let frame0 = pyramid_frame(Image::filled(64, 64, 0), config.lk_levels);
        let frame1 = pyramid_frame(Image::filled(32, 64, 0), config.lk_levels);
        let mut flow = OpticalFlow::new(&config);
        assert!(matches!(
            flow.correspond(&frame0, &frame1, &[]),
            Err(CorrespondenceError::FrameSizeMismatch { .. })
        ));

        let shallow = pyramid_frame(Image::filled(64, 64, 0), 0);
        assert!(matches!(
            flow.correspond(&shallow, &shallow, &[]),
            Err(CorrespondenceError::MissingLevels { expected: 2, got: 0 })
        ));
    }

    #[test]
    fn test_scharr_of_ramp_and_edge() {
        let mut ix = na::dmatrix!();
        let mut iy = na::dmatrix!();

        scharr(&Matrixd::zeros(5, 5), &mut ix, &mut iy);
        assert_eq!(ix, Matrixd::zeros(3, 3));
        assert_eq!(iy, Matrixd::zeros(3, 3));

        // rows rise by one per pixel
        let ramp = Matrixd::from_fn(5, 5, |row, _| row as f64);
        scharr(&ramp, &mut ix, &mut iy);
        assert_eq!(ix, Matrixd::zeros(3, 3));
        assert_eq!(iy, Matrixd::repeat(3, 3, 1.));

        // vertical line in the middle column
        let line = Matrixd::from_fn(5, 5, |_, col| if col == 2 { 5. } else { 0. });
        scharr(&line, &mut ix, &mut iy);
        let expected = na::dmatrix!(
            2.5, 0., -2.5;
            2.5, 0., -2.5;
            2.5, 0., -2.5;
        );
        assert_eq!(ix, expected);
        assert_eq!(iy, Matrixd::zeros(3, 3));
    }

    #[test]
    fn test_structure_tensor() {
        let ix = Matrixd::repeat(3, 3, 2.);
        let iy = Matrixd::repeat(3, 3, -1.);
        assert_eq!(structure_tensor(&ix, &iy), Matrix2d::new(36., -18., -18., 9.));
    }

    #[test]
    fn test_integration_range() {
        // (0, 0) is the center of the top-left pixel, so (9, 9) is the center
        // of the bottom-right pixel of a 10x10 image.
        let image = Image::filled(10, 10, 0);
        let range = |x, y, padding| integration_range(&image, Vector2d::new(x, y), 3, padding);
        assert_eq!(range(4.5, 4.5, 0), Some([[-3, 3], [-3, 3]]));
        assert_eq!(range(1.0, 2.0, 0), Some([[-1, 3], [-2, 3]]));
        assert_eq!(range(0.9, 1.9, 0), Some([[0, 3], [-1, 3]]));
        assert_eq!(range(0.9, 1.9, 1), Some([[1, 3], [0, 3]]));
        assert_eq!(range(8.5, 2.0, 0), Some([[-3, 0], [-2, 3]]));
        assert_eq!(range(9.5, 2.0, 0), None);
        assert_eq!(integration_range(&Image::empty(), Vector2d::zeros(), 3, 0), None);
    }
}
