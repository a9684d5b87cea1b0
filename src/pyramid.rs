use anyhow::{bail, Result};

use crate::image::Image;

/// 3x3 binomial smoothing, applied before dropping every other pixel.
const KERNEL: [[u16; 3]; 3] = [[1, 2, 1], [2, 4, 2], [1, 2, 1]];

/// Successively halved copies of an image, finest first. The full
/// resolution image itself is not stored here.
#[derive(Clone, Debug)]
pub struct Pyramid {
    pub levels: Vec<Image>,
}

impl Pyramid {
    pub fn empty() -> Self {
        Self { levels: vec![] }
    }

    /// Rebuild `level_count` levels below `image`, reusing the buffers of
    /// the levels already present.
    pub fn compute(&mut self, image: &Image, level_count: usize) -> Result<()> {
        self.levels.truncate(level_count);
        self.levels.resize_with(level_count, Image::empty);

        let mut parent = image;
        for level in self.levels.iter_mut() {
            halve(parent, level)?;
            parent = level;
        }
        Ok(())
    }
}

/// Smooth and subsample `parent` into `child`. Odd trailing rows and
/// columns are dropped, the border is extended by clamping.
fn halve(parent: &Image, child: &mut Image) -> Result<()> {
    let (w, h) = (parent.width, parent.height);
    if w < 2 || h < 2 {
        bail!("cannot downscale image with shape {w} x {h}");
    }

    child.data.clear();
    child.width = w / 2;
    child.height = h / 2;
    for y in 0..child.height {
        for x in 0..child.width {
            let (cx, cy) = (2 * x as i64, 2 * y as i64);
            let mut sum = 0u16;
            for (ky, row) in KERNEL.iter().enumerate() {
                for (kx, weight) in row.iter().enumerate() {
                    let value = parent.value_clamped(cx + kx as i64 - 1, cy + ky as i64 - 1);
                    sum += weight * value as u16;
                }
            }
            child.data.push((sum / 16) as u8);
        }
    }
    Ok(())
}
