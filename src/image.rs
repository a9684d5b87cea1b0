use crate::my_types::*;

/// Row-major grayscale image storage
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Image {
    /// Create an empty image
    pub fn empty() -> Image {
        Image {
            data: vec![],
            width: 0,
            height: 0,
        }
    }

    /// Create an image where every pixel has the same value
    pub fn filled(width: usize, height: usize, value: u8) -> Image {
        Image {
            data: vec![value; width * height],
            width,
            height,
        }
    }

    /// Clear the image storage
    pub fn clear(&mut self) {
        self.data.clear();
        self.width = 0;
        self.height = 0;
    }

    /// Get the size for a chosen dimension
    pub fn size(&self, dim: usize) -> usize {
        if dim == 0 {
            self.width
        } else {
            self.height
        }
    }

    #[inline(always)]
    pub fn value(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    /// Pixel value with coordinates clamped to the image borders
    #[inline(always)]
    pub fn value_clamped(&self, x: i64, y: i64) -> u8 {
        let x = x.clamp(0, self.width as i64 - 1);
        let y = y.clamp(0, self.height as i64 - 1);
        self.data[y as usize * self.width + x as usize]
    }

    #[inline(always)]
    pub fn set_value(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }

    /// Copy `sub` into this image with its top-left corner at (x, y).
    /// Pixels falling outside are skipped.
    pub fn set_sub_image_i32(&mut self, x: i32, y: i32, sub: &Image) {
        for sy in 0..sub.height {
            for sx in 0..sub.width {
                let tx = x + sx as i32;
                let ty = y + sy as i32;
                if tx < 0 || ty < 0 || tx as usize >= self.width || ty as usize >= self.height {
                    continue;
                }
                self.set_value(tx as usize, ty as usize, sub.value(sx, sy));
            }
        }
    }
}

/// Sample the image at a sub-pixel location. The point must lie inside
/// `[0, width - 1] x [0, height - 1]`.
pub fn bilinear(image: &Image, point: Vector2d) -> f64 {
    let x0 = point.x.floor();
    let y0 = point.y.floor();
    let fx = point.x - x0;
    let fy = point.y - y0;
    let x0 = x0 as usize;
    let y0 = y0 as usize;
    let x1 = usize::min(x0 + 1, image.width - 1);
    let y1 = usize::min(y0 + 1, image.height - 1);

    let v00 = image.value(x0, y0) as f64;
    let v10 = image.value(x1, y0) as f64;
    let v01 = image.value(x0, y1) as f64;
    let v11 = image.value(x1, y1) as f64;

    (1. - fy) * ((1. - fx) * v00 + fx * v10) + fy * ((1. - fx) * v01 + fx * v11)
}
