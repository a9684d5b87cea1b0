use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::bbox::BoundingBox;
use crate::dataset::FrameSource;
use crate::error::TrackError;
use crate::frame::Frame;
use crate::image::Image;

const BLOCK: usize = 8;
const BACKGROUND: u8 = 30;

pub struct SyntheticSequence {
    width: usize,
    height: usize,
    frame_count: usize,
    object: Image,
    start: (i32, i32),
    velocity: (i32, i32),
    next: usize,
}

impl SyntheticSequence {
    /// A `size` x `size` object made of random blocks, starting at `start`
    /// and moving by `velocity` pixels per frame.
    pub fn new(
        width: usize,
        height: usize,
        frame_count: usize,
        size: usize,
        start: (i32, i32),
        velocity: (i32, i32),
        seed: u64,
    ) -> Self {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let blocks = (size + BLOCK - 1) / BLOCK;
        let values: Vec<u8> = (0..blocks * blocks).map(|_| rng.gen_range(70..=255)).collect();

        let mut object = Image::filled(size, size, 0);
        for y in 0..size {
            for x in 0..size {
                object.set_value(x, y, values[(y / BLOCK) * blocks + x / BLOCK]);
            }
        }

        Self {
            width,
            height,
            frame_count,
            object,
            start,
            velocity,
            next: 0,
        }
    }

    fn origin(&self, index: usize) -> (i32, i32) {
        (
            self.start.0 + self.velocity.0 * index as i32,
            self.start.1 + self.velocity.1 * index as i32,
        )
    }

    /// Where the object is on frame `index`
    pub fn object_box(&self, index: usize) -> BoundingBox {
        let (x, y) = self.origin(index);
        let size = self.object.width as f64;
        BoundingBox {
            min_x: x as f64,
            min_y: y as f64,
            max_x: x as f64 + size - 1.,
            max_y: y as f64 + size - 1.,
        }
    }

    pub fn render(&self, index: usize) -> Image {
        let mut image = Image::filled(self.width, self.height, BACKGROUND);
        let (x, y) = self.origin(index);
        image.set_sub_image_i32(x, y, &self.object);
        image
    }
}

impl FrameSource for SyntheticSequence {
    fn next_frame(&mut self) -> Result<Option<Frame>, TrackError> {
        if self.next >= self.frame_count {
            return Ok(None);
        }
        let index = self.next;
        self.next += 1;
        Ok(Some(Frame {
            index,
            image: self.render(index),
        }))
    }

    fn length(&self) -> Option<usize> {
        Some(self.frame_count)
    }
}
