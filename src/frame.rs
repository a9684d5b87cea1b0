use anyhow::Result;

use crate::image::Image;
use crate::pyramid::Pyramid;

/// One grayscale frame of the input sequence.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Position of the frame in the sequence, starting from 0
    pub index: usize,
    pub image: Image,
}

#[derive(Clone, Debug)]
pub struct PyramidFrame {
    /// Full resolution, level 0
    pub image: Image,
    pub pyramid: Pyramid,
}

impl PyramidFrame {
    /// Build the pyramid for `image`. When an `unused_frame` is passed its
    /// buffers are reused instead of allocating new ones.
    pub fn new(
        image: &Image,
        levels: usize,
        unused_frame: Option<PyramidFrame>,
    ) -> Result<PyramidFrame> {
        let mut frame = unused_frame.unwrap_or_else(|| PyramidFrame {
            image: Image::empty(),
            pyramid: Pyramid::empty(),
        });

        // copy into the recycled buffer, the caller keeps its image
        frame.image.clear();
        frame.image.data.extend_from_slice(&image.data);
        frame.image.width = image.width;
        frame.image.height = image.height;
        frame.pyramid.compute(&frame.image, levels)?;

        Ok(frame)
    }

    pub fn level_count(&self) -> usize {
        self.pyramid.levels.len()
    }

    pub fn get_image_at_level(&self, level: usize) -> &Image {
        if level == 0 {
            &self.image
        } else {
            &self.pyramid.levels[level - 1]
        }
    }
}
