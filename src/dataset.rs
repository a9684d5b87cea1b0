use std::path::{Path, PathBuf};

use anyhow::{bail, Context as AnyhowContext, Result};
use tracing::{debug, info};

use crate::error::TrackError;
use crate::frame::Frame;
use crate::image::Image;

/// Forward-only supply of frames. `Ok(None)` ends the sequence.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, TrackError>;

    /// Total number of frames, if known
    fn length(&self) -> Option<usize> {
        None
    }
}

/// Adapts an iterator of frames
pub struct IterSource<I>(pub I);

impl<I> FrameSource for IterSource<I>
where
    I: Iterator<Item = Result<Frame, TrackError>>,
{
    fn next_frame(&mut self) -> Result<Option<Frame>, TrackError> {
        self.0.next().transpose()
    }
}

const EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Image files of a folder, in file name order, decoded when pulled.
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageSequence {
    pub fn new(folder: &Path) -> Result<ImageSequence> {
        let mut paths = vec![];
        let entries = std::fs::read_dir(folder)
            .with_context(|| format!("cannot read image folder {}", folder.display()))?;
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if is_image && path.is_file() {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            bail!("no images found in {}", folder.display());
        }
        paths.sort();
        info!("found {} images in {}", paths.len(), folder.display());

        Ok(ImageSequence { paths, next: 0 })
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<Frame>, TrackError> {
        let index = self.next;
        let path = match self.paths.get(index) {
            Some(path) => path,
            None => return Ok(None),
        };
        debug!("loading {}", path.display());
        let decoded = ::image::open(path).map_err(|e| TrackError::FrameAcquisition {
            index,
            source: Box::new(e),
        })?;
        let gray = decoded.to_luma8();
        let (width, height) = gray.dimensions();

        self.next += 1;
        Ok(Some(Frame {
            index,
            image: Image {
                data: gray.into_raw(),
                width: width as usize,
                height: height as usize,
            },
        }))
    }

    fn length(&self) -> Option<usize> {
        Some(self.paths.len())
    }
}
