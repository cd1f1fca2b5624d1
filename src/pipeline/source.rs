use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::debug;

use crate::error::PredictionError;

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// Images to run a prediction on.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Image(RgbImage),
    Images(Vec<RgbImage>),
    /// An image file, or a folder whose image files are read in name order.
    Path(PathBuf),
    Paths(Vec<PathBuf>),
}

impl ImageSource {
    /// Reads every image of the source.
    ///
    /// # Errors
    ///
    /// [`PredictionError::EmptySource`] when the source holds no image, image and I/O
    /// errors as they come.
    pub fn load(self) -> Result<Vec<RgbImage>, PredictionError> {
        let images = match self {
            ImageSource::Image(image) => vec![image],
            ImageSource::Images(images) => images,
            ImageSource::Path(path) => load_path(&path)?,
            ImageSource::Paths(paths) => paths
                .iter()
                .map(|path| load_path(path))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .flatten()
                .collect(),
        };

        if images.is_empty() {
            return Err(PredictionError::EmptySource);
        }
        Ok(images)
    }
}

fn load_path(path: &Path) -> Result<Vec<RgbImage>, PredictionError> {
    if !path.is_dir() {
        return Ok(vec![image::open(path)?.to_rgb8()]);
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    files.retain(|file| {
        file.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    });
    files.sort();
    debug!(folder = %path.display(), images = files.len(), "reading image folder");

    files
        .iter()
        .map(|file| {
            image::open(file)
                .map(|image| image.to_rgb8())
                .map_err(PredictionError::from)
        })
        .collect()
}

impl From<RgbImage> for ImageSource {
    fn from(image: RgbImage) -> Self {
        ImageSource::Image(image)
    }
}

impl From<Vec<RgbImage>> for ImageSource {
    fn from(images: Vec<RgbImage>) -> Self {
        ImageSource::Images(images)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        ImageSource::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<&str> for ImageSource {
    fn from(path: &str) -> Self {
        ImageSource::Path(PathBuf::from(path))
    }
}

impl From<Vec<PathBuf>> for ImageSource {
    fn from(paths: Vec<PathBuf>) -> Self {
        ImageSource::Paths(paths)
    }
}

/// A live feed of frames, e.g. a camera. Prediction stops when the feed returns `None`.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<RgbImage>;
}

impl<I: Iterator<Item = RgbImage>> FrameSource for I {
    fn next_frame(&mut self) -> Option<RgbImage> {
        self.next()
    }
}
