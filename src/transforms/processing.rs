use burn::tensor::{Tensor, backend::Backend};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::pipeline::{MAX_PIXEL_VAL, Transform};
use crate::config::{INPUT_SIZE, PAD_VALUE};

/// Geometry linking a preprocessed image to its source image.
///
/// Preprocessing only ever rescales and pads towards the bottom/right, so a point of the
/// model input maps back to the source image by undoing the scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessingMetadata {
    /// `(width, height)` of the source image.
    pub original_size: (usize, usize),
    /// `(x, y)` scale from the source image to the model input.
    pub scale: (f32, f32),
}

impl ProcessingMetadata {
    pub fn identity(width: usize, height: usize) -> Self {
        Self {
            original_size: (width, height),
            scale: (1.0, 1.0),
        }
    }

    /// Maps a point of the model input back onto the source image.
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        (x / self.scale.0, y / self.scale.1)
    }

    pub(crate) fn rescale(&mut self, sx: f32, sy: f32) {
        self.scale = (self.scale.0 * sx, self.scale.1 * sy);
    }
}

/// One preprocessing step, as stored in a serialized [`ImageProcessor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProcessingStep {
    /// Resize to exactly `width`×`height`, ignoring the aspect ratio.
    Resize { width: usize, height: usize },
    /// Rescale the longest side to `size`, then pad bottom/right to a `size`×`size` square.
    LetterboxPad { size: usize, pad_value: u8 },
    /// Divide pixel values by `max_value`.
    Standardize { max_value: f32 },
    /// ImageNet mean/std normalization of an image in `[0, 1]`.
    ImagenetNormalize,
}

impl ProcessingStep {
    fn apply<B: Backend>(&self, transform: Transform<B>) -> Transform<B> {
        match *self {
            ProcessingStep::Resize { width, height } => transform.resize_bilinear(width, height),
            ProcessingStep::LetterboxPad { size, pad_value } => transform.letterbox(size, pad_value),
            ProcessingStep::Standardize { max_value } => transform.standardize(max_value),
            ProcessingStep::ImagenetNormalize => transform.imagenet_normalize(),
        }
    }
}

/// Ordered preprocessing turning an `RgbImage` into a model input.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageProcessor {
    pub steps: Vec<ProcessingStep>,
}

impl ImageProcessor {
    pub fn new(steps: Vec<ProcessingStep>) -> Self {
        Self { steps }
    }

    /// Letterbox to the training resolution, then scale to `[0, 1]`.
    pub fn yolo_nas_pose() -> Self {
        Self::new(vec![
            ProcessingStep::LetterboxPad {
                size: INPUT_SIZE,
                pad_value: PAD_VALUE,
            },
            ProcessingStep::Standardize {
                max_value: MAX_PIXEL_VAL,
            },
        ])
    }

    /// Runs every step on `image` and returns the `[1, 3, H, W]` model input.
    pub fn preprocess<B: Backend>(
        &self,
        image: &RgbImage,
        device: &B::Device,
    ) -> (Tensor<B, 4>, ProcessingMetadata) {
        let (image, metadata) = self
            .steps
            .iter()
            .fold(Transform::<B>::new(image.clone(), device), |t, step| {
                step.apply(t)
            })
            .finish();

        (image.unsqueeze::<4>(), metadata)
    }
}
