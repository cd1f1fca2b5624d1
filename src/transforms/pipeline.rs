use burn::tensor::{Tensor, TensorData, backend::Backend};
use image::RgbImage;

use super::processing::ProcessingMetadata;
use crate::error::PredictionError;

/// Maximum pixel value for a RGB8 pixel
pub const MAX_PIXEL_VAL: f32 = 255.0;

/// A pipeline for chained image preprocessing ahead of a pose model.
///
/// `Transform` wraps an image tensor together with the [`ProcessingMetadata`] needed to
/// map predictions made on the transformed image back onto the source image. Geometric
/// steps (resize, letterbox) update the metadata, photometric steps (standardize,
/// normalize) leave it untouched.
///
/// # Fields
///
/// * `image` – The 3-channel image tensor in `[C, H, W]` format.
/// * `metadata` – Scale between the source image and `image`.
/// * `device` – Backend device where tensors reside (CPU or GPU).
///
#[derive(Clone, Debug)]
pub struct Transform<B: Backend> {
    pub image: Tensor<B, 3>,
    pub metadata: ProcessingMetadata,
    pub device: <B as Backend>::Device,
}

impl<B: Backend> Transform<B> {
    /// Creates a new [`Transform`] from an `RgbImage`.
    ///
    /// The pixel values stay in the `0–255` range and the metadata is the identity
    /// mapping for the image size.
    pub fn new(image: RgbImage, device: &<B as Backend>::Device) -> Self {
        let metadata = ProcessingMetadata::identity(image.width() as usize, image.height() as usize);
        let image = Self::rgb_img_as_tensor(image, device);

        Self {
            image,
            metadata,
            device: device.clone(),
        }
    }

    /// Creates a new [`Transform`] from a `[C, H, W]` tensor.
    pub fn from_tensor(image: Tensor<B, 3>) -> Self {
        let [_ch, height, width] = image.dims();
        let device = image.device();
        Self {
            image,
            metadata: ProcessingMetadata::identity(width, height),
            device,
        }
    }

    /// Finalizes a chained transformation pipeline and returns the processed image of
    /// shape `[3, H, W]` along with the metadata that maps it back to the source image.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let (image, metadata) = Transform::new(rgb_image, &device)
    ///     .letterbox(640, 114)
    ///     .standardize(255.0)
    ///     .finish();
    /// ```
    pub fn finish(self) -> (Tensor<B, 3>, ProcessingMetadata) {
        (self.image, self.metadata)
    }

    /// Converts an `image::RgbImage` into a 3-channel tensor in `[C, H, W]` format.
    ///
    /// No normalization or scaling is applied; pixel values remain in the `0–255` range.
    pub fn rgb_img_as_tensor(image: RgbImage, device: &B::Device) -> Tensor<B, 3> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let img_vec: Vec<f32> = image.into_raw().into_iter().map(f32::from).collect();
        Tensor::<B, 3>::from_data(
            TensorData::new(img_vec, [height, width, 3]).convert::<B::FloatElem>(),
            device,
        )
        .permute([2, 0, 1])
    }

    /// Converts a `[C, H, W]` tensor with values in the `0–255` range back into an
    /// `image::RgbImage`. Values outside the range are clamped.
    pub fn tensor_as_rgb_img(image: Tensor<B, 3>) -> Result<RgbImage, PredictionError> {
        let [ch, height, width] = image.dims();
        if ch != 3 {
            return Err(PredictionError::TensorData(format!(
                "expected a 3 channel image, got {ch} channels"
            )));
        }

        let buf: Vec<u8> = image
            .permute([1, 2, 0])
            .clamp(0.0, MAX_PIXEL_VAL)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| PredictionError::TensorData(format!("{e:?}")))?
            .into_iter()
            .map(|p| p.round() as u8)
            .collect();

        RgbImage::from_vec(width as u32, height as u32, buf).ok_or_else(|| {
            PredictionError::TensorData(format!("{width}x{height} buffer does not fit the image"))
        })
    }
}

/// Creates an RGB test image with a specified pattern.
///
/// Generates a new image of the given width and height, filling it with the specified
/// RGB pattern.
pub fn create_test_image(width: u32, height: u32, pattern: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, image::Rgb(pattern))
}
