//! Image in, poses out.
//!
//! A [`PoseEstimationPipeline`] chains the [`ImageProcessor`] of a model, the model forward
//! pass and a [`DekrDecodeCallback`], then maps the poses back onto the source images.

pub mod decode;
pub mod prediction;
pub mod source;

use burn::tensor::backend::Backend;
use image::RgbImage;
use tracing::info;

use crate::{error::PredictionError, labels::PoseSkeleton, nn::Layer, transforms::ImageProcessor};

pub use decode::{DekrDecodeCallback, Keypoint, Pose};
pub use prediction::{ImagesPoseEstimationPrediction, PoseEstimationPrediction};
pub use source::{FrameSource, ImageSource};

/// Runs a pose model over images with its dataset processing parameters.
///
/// The model must map a `[1, 3, H, W]` input to a `[heatmap, offsets]` pyramid.
pub struct PoseEstimationPipeline<'m, B: Backend> {
    model: &'m dyn Layer<B>,
    image_processor: ImageProcessor,
    post_prediction_callback: DekrDecodeCallback,
    skeleton: PoseSkeleton,
    device: B::Device,
}

impl<'m, B: Backend> PoseEstimationPipeline<'m, B> {
    pub fn new(
        model: &'m dyn Layer<B>,
        image_processor: ImageProcessor,
        post_prediction_callback: DekrDecodeCallback,
        skeleton: PoseSkeleton,
        device: &B::Device,
    ) -> Self {
        Self {
            model,
            image_processor,
            post_prediction_callback,
            skeleton,
            device: device.clone(),
        }
    }

    pub fn skeleton(&self) -> &PoseSkeleton {
        &self.skeleton
    }

    pub fn post_prediction_callback(&self) -> &DekrDecodeCallback {
        &self.post_prediction_callback
    }

    /// Predicts every image of `source`, in order.
    pub fn predict(
        &self,
        source: impl Into<ImageSource>,
    ) -> Result<ImagesPoseEstimationPrediction, PredictionError> {
        let images = source.into().load()?;
        let predictions = images
            .into_iter()
            .map(|image| self.predict_image(image))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            images = predictions.len(),
            poses = predictions.iter().map(|p| p.poses.len()).sum::<usize>(),
            "pose estimation done"
        );
        Ok(ImagesPoseEstimationPrediction::new(predictions))
    }

    /// Predicts frames until the feed runs dry, handing each prediction to `sink`. Returns
    /// the number of processed frames.
    pub fn predict_frames<S, F>(&self, source: &mut S, mut sink: F) -> Result<usize, PredictionError>
    where
        S: FrameSource + ?Sized,
        F: FnMut(PoseEstimationPrediction) -> Result<(), PredictionError>,
    {
        let mut frames = 0;
        while let Some(frame) = source.next_frame() {
            sink(self.predict_image(frame)?)?;
            frames += 1;
        }

        info!(frames, "frame source exhausted");
        Ok(frames)
    }

    fn predict_image(&self, image: RgbImage) -> Result<PoseEstimationPrediction, PredictionError> {
        let (input, metadata) = self.image_processor.preprocess::<B>(&image, &self.device);

        let outputs = self
            .model
            .forward(input.into())?
            .into_pyramid(self.model.type_tag())?;
        let [heatmap, offsets]: [_; 2] = outputs.try_into().map_err(|outputs: Vec<_>| {
            PredictionError::ModelOutput(format!(
                "expected heatmap and offsets, got {} maps",
                outputs.len()
            ))
        })?;

        let poses = self
            .post_prediction_callback
            .decode(heatmap, offsets)?
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|pose| pose.to_original(&metadata))
            .collect();

        Ok(PoseEstimationPrediction {
            image,
            poses,
            skeleton: self.skeleton.clone(),
        })
    }
}
