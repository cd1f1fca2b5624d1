use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use tracing::info;

use super::decode::Pose;
use crate::{error::PredictionError, labels::PoseSkeleton};

/// Poses found in one image, together with everything needed to render them.
#[derive(Debug, Clone)]
pub struct PoseEstimationPrediction {
    pub image: RgbImage,
    pub poses: Vec<Pose>,
    pub skeleton: PoseSkeleton,
}

impl PoseEstimationPrediction {
    /// Renders the skeleton of every pose on a copy of the image.
    ///
    /// Limbs are drawn first, then the joints on top of them. The joint radius follows the
    /// image size.
    pub fn draw(&self) -> RgbImage {
        let mut canvas = self.image.clone();
        let radius = (canvas.width().min(canvas.height()) / 200).max(2) as i32;

        for pose in &self.poses {
            for ((a, b), color) in self.skeleton.edges() {
                if let (Some(a), Some(b)) = (pose.keypoints.get(a), pose.keypoints.get(b)) {
                    draw_line_segment_mut(&mut canvas, (a.x, a.y), (b.x, b.y), Rgb(color));
                }
            }

            for (k, &color) in pose.keypoints.iter().zip(self.skeleton.keypoint_colors()) {
                draw_filled_circle_mut(
                    &mut canvas,
                    (k.x.round() as i32, k.y.round() as i32),
                    radius,
                    Rgb(color),
                );
            }
        }

        canvas
    }
}

/// Predictions of a batch of images, in input order.
#[derive(Debug, Clone, Default)]
pub struct ImagesPoseEstimationPrediction {
    pub predictions: Vec<PoseEstimationPrediction>,
}

impl ImagesPoseEstimationPrediction {
    pub fn new(predictions: Vec<PoseEstimationPrediction>) -> Self {
        Self { predictions }
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PoseEstimationPrediction> {
        self.predictions.iter()
    }

    pub fn draw(&self) -> Vec<RgbImage> {
        self.predictions.iter().map(|p| p.draw()).collect()
    }

    /// Writes the rendered images to `output_folder` as `pred_{i}.jpg`, creating the folder
    /// when needed. Returns the written paths.
    pub fn save(&self, output_folder: impl AsRef<Path>) -> Result<Vec<PathBuf>, PredictionError> {
        let output_folder = output_folder.as_ref();
        std::fs::create_dir_all(output_folder)?;

        let mut paths = Vec::with_capacity(self.len());
        for (i, rendered) in self.draw().into_iter().enumerate() {
            let path = output_folder.join(format!("pred_{i}.jpg"));
            rendered.save(&path)?;
            paths.push(path);
        }

        info!(count = paths.len(), folder = %output_folder.display(), "saved predictions");
        Ok(paths)
    }
}

impl IntoIterator for ImagesPoseEstimationPrediction {
    type Item = PoseEstimationPrediction;
    type IntoIter = std::vec::IntoIter<PoseEstimationPrediction>;

    fn into_iter(self) -> Self::IntoIter {
        self.predictions.into_iter()
    }
}
