use std::cmp::Ordering;

use burn::{
    nn::{PaddingConfig2d, pool::MaxPool2dConfig},
    tensor::{Tensor, activation::sigmoid, backend::Backend},
};
use tracing::debug;

use crate::{
    config::DekrDecodeConfig, error::PredictionError, nn::MaxPool2dLayer,
    transforms::ProcessingMetadata,
};

/// A joint location in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

/// One detected person.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    /// One keypoint per joint, in skeleton order.
    pub keypoints: Vec<Keypoint>,
    pub score: f32,
}

impl Pose {
    /// Tight `[x1, y1, x2, y2]` box around the keypoints.
    pub fn bbox(&self) -> [f32; 4] {
        self.keypoints.iter().fold(
            [f32::MAX, f32::MAX, f32::MIN, f32::MIN],
            |[x1, y1, x2, y2], k| [x1.min(k.x), y1.min(k.y), x2.max(k.x), y2.max(k.y)],
        )
    }

    pub fn area(&self) -> f32 {
        if self.keypoints.is_empty() {
            return 0.0;
        }
        let [x1, y1, x2, y2] = self.bbox();
        (x2 - x1) * (y2 - y1)
    }

    /// Maps the keypoints from the model input back onto the source image.
    pub fn to_original(mut self, metadata: &ProcessingMetadata) -> Self {
        for k in self.keypoints.iter_mut() {
            (k.x, k.y) = metadata.to_original(k.x, k.y);
        }
        self
    }
}

/// Turns the `[heatmap, offsets]` output of a DEKR style head into poses.
///
/// The last heatmap channel holds the pose centers, channel `j` the heatmap of joint `j`.
/// Offset channels `2j` and `2j + 1` hold the `(dx, dy)` displacement from a center to
/// joint `j`, in heatmap cells.
#[derive(Debug, Clone)]
pub struct DekrDecodeCallback {
    config: DekrDecodeConfig,
}

impl DekrDecodeCallback {
    pub fn new(config: DekrDecodeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DekrDecodeConfig {
        &self.config
    }

    /// Decodes a batch. Returns one list of poses per image, best pose first, in the
    /// coordinates of the model input.
    pub fn decode<B: Backend>(
        &self,
        heatmap: Tensor<B, 4>,
        offsets: Tensor<B, 4>,
    ) -> Result<Vec<Vec<Pose>>, PredictionError> {
        let [batch, heat_ch, height, width] = heatmap.dims();
        let num_joints = heat_ch.saturating_sub(1);
        if num_joints == 0 || offsets.dims() != [batch, 2 * num_joints, height, width] {
            return Err(PredictionError::ModelOutput(format!(
                "heatmap {:?} and offsets {:?} do not describe the same joints",
                heatmap.dims(),
                offsets.dims()
            )));
        }

        let heatmap = if self.config.apply_sigmoid {
            sigmoid(heatmap)
        } else {
            heatmap
        };
        let centers = heatmap.clone().narrow(1, num_joints, 1);
        let pooled = MaxPool2dLayer::new(
            MaxPool2dConfig::new([3, 3]).with_padding(PaddingConfig2d::Explicit(1, 1)),
        )
        .forward_tensor(centers);

        let heat = to_vec(heatmap)?;
        let pooled = to_vec(pooled)?;
        let offsets = to_vec(offsets)?;

        let plane = height * width;
        let mut results = Vec::with_capacity(batch);

        for n in 0..batch {
            let heat_at = |c: usize, y: usize, x: usize| heat[(n * heat_ch + c) * plane + y * width + x];
            let offset_at =
                |c: usize, cell: usize| offsets[(n * 2 * num_joints + c) * plane + cell];

            let mut peaks: Vec<(usize, f32)> = (0..plane)
                .filter_map(|cell| {
                    let score = heat[(n * heat_ch + num_joints) * plane + cell];
                    let is_peak = score >= pooled[n * plane + cell]
                        && score >= self.config.keypoint_threshold;
                    is_peak.then_some((cell, score))
                })
                .collect();
            peaks.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
            peaks.truncate(self.config.max_num_people);

            let stride = self.config.output_stride as f32;
            let poses: Vec<Pose> = peaks
                .into_iter()
                .filter_map(|(cell, center_score)| {
                    let (cx, cy) = ((cell % width) as f32, (cell / width) as f32);
                    let keypoints: Vec<Keypoint> = (0..num_joints)
                        .map(|j| {
                            let x = cx + offset_at(2 * j, cell);
                            let y = cy + offset_at(2 * j + 1, cell);
                            let col = x.round().clamp(0.0, (width - 1) as f32) as usize;
                            let row = y.round().clamp(0.0, (height - 1) as f32) as usize;
                            Keypoint {
                                x: x * stride,
                                y: y * stride,
                                confidence: heat_at(j, row, col),
                            }
                        })
                        .collect();

                    let mean_conf =
                        keypoints.iter().map(|k| k.confidence).sum::<f32>() / num_joints as f32;
                    let score = center_score * mean_conf;
                    (score >= self.config.min_confidence).then_some(Pose { keypoints, score })
                })
                .collect();

            let candidates = poses.len();
            let poses = pose_nms(
                poses,
                self.config.nms_threshold,
                self.config.nms_num_threshold.min(num_joints),
            );
            debug!(
                image = n,
                candidates,
                kept = poses.len(),
                "decoded poses"
            );
            results.push(poses);
        }

        Ok(results)
    }
}

fn to_vec<B: Backend>(tensor: Tensor<B, 4>) -> Result<Vec<f32>, PredictionError> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| PredictionError::TensorData(format!("{e:?}")))
}

/// Greedy pose suppression, best score first.
///
/// A pose is dropped when at least `num_threshold` of its joints lie within
/// `threshold * sqrt(area)` of the matching joints of an already kept pose, `area` being
/// the keypoint box area of the kept pose.
pub(crate) fn pose_nms(mut poses: Vec<Pose>, threshold: f32, num_threshold: usize) -> Vec<Pose> {
    poses.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<Pose> = Vec::with_capacity(poses.len());
    for pose in poses {
        let duplicate = kept.iter().any(|better| {
            let radius = threshold * better.area().sqrt();
            let close = better
                .keypoints
                .iter()
                .zip(&pose.keypoints)
                .filter(|(a, b)| (a.x - b.x).hypot(a.y - b.y) <= radius)
                .count();
            close >= num_threshold
        });
        if !duplicate {
            kept.push(pose);
        }
    }
    kept
}
