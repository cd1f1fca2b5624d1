use burn::{config::Config, tensor::backend::Backend};
use tracing::debug;

use super::{
    pose_head::{PoseHeadParams, YoloNasPoseHead},
    vgg::VggBackbone,
};
use crate::{
    coco_labels::{COCO_EDGE_COLORS, COCO_EDGE_LINKS, COCO_KEYPOINT_COLORS, COCO_KEYPOINTS},
    config::{DEFAULT_POSE_CONF, DekrDecodeConfig},
    error::{LayerError, ModelError, PredictionError},
    labels::PoseSkeleton,
    layer_any,
    nn::{ActivationKind, Attributes, FeatureMap, Identity, Layer, Node, TypeTag},
    pipeline::{
        DekrDecodeCallback, FrameSource, ImageSource, ImagesPoseEstimationPrediction,
        PoseEstimationPipeline, PoseEstimationPrediction,
    },
    transforms::ImageProcessor,
};

pub const YOLO_NAS_POSE: TypeTag = "YoloNasPose";

/// Architecture of a [`YoloNasPose`] model.
#[derive(Config, Debug, PartialEq)]
pub struct YoloNasPoseConfig {
    /// Number of joints.
    #[config(default = 17)]
    pub num_classes: usize,
    #[config(default = 3)]
    pub in_channels: usize,
    #[config(default = "vec![32, 64, 96, 192, 384]")]
    pub backbone_widths: Vec<usize>,
    #[config(default = "vec![1, 2, 2, 2, 1]")]
    pub backbone_depths: Vec<usize>,
    #[config(default = 128)]
    pub inter_channels: usize,
    #[config(default = 16)]
    pub channels_per_kpt: usize,
    #[config(default = 1)]
    pub num_blocks: usize,
    #[config(default = 2)]
    pub upsample_factor: usize,
    #[config(default = "ActivationKind::Relu")]
    pub activation: ActivationKind,
}

/// Dataset dependent settings used at prediction time.
///
/// Empty vectors and `None` mean "not set".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseProcessingParams {
    pub edge_links: Vec<(usize, usize)>,
    pub edge_colors: Vec<[u8; 3]>,
    pub keypoint_colors: Vec<[u8; 3]>,
    pub image_processor: Option<ImageProcessor>,
    /// Default pose confidence threshold.
    pub conf: Option<f32>,
}

impl PoseProcessingParams {
    /// COCO skeleton with the standard YOLO-NAS-Pose preprocessing.
    pub fn coco17() -> Self {
        Self {
            edge_links: COCO_EDGE_LINKS.to_vec(),
            edge_colors: COCO_EDGE_COLORS.to_vec(),
            keypoint_colors: COCO_KEYPOINT_COLORS.to_vec(),
            image_processor: Some(ImageProcessor::yolo_nas_pose()),
            conf: Some(DEFAULT_POSE_CONF),
        }
    }

    /// Overwrites the fields that are set in `other`.
    fn merge(&mut self, other: PoseProcessingParams) {
        if !other.edge_links.is_empty() {
            self.edge_links = other.edge_links;
        }
        if !other.edge_colors.is_empty() {
            self.edge_colors = other.edge_colors;
        }
        if !other.keypoint_colors.is_empty() {
            self.keypoint_colors = other.keypoint_colors;
        }
        if other.image_processor.is_some() {
            self.image_processor = other.image_processor;
        }
        if other.conf.is_some() {
            self.conf = other.conf;
        }
    }
}

/// Bottom-up pose estimation model: backbone, neck and a DEKR style head.
///
/// The forward pass maps a `[N, 3, H, W]` image batch to a `[heatmap, offsets]` pyramid at
/// a quarter of the input resolution, with `num_classes + 1` heatmap channels (the last one
/// being pose centers) and `2 * num_classes` offset channels.
#[derive(Debug)]
pub struct YoloNasPose<B: Backend> {
    backbone: Node<B>,
    neck: Node<B>,
    heads: Node<B>,
    num_classes: usize,
    processing: Option<PoseProcessingParams>,
    device: B::Device,
}

impl<B: Backend> YoloNasPose<B> {
    pub fn new(config: &YoloNasPoseConfig, device: &B::Device) -> Result<Self, ModelError> {
        let backbone = VggBackbone::<B>::new(
            config.in_channels,
            &config.backbone_widths,
            &config.backbone_depths,
            config.activation,
            device,
        )?;
        let heads = YoloNasPoseHead::<B>::new(
            PoseHeadParams {
                num_classes: config.num_classes,
                in_channels: backbone.out_channels(),
                inter_channels: config.inter_channels,
                channels_per_kpt: config.channels_per_kpt,
                num_blocks: config.num_blocks,
                upsample_factor: config.upsample_factor,
                activation: config.activation,
            },
            device,
        )?;

        Ok(Self {
            backbone: Node::new(backbone),
            neck: Node::new(Identity::new()),
            heads: Node::new(heads),
            num_classes: config.num_classes,
            processing: None,
            device: device.clone(),
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn processing_params(&self) -> Option<&PoseProcessingParams> {
        self.processing.as_ref()
    }

    /// Sets the dataset processing parameters used by [`YoloNasPose::predict`].
    ///
    /// Fields left empty in `params` keep their current value.
    pub fn set_dataset_processing_params(&mut self, params: PoseProcessingParams) {
        match self.processing.as_mut() {
            Some(current) => current.merge(params),
            None => self.processing = Some(params),
        }
        debug!(params = ?self.processing, "dataset processing params set");
    }

    /// Decoder keeping poses whose score reaches `conf`.
    pub fn get_post_prediction_callback(&self, conf: f32) -> DekrDecodeCallback {
        DekrDecodeCallback::new(DekrDecodeConfig::new().with_min_confidence(conf))
    }

    /// Builds the prediction pipeline.
    ///
    /// `conf` falls back to the processing params, then to [`DEFAULT_POSE_CONF`]. Only
    /// `None` falls back; `Some(0.0)` keeps every pose.
    ///
    /// # Errors
    ///
    /// * [`PredictionError::ProcessingParamsNotSet`] without processing params or an image
    ///   processor.
    /// * The skeleton errors of [`PoseSkeleton::new`] when the colors or links do not fit
    ///   the joints of the model.
    pub fn pipeline(&self, conf: Option<f32>) -> Result<PoseEstimationPipeline<'_, B>, PredictionError> {
        let params = self
            .processing
            .as_ref()
            .ok_or(PredictionError::ProcessingParamsNotSet)?;
        let image_processor = params
            .image_processor
            .clone()
            .ok_or(PredictionError::ProcessingParamsNotSet)?;

        let mut skeleton = PoseSkeleton::new(
            self.num_classes,
            params.edge_links.clone(),
            params.edge_colors.clone(),
            params.keypoint_colors.clone(),
        )?;
        if self.num_classes == COCO_KEYPOINTS.len() {
            skeleton = skeleton.with_joint_names(&COCO_KEYPOINTS);
        }

        let conf = conf.or(params.conf).unwrap_or(DEFAULT_POSE_CONF);
        Ok(PoseEstimationPipeline::new(
            self,
            image_processor,
            self.get_post_prediction_callback(conf),
            skeleton,
            &self.device,
        ))
    }

    pub fn predict(
        &self,
        images: impl Into<ImageSource>,
        conf: Option<f32>,
    ) -> Result<ImagesPoseEstimationPrediction, PredictionError> {
        self.pipeline(conf)?.predict(images)
    }

    /// Predicts a live feed, see [`PoseEstimationPipeline::predict_frames`].
    pub fn predict_frames<S, F>(
        &self,
        source: &mut S,
        conf: Option<f32>,
        sink: F,
    ) -> Result<usize, PredictionError>
    where
        S: FrameSource + ?Sized,
        F: FnMut(PoseEstimationPrediction) -> Result<(), PredictionError>,
    {
        self.pipeline(conf)?.predict_frames(source, sink)
    }
}

impl<B: Backend> Layer<B> for YoloNasPose<B> {
    fn type_tag(&self) -> TypeTag {
        YOLO_NAS_POSE
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        let x = self.backbone.forward(input)?;
        let x = self.neck.forward(x)?;
        self.heads.forward(x)
    }

    fn children(&self) -> Vec<(String, &Node<B>)> {
        vec![
            ("backbone".to_owned(), &self.backbone),
            ("neck".to_owned(), &self.neck),
            ("heads".to_owned(), &self.heads),
        ]
    }

    fn children_mut(&mut self) -> Vec<(String, &mut Node<B>)> {
        vec![
            ("backbone".to_owned(), &mut self.backbone),
            ("neck".to_owned(), &mut self.neck),
            ("heads".to_owned(), &mut self.heads),
        ]
    }

    fn attributes(&self) -> Attributes {
        Attributes::new().with("num_classes", self.num_classes)
    }

    layer_any!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        quantization::{QuantConv2d, QuantizationUtility},
        transforms::{ProcessingStep, pipeline::create_test_image},
    };
    use burn::{
        backend::{NdArray, ndarray::NdArrayDevice},
        tensor::Tensor,
    };

    type B = NdArray<f32>;

    fn tiny_config() -> YoloNasPoseConfig {
        YoloNasPoseConfig::new()
            .with_num_classes(3)
            .with_backbone_widths(vec![4, 4, 8, 8, 8])
            .with_backbone_depths(vec![1, 1, 1, 1, 1])
            .with_inter_channels(8)
            .with_channels_per_kpt(2)
            .with_num_blocks(1)
    }

    fn tiny_params() -> PoseProcessingParams {
        PoseProcessingParams {
            edge_links: vec![(0, 1), (1, 2)],
            edge_colors: vec![[255, 0, 0]; 2],
            keypoint_colors: vec![[0, 255, 0]; 3],
            image_processor: Some(ImageProcessor::new(vec![
                ProcessingStep::LetterboxPad {
                    size: 32,
                    pad_value: 114,
                },
                ProcessingStep::Standardize { max_value: 255.0 },
            ])),
            conf: Some(0.0),
        }
    }

    #[test]
    fn forward_outputs_heatmap_and_offsets() {
        let device = &NdArrayDevice::default();
        let model = YoloNasPose::<B>::new(&tiny_config(), device).unwrap();

        let y = model
            .forward(Tensor::<B, 4>::zeros([1, 3, 32, 32], device).into())
            .unwrap();

        assert_eq!(y.shapes(), vec![vec![1, 4, 8, 8], vec![1, 6, 8, 8]]);
    }

    #[test]
    fn quantized_model_keeps_output_shapes() {
        let device = &NdArrayDevice::default();
        let mut model = YoloNasPose::<B>::new(&tiny_config(), device).unwrap();
        let x = Tensor::<B, 4>::ones([1, 3, 32, 32], device);

        let report = QuantizationUtility::<B>::new()
            .quantize_module(&mut model)
            .unwrap();

        assert!(report.substituted_paths().contains(&"heads.heatmap.final"));
        let root_children = model.children();
        let heads = root_children[2].1;
        assert!(heads.get("offset_modules.0.final").unwrap().is::<QuantConv2d<B>>());
        assert_eq!(
            model.forward(x.into()).unwrap().shapes(),
            vec![vec![1, 4, 8, 8], vec![1, 6, 8, 8]]
        );
    }

    #[test]
    fn predict_requires_processing_params() {
        let device = &NdArrayDevice::default();
        let model = YoloNasPose::<B>::new(&tiny_config(), device).unwrap();

        let err = model
            .predict(create_test_image(8, 8, [0, 0, 0]), None)
            .unwrap_err();
        assert!(matches!(err, PredictionError::ProcessingParamsNotSet));
    }

    #[test]
    fn pipeline_checks_colors_against_joints() {
        let device = &NdArrayDevice::default();
        let mut model = YoloNasPose::<B>::new(&tiny_config(), device).unwrap();
        model.set_dataset_processing_params(tiny_params());

        // the coco colors do not fit a 3 joint model
        model.set_dataset_processing_params(PoseProcessingParams {
            keypoint_colors: COCO_KEYPOINT_COLORS.to_vec(),
            ..Default::default()
        });
        let err = model.pipeline(None).err().unwrap();
        assert!(matches!(
            err,
            PredictionError::KeypointColorMismatch {
                colors: 17,
                joints: 3
            }
        ));

        model.set_dataset_processing_params(PoseProcessingParams {
            keypoint_colors: vec![[0; 3]; 3],
            edge_colors: vec![[0; 3]],
            ..Default::default()
        });
        let err = model.pipeline(None).err().unwrap();
        assert!(matches!(
            err,
            PredictionError::EdgeColorMismatch {
                colors: 1,
                links: 2
            }
        ));
    }

    #[test]
    fn merging_params_keeps_unset_fields() {
        let device = &NdArrayDevice::default();
        let mut model = YoloNasPose::<B>::new(&tiny_config(), device).unwrap();
        model.set_dataset_processing_params(tiny_params());
        model.set_dataset_processing_params(PoseProcessingParams {
            conf: Some(0.25),
            ..Default::default()
        });

        let params = model.processing_params().unwrap();
        assert_eq!(params.conf, Some(0.25));
        assert_eq!(params.edge_links, vec![(0, 1), (1, 2)]);
        assert!(params.image_processor.is_some());

        let pipeline = model.pipeline(None).unwrap();
        assert_eq!(pipeline.post_prediction_callback().config().min_confidence, 0.25);
        let pipeline = model.pipeline(Some(0.75)).unwrap();
        assert_eq!(pipeline.post_prediction_callback().config().min_confidence, 0.75);
    }

    #[test]
    fn zero_conf_is_not_a_fallback() {
        let device = &NdArrayDevice::default();
        let mut model = YoloNasPose::<B>::new(&tiny_config(), device).unwrap();
        model.set_dataset_processing_params(PoseProcessingParams {
            conf: Some(0.25),
            ..tiny_params()
        });

        let pipeline = model.pipeline(Some(0.0)).unwrap();
        assert_eq!(pipeline.post_prediction_callback().config().min_confidence, 0.0);
    }

    #[test]
    fn predict_and_save() {
        let device = &NdArrayDevice::default();
        let mut model = YoloNasPose::<B>::new(&tiny_config(), device).unwrap();
        model.set_dataset_processing_params(tiny_params());

        let images = vec![
            create_test_image(64, 32, [200, 10, 10]),
            create_test_image(16, 16, [10, 200, 10]),
        ];
        let predictions = model.predict(images, None).unwrap();

        assert_eq!(predictions.len(), 2);
        for prediction in predictions.iter() {
            assert_eq!(prediction.skeleton.num_joints(), 3);
            assert!(prediction.poses.iter().all(|pose| pose.keypoints.len() == 3));
        }

        let dir = tempfile::tempdir().unwrap();
        let paths = predictions.save(dir.path()).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|path| path.exists()));
    }

    #[test]
    fn predict_frames_feeds_the_sink() {
        let device = &NdArrayDevice::default();
        let mut model = YoloNasPose::<B>::new(&tiny_config(), device).unwrap();
        model.set_dataset_processing_params(tiny_params());

        let mut feed = (0..3).map(|_| create_test_image(20, 20, [0, 0, 0]));
        let mut seen = 0;
        let frames = model
            .predict_frames(&mut feed, None, |prediction| {
                assert_eq!(prediction.image.dimensions(), (20, 20));
                seen += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!((frames, seen), (3, 3));
    }
}
