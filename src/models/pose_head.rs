use burn::{
    nn::conv::Conv2dConfig,
    tensor::{
        Tensor,
        backend::Backend,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

use crate::{
    error::{LayerError, ModelError},
    layer_any,
    nn::{
        ActivationKind, Attributes, Conv2dLayer, ConvBnAct, FeatureMap, Layer, ModuleList, Node,
        PixelShuffle, Sequential, TypeTag,
    },
};

pub const POSE_HEAD: TypeTag = "YoloNasPoseHead";

/// Hyper parameters of [`YoloNasPoseHead`].
#[derive(Debug, Clone, PartialEq)]
pub struct PoseHeadParams {
    /// Number of joints.
    pub num_classes: usize,
    /// Channels of each backbone level.
    pub in_channels: Vec<usize>,
    pub inter_channels: usize,
    pub channels_per_kpt: usize,
    pub num_blocks: usize,
    pub upsample_factor: usize,
    pub activation: ActivationKind,
}

impl PoseHeadParams {
    /// Channel multiplier of the `final` convs ahead of the pixel shuffle.
    fn shuffle_channels(&self) -> usize {
        1 << self.upsample_factor
    }

    fn validate(&self) -> Result<(), ModelError> {
        let u = self.upsample_factor;
        if self.num_classes == 0 || self.in_channels.is_empty() {
            return Err(ModelError::InvalidArchParams(
                "the pose head needs at least one joint and one input level".to_owned(),
            ));
        }
        // the shuffle has to fold 2^u channels back into exactly one
        if u == 0 || u >= usize::BITS as usize || self.shuffle_channels() != u * u {
            return Err(ModelError::InvalidArchParams(format!(
                "upsample factor {u} cannot be undone by a pixel shuffle: 2^{u} is not {u}²"
            )));
        }
        Ok(())
    }
}

/// Pose head predicting a joint heatmap plus per-joint offsets, as used by DEKR:
///
/// “Bottom-Up Human Pose Estimation Via Disentangled Keypoint Regression”
/// Authors: Zigang Geng, Ke Sun, Bin Xiao, Zhaoxiang Zhang, Jingdong Wang
/// Link (official): https://arxiv.org/abs/2104.02300
///
/// All backbone levels are resized to the largest one and concatenated, then squeezed by
/// a 1×1 `stem`. The `heatmap` path predicts `num_classes + 1` maps, the extra last map
/// being the pose centers. The `offset_transition` splits the features into one group of
/// `channels_per_kpt` channels per joint, each refined by its own path in
/// `offset_modules` into a 2-channel (dx, dy) offset map. Both paths end with a pixel
/// shuffle doubling the resolution.
#[derive(Debug)]
pub struct YoloNasPoseHead<B: Backend> {
    stem: Node<B>,
    heatmap: Node<B>,
    offset_transition: Node<B>,
    offset_modules: Node<B>,
    params: PoseHeadParams,
}

impl<B: Backend> YoloNasPoseHead<B> {
    pub fn new(params: PoseHeadParams, device: &B::Device) -> Result<Self, ModelError> {
        params.validate()?;

        let act = params.activation;
        let stem = ConvBnAct::<B>::new(
            params.in_channels.iter().sum(),
            params.inter_channels,
            1,
            1,
            0,
            false,
            act,
            device,
        );
        let heatmap = Self::build_path(
            params.inter_channels,
            params.num_blocks,
            (params.num_classes + 1) * params.shuffle_channels(),
            &params,
            device,
        );
        let offset_transition = ConvBnAct::<B>::new(
            params.inter_channels,
            params.channels_per_kpt * params.num_classes,
            3,
            1,
            1,
            false,
            act,
            device,
        );
        let offset_modules = ModuleList::new(
            (0..params.num_classes)
                .map(|_| {
                    Node::new(Self::build_path(
                        params.channels_per_kpt,
                        params.num_blocks,
                        2 * params.shuffle_channels(),
                        &params,
                        device,
                    ))
                })
                .collect(),
        );

        Ok(Self {
            stem: Node::new(stem),
            heatmap: Node::new(heatmap),
            offset_transition: Node::new(offset_transition),
            offset_modules: Node::new(offset_modules),
            params,
        })
    }

    /// `conv_bn_act_XX` blocks, then a 1×1 `final` conv and the `shuffle`.
    fn build_path(
        channels: usize,
        num_blocks: usize,
        final_channels: usize,
        params: &PoseHeadParams,
        device: &B::Device,
    ) -> Sequential<B> {
        let mut path = Sequential::<B>::new();
        for block_index in 0..num_blocks {
            path = path.push(
                &format!("conv_bn_act_{block_index:02}"),
                ConvBnAct::<B>::new(channels, channels, 3, 1, 1, false, params.activation, device),
            );
        }

        path.push(
            "final",
            Conv2dLayer::<B>::new(Conv2dConfig::new([channels, final_channels], [1, 1]), device),
        )
        .push("shuffle", PixelShuffle::new(params.upsample_factor))
    }

    pub fn params(&self) -> &PoseHeadParams {
        &self.params
    }

    /// Channels of the heatmap and offset outputs.
    pub fn out_channels(&self) -> (usize, usize) {
        (self.params.num_classes + 1, 2 * self.params.num_classes)
    }
}

impl<B: Backend> Layer<B> for YoloNasPoseHead<B> {
    fn type_tag(&self) -> TypeTag {
        POSE_HEAD
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        let feats = input.into_pyramid(POSE_HEAD)?;
        let [_, _, height, width] = feats
            .first()
            .map(|x| x.dims())
            .ok_or_else(|| LayerError::Shape {
                layer: POSE_HEAD,
                detail: "empty feature pyramid".to_owned(),
            })?;

        let feats: Vec<Tensor<B, 4>> = feats
            .into_iter()
            .map(|x| {
                let [_, _, h, w] = x.dims();
                if (h, w) == (height, width) {
                    x
                } else {
                    interpolate(
                        x,
                        [height, width],
                        InterpolateOptions::new(InterpolateMode::Bilinear),
                    )
                }
            })
            .collect();

        let feats = self.stem.forward(Tensor::cat(feats, 1))?;
        let heatmap = self.heatmap.forward(feats.clone())?.into_spatial(POSE_HEAD)?;
        let offset_features = self
            .offset_transition
            .forward(feats)?
            .into_spatial(POSE_HEAD)?;

        let per_kpt = self.params.channels_per_kpt;
        let offsets = self
            .offset_modules
            .children()
            .into_iter()
            .enumerate()
            .map(|(j, (_, path))| {
                let group = offset_features.clone().narrow(1, j * per_kpt, per_kpt);
                path.forward(group)?.into_spatial(POSE_HEAD)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FeatureMap::Pyramid(vec![heatmap, Tensor::cat(offsets, 1)]))
    }

    fn children(&self) -> Vec<(String, &Node<B>)> {
        vec![
            ("stem".to_owned(), &self.stem),
            ("heatmap".to_owned(), &self.heatmap),
            ("offset_transition".to_owned(), &self.offset_transition),
            ("offset_modules".to_owned(), &self.offset_modules),
        ]
    }

    fn children_mut(&mut self) -> Vec<(String, &mut Node<B>)> {
        vec![
            ("stem".to_owned(), &mut self.stem),
            ("heatmap".to_owned(), &mut self.heatmap),
            ("offset_transition".to_owned(), &mut self.offset_transition),
            ("offset_modules".to_owned(), &mut self.offset_modules),
        ]
    }

    fn attributes(&self) -> Attributes {
        let p = &self.params;
        Attributes::new()
            .with("num_classes", p.num_classes)
            .with("in_channels", p.in_channels.clone())
            .with("inter_channels", p.inter_channels)
            .with("channels_per_kpt", p.channels_per_kpt)
            .with("num_blocks", p.num_blocks)
            .with("upsample_factor", p.upsample_factor)
    }

    layer_any!();
}
