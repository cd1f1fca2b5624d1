use burn::{nn::pool::MaxPool2dConfig, tensor::backend::Backend};

use crate::{
    error::{LayerError, ModelError},
    layer_any,
    layers::BackboneLevel,
    nn::{
        ActivationKind, Attributes, ConvBnAct, FeatureMap, Layer, MaxPool2dLayer, Node, Sequential,
        TypeTag,
    },
};

pub const VGG_BACKBONE: TypeTag = "VggBackbone";

/// Number of downsampling stages of the backbone.
pub const NUM_STAGES: usize = 5;

/// VGG style backbone, after table 1 of
///
/// “Very Deep Convolutional Networks for Large-Scale Image Recognition”
/// Authors: Karen Simonyan, Andrew Zisserman
/// Link (official): https://arxiv.org/abs/1409.1556
///
/// Each of the five stages stacks `depth` 3×3 conv-bn-act blocks and ends with a 2×2 max
/// pool, so stage `i` runs at 1/2^(i+1) of the input resolution. The fully connected
/// classifier is dropped; the outputs of the last three stages are returned as a
/// [`FeatureMap::Pyramid`] ordered as [`BackboneLevel::as_list`].
///
/// Stages are plain [`Sequential`] nodes named `stage0` .. `stage4`, with blocks named
/// `conv{i}_{j}` and a trailing `pool`, so any of them can be addressed by path.
#[derive(Debug)]
pub struct VggBackbone<B: Backend> {
    stages: Vec<Node<B>>,
    widths: Vec<usize>,
    depths: Vec<usize>,
}

impl<B: Backend> VggBackbone<B> {
    pub fn new(
        in_channels: usize,
        widths: &[usize],
        depths: &[usize],
        activation: ActivationKind,
        device: &B::Device,
    ) -> Result<Self, ModelError> {
        if widths.len() != NUM_STAGES || depths.len() != NUM_STAGES {
            return Err(ModelError::InvalidArchParams(format!(
                "the backbone needs {NUM_STAGES} stage widths and depths, got {} and {}",
                widths.len(),
                depths.len()
            )));
        }
        if depths.contains(&0) || widths.contains(&0) {
            return Err(ModelError::InvalidArchParams(
                "backbone stage widths and depths must be positive".to_owned(),
            ));
        }

        let mut stages = Vec::with_capacity(NUM_STAGES);
        let mut channels = in_channels;

        for (i, (&width, &depth)) in widths.iter().zip(depths).enumerate() {
            let mut stage = Sequential::<B>::new();
            for j in 0..depth {
                // convX_1 changes the width, the rest keep it
                let block = ConvBnAct::<B>::new(channels, width, 3, 1, 1, false, activation, device);
                stage = stage.push(&format!("conv{}_{}", i + 1, j + 1), block);
                channels = width;
            }
            stage = stage.push(
                "pool",
                MaxPool2dLayer::new(MaxPool2dConfig::new([2, 2]).with_strides([2, 2])),
            );
            stages.push(Node::new(stage));
        }

        Ok(Self {
            stages,
            widths: widths.to_vec(),
            depths: depths.to_vec(),
        })
    }

    /// Channels of each emitted level, in pyramid order.
    pub fn out_channels(&self) -> Vec<usize> {
        BackboneLevel::as_list()
            .iter()
            .map(|level| self.widths[level.stage()])
            .collect()
    }
}

impl<B: Backend> Layer<B> for VggBackbone<B> {
    fn type_tag(&self) -> TypeTag {
        VGG_BACKBONE
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        let levels = BackboneLevel::as_list();
        let mut x = input;
        let mut outputs = Vec::with_capacity(levels.len());

        for (i, stage) in self.stages.iter().enumerate() {
            x = stage.forward(x)?;
            if levels.iter().any(|level| level.stage() == i) {
                outputs.push(x.clone().into_spatial(VGG_BACKBONE)?);
            }
        }

        Ok(FeatureMap::Pyramid(outputs))
    }

    fn children(&self) -> Vec<(String, &Node<B>)> {
        self.stages
            .iter()
            .enumerate()
            .map(|(i, stage)| (format!("stage{i}"), stage))
            .collect()
    }

    fn children_mut(&mut self) -> Vec<(String, &mut Node<B>)> {
        self.stages
            .iter_mut()
            .enumerate()
            .map(|(i, stage)| (format!("stage{i}"), stage))
            .collect()
    }

    fn attributes(&self) -> Attributes {
        Attributes::new()
            .with("widths", self.widths.clone())
            .with("depths", self.depths.clone())
    }

    layer_any!();
}
