use burn::{
    nn::{
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    tensor::{Tensor, activation, backend::Backend},
};
use serde::{Deserialize, Serialize};

use super::{AttrValue, Attributes, FeatureMap, Layer, TypeTag, tags};
use crate::{error::LayerError, layer_any};

pub(crate) fn padding_attr(padding: &PaddingConfig2d) -> AttrValue {
    match padding {
        PaddingConfig2d::Explicit(h, w) => AttrValue::Ints(vec![*h, *w]),
        PaddingConfig2d::Valid => AttrValue::Ints(vec![0, 0]),
        PaddingConfig2d::Same => AttrValue::Text("same".to_owned()),
    }
}

/// Inverse of [`padding_attr`].
pub(crate) fn padding_from_attr(value: Option<&AttrValue>) -> PaddingConfig2d {
    match value {
        Some(AttrValue::Ints(p)) if p.len() == 2 => PaddingConfig2d::Explicit(p[0], p[1]),
        Some(AttrValue::Int(p)) if *p > 0 => PaddingConfig2d::Explicit(*p as usize, *p as usize),
        Some(AttrValue::Text(p)) if p == "same" => PaddingConfig2d::Same,
        _ => PaddingConfig2d::Valid,
    }
}

/// 2D convolution.
#[derive(Debug)]
pub struct Conv2dLayer<B: Backend> {
    pub conv: Conv2d<B>,
    config: Conv2dConfig,
}

impl<B: Backend> Conv2dLayer<B> {
    pub fn new(config: Conv2dConfig, device: &B::Device) -> Self {
        Self {
            conv: config.init(device),
            config,
        }
    }

    pub fn config(&self) -> &Conv2dConfig {
        &self.config
    }
}

impl<B: Backend> Layer<B> for Conv2dLayer<B> {
    fn type_tag(&self) -> TypeTag {
        tags::CONV2D
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        let x = input.into_spatial(tags::CONV2D)?;
        Ok(self.conv.forward(x).into())
    }

    fn attributes(&self) -> Attributes {
        let c = &self.config;
        Attributes::new()
            .with("in_channels", c.channels[0])
            .with("out_channels", c.channels[1])
            .with("kernel_size", c.kernel_size)
            .with("stride", c.stride)
            .with("dilation", c.dilation)
            .with("groups", c.groups)
            .with("padding", padding_attr(&c.padding))
            .with("bias", c.bias)
    }

    layer_any!();
}

/// Fully connected layer over `[batch, features]` inputs.
#[derive(Debug)]
pub struct LinearLayer<B: Backend> {
    pub linear: Linear<B>,
    config: LinearConfig,
}

impl<B: Backend> LinearLayer<B> {
    pub fn new(in_features: usize, out_features: usize, bias: bool, device: &B::Device) -> Self {
        Self::from_config(
            LinearConfig::new(in_features, out_features).with_bias(bias),
            device,
        )
    }

    pub fn from_config(config: LinearConfig, device: &B::Device) -> Self {
        Self {
            linear: config.init(device),
            config,
        }
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }
}

impl<B: Backend> Layer<B> for LinearLayer<B> {
    fn type_tag(&self) -> TypeTag {
        tags::LINEAR
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        let x = input.into_flat(tags::LINEAR)?;
        Ok(self.linear.forward(x).into())
    }

    fn attributes(&self) -> Attributes {
        Attributes::new()
            .with("in_features", self.config.d_input)
            .with("out_features", self.config.d_output)
            .with("bias", self.config.bias)
    }

    layer_any!();
}

/// Batch normalization over the channel axis of spatial inputs.
#[derive(Debug)]
pub struct BatchNorm2dLayer<B: Backend> {
    pub bn: BatchNorm<B, 2>,
    num_features: usize,
}

impl<B: Backend> BatchNorm2dLayer<B> {
    pub fn new(num_features: usize, device: &B::Device) -> Self {
        Self {
            bn: BatchNormConfig::new(num_features).init(device),
            num_features,
        }
    }
}

impl<B: Backend> Layer<B> for BatchNorm2dLayer<B> {
    fn type_tag(&self) -> TypeTag {
        tags::BATCH_NORM2D
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        let x = input.into_spatial(tags::BATCH_NORM2D)?;
        Ok(self.bn.forward(x).into())
    }

    fn attributes(&self) -> Attributes {
        Attributes::new().with("num_features", self.num_features)
    }

    layer_any!();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationKind {
    Relu,
    Silu,
    Sigmoid,
    Identity,
}

impl ActivationKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActivationKind::Relu => "relu",
            ActivationKind::Silu => "silu",
            ActivationKind::Sigmoid => "sigmoid",
            ActivationKind::Identity => "identity",
        }
    }

    fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            ActivationKind::Relu => activation::relu(x),
            ActivationKind::Silu => activation::silu(x),
            ActivationKind::Sigmoid => activation::sigmoid(x),
            ActivationKind::Identity => x,
        }
    }
}

/// Element-wise activation, applied to every tensor of the input.
#[derive(Debug, Clone)]
pub struct Activation {
    kind: ActivationKind,
}

impl Activation {
    pub fn new(kind: ActivationKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> ActivationKind {
        self.kind
    }
}

impl<B: Backend> Layer<B> for Activation {
    fn type_tag(&self) -> TypeTag {
        tags::ACTIVATION
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        Ok(match input {
            FeatureMap::Flat(x) => FeatureMap::Flat(self.kind.apply(x)),
            FeatureMap::Spatial(x) => FeatureMap::Spatial(self.kind.apply(x)),
            FeatureMap::Pyramid(xs) => {
                FeatureMap::Pyramid(xs.into_iter().map(|x| self.kind.apply(x)).collect())
            }
        })
    }

    fn attributes(&self) -> Attributes {
        Attributes::new().with("kind", self.kind.name())
    }

    layer_any!();
}

/// `[N, C, H, W] -> [N, C * H * W]`
#[derive(Debug, Clone, Default)]
pub struct Flatten;

impl Flatten {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Layer<B> for Flatten {
    fn type_tag(&self) -> TypeTag {
        tags::FLATTEN
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        let x = input.into_spatial(tags::FLATTEN)?;
        Ok(x.flatten::<2>(1, 3).into())
    }

    layer_any!();
}

/// Rearranges `[N, C * r * r, H, W]` into `[N, C, H * r, W * r]`.
#[derive(Debug, Clone)]
pub struct PixelShuffle {
    upscale_factor: usize,
}

impl PixelShuffle {
    pub fn new(upscale_factor: usize) -> Self {
        Self { upscale_factor }
    }
}

impl<B: Backend> Layer<B> for PixelShuffle {
    fn type_tag(&self) -> TypeTag {
        tags::PIXEL_SHUFFLE
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        let x = input.into_spatial(tags::PIXEL_SHUFFLE)?;
        let r = self.upscale_factor;
        let [n, c, h, w] = x.dims();

        if r == 0 || c % (r * r) != 0 {
            return Err(LayerError::Shape {
                layer: tags::PIXEL_SHUFFLE,
                detail: format!("{c} channels are not divisible by upscale factor {r} squared"),
            });
        }

        let out_c = c / (r * r);
        let x = x
            .reshape([n, out_c, r, r, h, w])
            .permute([0, 1, 4, 2, 5, 3])
            .reshape([n, out_c, h * r, w * r]);

        Ok(x.into())
    }

    fn attributes(&self) -> Attributes {
        Attributes::new().with("upscale_factor", self.upscale_factor)
    }

    layer_any!();
}

/// 2D max pooling.
#[derive(Debug)]
pub struct MaxPool2dLayer {
    pool: MaxPool2d,
    config: MaxPool2dConfig,
}

impl MaxPool2dLayer {
    pub fn new(config: MaxPool2dConfig) -> Self {
        Self {
            pool: config.init(),
            config,
        }
    }

    pub fn config(&self) -> &MaxPool2dConfig {
        &self.config
    }

    pub(crate) fn forward_tensor<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pool.forward(x)
    }
}

impl<B: Backend> Layer<B> for MaxPool2dLayer {
    fn type_tag(&self) -> TypeTag {
        tags::MAX_POOL2D
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        let x = input.into_spatial(tags::MAX_POOL2D)?;
        Ok(self.forward_tensor(x).into())
    }

    fn attributes(&self) -> Attributes {
        Attributes::new()
            .with("kernel_size", self.config.kernel_size)
            .with("stride", self.config.strides)
            .with("padding", padding_attr(&self.config.padding))
            .with("dilation", self.config.dilation)
    }

    layer_any!();
}

/// Pass-through.
#[derive(Debug, Clone, Default)]
pub struct Identity;

impl Identity {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Layer<B> for Identity {
    fn type_tag(&self) -> TypeTag {
        tags::IDENTITY
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        Ok(input)
    }

    layer_any!();
}
