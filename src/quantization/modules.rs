//! Fake-quantized replacements for the built-in float layers.

use burn::{
    module::Param,
    nn::{Linear, conv::Conv2d, pool::MaxPool2dConfig},
    tensor::backend::Backend,
};

use super::{PER_CHANNEL_WEIGHTS, QuantDescriptors, QuantizedLayer, TensorQuantizer};
use crate::{
    error::{LayerError, QuantizationError},
    layer_any,
    nn::{
        Attributes, Conv2dLayer, FeatureMap, Layer, LinearLayer, MaxPool2dLayer, TypeTag,
        basic::padding_from_attr, tags,
    },
};

pub const QUANT_CONV2D: TypeTag = "QuantConv2d";
pub const QUANT_LINEAR: TypeTag = "QuantLinear";
pub const QUANT_MAX_POOL2D: TypeTag = "QuantMaxPool2d";

fn unexpected_float(quantized_type: TypeTag, expected: TypeTag, found: TypeTag) -> QuantizationError {
    QuantizationError::UnexpectedFloatType {
        quantized_type,
        expected,
        found,
    }
}

/// Convolution with fake-quantized weights and inputs.
#[derive(Debug)]
pub struct QuantConv2d<B: Backend> {
    conv: Conv2d<B>,
    input_quantizer: TensorQuantizer,
    attributes: Attributes,
}

impl<B: Backend> QuantConv2d<B> {
    pub fn input_quantizer(&self) -> &TensorQuantizer {
        &self.input_quantizer
    }

    pub fn conv(&self) -> &Conv2d<B> {
        &self.conv
    }
}

impl<B: Backend> Layer<B> for QuantConv2d<B> {
    fn type_tag(&self) -> TypeTag {
        QUANT_CONV2D
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        let x = input.into_spatial(QUANT_CONV2D)?;
        let x = self.input_quantizer.quantize(x);
        Ok(self.conv.forward(x).into())
    }

    fn attributes(&self) -> Attributes {
        self.attributes.clone()
    }

    fn is_quantized(&self) -> bool {
        true
    }

    layer_any!();
}

impl<B: Backend> QuantizedLayer<B> for QuantConv2d<B> {
    const TYPE_TAG: TypeTag = QUANT_CONV2D;

    /// Copies the float weights and snaps them to the quantization grid, one scale per
    /// output channel unless `per_channel_weights` is off.
    fn from_float(
        float: &dyn Layer<B>,
        descriptors: &QuantDescriptors,
    ) -> Result<Self, QuantizationError> {
        let source = float
            .as_any()
            .downcast_ref::<Conv2dLayer<B>>()
            .ok_or_else(|| unexpected_float(QUANT_CONV2D, tags::CONV2D, float.type_tag()))?;

        let weight_quantizer = TensorQuantizer::weight(descriptors)?;
        let mut conv = source.conv.clone();
        let weight = conv.weight.val();
        let weight = if descriptors.bool_or(PER_CHANNEL_WEIGHTS, true)? {
            weight_quantizer.quantize_per_channel(weight, 0)
        } else {
            weight_quantizer.quantize(weight)
        };
        conv.weight = Param::from_tensor(weight);

        Ok(Self {
            conv,
            input_quantizer: TensorQuantizer::input(descriptors)?,
            attributes: Layer::<B>::attributes(source),
        })
    }
}

/// Fully connected layer with fake-quantized weights and inputs.
#[derive(Debug)]
pub struct QuantLinear<B: Backend> {
    linear: Linear<B>,
    input_quantizer: TensorQuantizer,
    attributes: Attributes,
}

impl<B: Backend> Layer<B> for QuantLinear<B> {
    fn type_tag(&self) -> TypeTag {
        QUANT_LINEAR
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        let x = input.into_flat(QUANT_LINEAR)?;
        let x = self.input_quantizer.quantize(x);
        Ok(self.linear.forward(x).into())
    }

    fn attributes(&self) -> Attributes {
        self.attributes.clone()
    }

    fn is_quantized(&self) -> bool {
        true
    }

    layer_any!();
}

impl<B: Backend> QuantizedLayer<B> for QuantLinear<B> {
    const TYPE_TAG: TypeTag = QUANT_LINEAR;

    fn from_float(
        float: &dyn Layer<B>,
        descriptors: &QuantDescriptors,
    ) -> Result<Self, QuantizationError> {
        let source = float
            .as_any()
            .downcast_ref::<LinearLayer<B>>()
            .ok_or_else(|| unexpected_float(QUANT_LINEAR, tags::LINEAR, float.type_tag()))?;

        let weight_quantizer = TensorQuantizer::weight(descriptors)?;
        let mut linear = source.linear.clone();
        // burn stores linear weights as [d_input, d_output]
        let weight = linear.weight.val();
        let weight = if descriptors.bool_or(PER_CHANNEL_WEIGHTS, true)? {
            weight_quantizer.quantize_per_channel(weight, 1)
        } else {
            weight_quantizer.quantize(weight)
        };
        linear.weight = Param::from_tensor(weight);

        Ok(Self {
            linear,
            input_quantizer: TensorQuantizer::input(descriptors)?,
            attributes: Layer::<B>::attributes(source),
        })
    }
}

/// Max pooling over fake-quantized inputs. Built from the float layer's attributes.
#[derive(Debug)]
pub struct QuantMaxPool2d {
    pool: MaxPool2dLayer,
    input_quantizer: TensorQuantizer,
}

impl<B: Backend> Layer<B> for QuantMaxPool2d {
    fn type_tag(&self) -> TypeTag {
        QUANT_MAX_POOL2D
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        let x = input.into_spatial(QUANT_MAX_POOL2D)?;
        let x = self.input_quantizer.quantize(x);
        Ok(self.pool.forward_tensor(x).into())
    }

    fn attributes(&self) -> Attributes {
        Layer::<B>::attributes(&self.pool)
    }

    fn is_quantized(&self) -> bool {
        true
    }

    layer_any!();
}

impl<B: Backend> QuantizedLayer<B> for QuantMaxPool2d {
    const TYPE_TAG: TypeTag = QUANT_MAX_POOL2D;
    const PARAMS: &'static [&'static str] = &["kernel_size", "stride", "padding"];

    fn new_quantized(
        args: &Attributes,
        descriptors: &QuantDescriptors,
    ) -> Result<Self, QuantizationError> {
        let config = MaxPool2dConfig::new(args.pair("kernel_size")?)
            .with_strides(args.pair("stride")?)
            .with_padding(padding_from_attr(args.get("padding")));

        Ok(Self {
            pool: MaxPool2dLayer::new(config),
            input_quantizer: TensorQuantizer::input(descriptors)?,
        })
    }
}
