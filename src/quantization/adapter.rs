use std::fmt;

use burn::tensor::backend::Backend;

use super::QuantDescriptors;
use crate::{
    error::QuantizationError,
    nn::{Attributes, Layer, TypeTag},
};

/// Contract of a quantized replacement.
///
/// A type either overrides [`from_float`](QuantizedLayer::from_float) or relies on the
/// default, which reads the float module's [`Attributes`] named in
/// [`PARAMS`](QuantizedLayer::PARAMS) and forwards them, together with the descriptor
/// bundle, to [`new_quantized`](QuantizedLayer::new_quantized). Implementors also answer
/// `true` to [`Layer::is_quantized`].
pub trait QuantizedLayer<B: Backend>: Layer<B> + Sized {
    const TYPE_TAG: TypeTag;

    /// Constructor parameters expected as attributes on the float module.
    const PARAMS: &'static [&'static str] = &[];

    fn new_quantized(
        _args: &Attributes,
        _descriptors: &QuantDescriptors,
    ) -> Result<Self, QuantizationError> {
        Err(QuantizationError::MissingConstructor(Self::TYPE_TAG))
    }

    fn from_float(
        float: &dyn Layer<B>,
        descriptors: &QuantDescriptors,
    ) -> Result<Self, QuantizationError> {
        let attributes = float.attributes();
        let missing: Vec<String> = Self::PARAMS
            .iter()
            .filter(|name| !attributes.contains(name))
            .map(|name| name.to_string())
            .collect();

        if !missing.is_empty() {
            return Err(QuantizationError::AttributeMismatch {
                float_type: float.type_tag(),
                quantized_type: Self::TYPE_TAG,
                missing,
            });
        }

        Self::new_quantized(&attributes.select(Self::PARAMS), descriptors)
    }
}

/// Builds a quantized replacement from a float layer.
pub type QuantizedConstructor<B> =
    fn(&dyn Layer<B>, &QuantDescriptors) -> Result<Box<dyn Layer<B>>, QuantizationError>;

fn construct<B: Backend, Q: QuantizedLayer<B>>(
    float: &dyn Layer<B>,
    descriptors: &QuantDescriptors,
) -> Result<Box<dyn Layer<B>>, QuantizationError> {
    Ok(Box::new(Q::from_float(float, descriptors)?))
}

/// Mapping entry: which quantized type a float module becomes, and how to build it.
pub struct QuantizedMapping<B: Backend> {
    quantized_type: TypeTag,
    constructor: QuantizedConstructor<B>,
}

impl<B: Backend> QuantizedMapping<B> {
    pub fn of<Q: QuantizedLayer<B>>() -> Self {
        Self {
            quantized_type: Q::TYPE_TAG,
            constructor: construct::<B, Q>,
        }
    }

    pub fn from_constructor(quantized_type: TypeTag, constructor: QuantizedConstructor<B>) -> Self {
        Self {
            quantized_type,
            constructor,
        }
    }

    pub fn quantized_type(&self) -> TypeTag {
        self.quantized_type
    }

    pub fn quantize(
        &self,
        float: &dyn Layer<B>,
        descriptors: &QuantDescriptors,
    ) -> Result<Box<dyn Layer<B>>, QuantizationError> {
        (self.constructor)(float, descriptors)
    }
}

impl<B: Backend> Clone for QuantizedMapping<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: Backend> Copy for QuantizedMapping<B> {}

impl<B: Backend> fmt::Debug for QuantizedMapping<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuantizedMapping")
            .field("quantized_type", &self.quantized_type)
            .finish()
    }
}
