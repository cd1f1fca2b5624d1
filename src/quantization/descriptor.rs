use std::collections::BTreeMap;

use burn::tensor::{Tensor, backend::Backend, cast::ToElement};

use crate::{config::QuantizationConfig, error::QuantizationError};

pub const NUM_BITS: &str = "num_bits";
pub const NARROW_RANGE: &str = "narrow_range";
pub const PER_CHANNEL_WEIGHTS: &str = "per_channel_weights";
pub const INPUT_AMAX: &str = "input_amax";

#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

/// Keyword-style bundle handed verbatim to every quantized construction.
///
/// Consumers read the keys they understand and ignore the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuantDescriptors(BTreeMap<String, DescriptorValue>);

impl QuantDescriptors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: DescriptorValue) -> Self {
        self.0.insert(key.to_owned(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&DescriptorValue> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn usize_or(&self, key: &str, default: usize) -> Result<usize, QuantizationError> {
        match self.get(key) {
            None => Ok(default),
            Some(DescriptorValue::Int(v)) if *v >= 0 => Ok(*v as usize),
            Some(other) => Err(invalid(key, "a non-negative integer", other)),
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, QuantizationError> {
        match self.get(key) {
            None => Ok(default),
            Some(DescriptorValue::Bool(v)) => Ok(*v),
            Some(other) => Err(invalid(key, "a boolean", other)),
        }
    }

    pub fn float(&self, key: &str) -> Result<Option<f64>, QuantizationError> {
        match self.get(key) {
            None => Ok(None),
            Some(DescriptorValue::Float(v)) => Ok(Some(*v)),
            Some(DescriptorValue::Int(v)) => Ok(Some(*v as f64)),
            Some(other) => Err(invalid(key, "a number", other)),
        }
    }
}

fn invalid(key: &str, expected: &str, found: &DescriptorValue) -> QuantizationError {
    QuantizationError::InvalidDescriptor {
        key: key.to_owned(),
        reason: format!("expected {expected}, got {found:?}"),
    }
}

impl From<&QuantizationConfig> for QuantDescriptors {
    fn from(config: &QuantizationConfig) -> Self {
        let descriptors = QuantDescriptors::new()
            .with(NUM_BITS, DescriptorValue::Int(config.num_bits as i64))
            .with(NARROW_RANGE, DescriptorValue::Bool(config.narrow_range))
            .with(
                PER_CHANNEL_WEIGHTS,
                DescriptorValue::Bool(config.per_channel_weights),
            );

        match config.input_amax {
            Some(amax) => descriptors.with(INPUT_AMAX, DescriptorValue::Float(amax)),
            None => descriptors,
        }
    }
}

/// Symmetric fake quantizer: values are snapped onto an `num_bits` integer grid and
/// mapped back to floats, so the tensor keeps its dtype and shape.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorQuantizer {
    num_bits: usize,
    narrow_range: bool,
    amax: Option<f32>,
}

impl TensorQuantizer {
    pub fn new(num_bits: usize, narrow_range: bool, amax: Option<f32>) -> Self {
        Self {
            num_bits,
            narrow_range,
            amax,
        }
    }

    /// Input quantizer described by the bundle (`num_bits`, `narrow_range`, `input_amax`).
    pub fn input(descriptors: &QuantDescriptors) -> Result<Self, QuantizationError> {
        let amax = descriptors.float(INPUT_AMAX)?.map(|v| v as f32);
        Ok(Self::new(
            Self::num_bits_from(descriptors)?,
            descriptors.bool_or(NARROW_RANGE, true)?,
            amax,
        ))
    }

    /// Weight quantizer described by the bundle. Weights are always calibrated on the
    /// weights themselves.
    pub fn weight(descriptors: &QuantDescriptors) -> Result<Self, QuantizationError> {
        Ok(Self::new(
            Self::num_bits_from(descriptors)?,
            descriptors.bool_or(NARROW_RANGE, true)?,
            None,
        ))
    }

    fn num_bits_from(descriptors: &QuantDescriptors) -> Result<usize, QuantizationError> {
        let num_bits = descriptors.usize_or(NUM_BITS, 8)?;
        if !(2..=16).contains(&num_bits) {
            return Err(QuantizationError::InvalidDescriptor {
                key: NUM_BITS.to_owned(),
                reason: format!("{num_bits} bits is outside 2..=16"),
            });
        }
        Ok(num_bits)
    }

    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    pub fn amax(&self) -> Option<f32> {
        self.amax
    }

    /// Largest representable integer.
    pub fn max_bound(&self) -> f32 {
        ((1u32 << (self.num_bits - 1)) - 1) as f32
    }

    pub fn min_bound(&self) -> f32 {
        if self.narrow_range {
            -self.max_bound()
        } else {
            -self.max_bound() - 1.0
        }
    }

    /// Per-tensor fake quantization, with the calibrated `amax` or the tensor's own.
    pub fn quantize<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let amax = match self.amax {
            Some(amax) => amax,
            None => x.clone().abs().max().into_scalar().to_f32(),
        };

        if amax <= 0.0 || !amax.is_finite() {
            return x;
        }

        let scale = amax / self.max_bound();
        x.div_scalar(scale)
            .round()
            .clamp(self.min_bound(), self.max_bound())
            .mul_scalar(scale)
    }

    /// Fake quantization with one scale per index of `axis`.
    pub fn quantize_per_channel<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        axis: usize,
    ) -> Tensor<B, D> {
        let mut amax = x.clone().abs();
        for dim in 0..D {
            if dim != axis {
                amax = amax.max_dim(dim);
            }
        }

        let scale = amax
            .clamp_min(f32::EPSILON)
            .div_scalar(self.max_bound())
            .expand(x.shape());

        x.div(scale.clone())
            .round()
            .clamp(self.min_bound(), self.max_bound())
            .mul(scale)
    }
}
