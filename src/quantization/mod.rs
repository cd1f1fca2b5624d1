//! Post-training quantization of module trees.
//!
//! A [`QuantizationUtility`] walks a tree of [`Node`](crate::nn::Node)s and swaps float
//! layers for fake-quantized replacements in place. What gets replaced, and by what, is
//! decided per node by construction-time markers ([`SkipQuantization`], [`QuantizeWith`]),
//! the session's [`SkipSet`] and the [`MappingRegistry`].

pub mod adapter;
pub mod descriptor;
pub mod mapping;
pub mod modules;
pub mod skip;
pub mod utility;

pub use adapter::{QuantizedConstructor, QuantizedLayer, QuantizedMapping};
pub use descriptor::{
    DescriptorValue, INPUT_AMAX, NARROW_RANGE, NUM_BITS, PER_CHANNEL_WEIGHTS, QuantDescriptors,
    TensorQuantizer,
};
pub use mapping::{MappingRegistry, QuantizeWith, register_quantized_module};
pub use modules::{QuantConv2d, QuantLinear, QuantMaxPool2d};
pub use skip::{SkipDirective, SkipQuantization, SkipSet};
pub use utility::{QuantizationUtility, RewriteReport, Substitution};
