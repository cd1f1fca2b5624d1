use thiserror::Error;

use crate::nn::TypeTag;

/// Errors raised while running a forward pass through a module tree.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("{layer} expects a {expected} input, got {found}")]
    UnexpectedInput {
        layer: TypeTag,
        expected: &'static str,
        found: &'static str,
    },
    #[error("{0} is a container and cannot be called directly")]
    NotCallable(TypeTag),
    #[error("{layer}: {detail}")]
    Shape { layer: TypeTag, detail: String },
}

/// Errors raised while rewriting a module tree with quantized replacements.
///
/// These are always raised during the rewrite itself, never on a later forward pass.
#[derive(Debug, Error)]
pub enum QuantizationError {
    #[error(
        "cannot build {quantized_type} from {float_type}: missing attribute(s) {missing:?} on the float module"
    )]
    AttributeMismatch {
        float_type: TypeTag,
        quantized_type: TypeTag,
        missing: Vec<String>,
    },
    #[error("attribute `{name}` has the wrong type, expected {expected}")]
    AttributeType { name: String, expected: &'static str },
    #[error("{quantized_type} can only be built from {expected}, got {found}")]
    UnexpectedFloatType {
        quantized_type: TypeTag,
        expected: TypeTag,
        found: TypeTag,
    },
    #[error("{0} defines neither `from_float` nor `new_quantized`")]
    MissingConstructor(TypeTag),
    #[error("invalid quantization descriptor `{key}`: {reason}")]
    InvalidDescriptor { key: String, reason: String },
    #[error(transparent)]
    Layer(#[from] LayerError),
}

/// Errors raised while building a model from an architecture config.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown model `{name}`, available models: {available:?}")]
    UnknownModel {
        name: String,
        available: Vec<&'static str>,
    },
    #[error("invalid architecture params: {0}")]
    InvalidArchParams(String),
    #[error("could not merge architecture overrides: {0}")]
    Overrides(#[from] serde_json::Error),
}

/// Errors raised by the prediction pipeline.
///
/// Configuration preconditions are validated before any image is processed.
#[derive(Debug, Error)]
pub enum PredictionError {
    #[error(
        "dataset processing parameters are not set, call `set_dataset_processing_params` before predicting"
    )]
    ProcessingParamsNotSet,
    #[error(
        "the number of keypoint colors ({colors}) does not match the number of joints ({joints})"
    )]
    KeypointColorMismatch { colors: usize, joints: usize },
    #[error(
        "the number of edge colors ({colors}) does not match the number of joint links ({links})"
    )]
    EdgeColorMismatch { colors: usize, links: usize },
    #[error("edge link ({0}, {1}) references a joint outside the skeleton")]
    InvalidEdgeLink(usize, usize),
    #[error("the image source is empty")]
    EmptySource,
    #[error("unexpected model output: {0}")]
    ModelOutput(String),
    #[error("tensor data error: {0}")]
    TensorData(String),
    #[error(transparent)]
    Layer(#[from] LayerError),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
