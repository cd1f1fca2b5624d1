use super::pipeline::Transform;
use burn::{
    prelude::Backend,
    tensor::{Device, Tensor},
};

// ImageNet mean and std values

const MEAN: [f64; 3] = [0.485, 0.456, 0.406];
const STD: [f64; 3] = [0.229, 0.224, 0.225];

#[derive(Clone, Debug)]
pub struct ImageNormalizer<B: Backend> {
    pub mean: Tensor<B, 3>,
    pub std: Tensor<B, 3>,
}

impl<B: Backend> ImageNormalizer<B> {
    /// Creates a new normalizer.
    pub fn new(device: &Device<B>) -> Self {
        let mean = Tensor::<B, 1>::from_floats(MEAN, device).reshape([3, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(STD, device).reshape([3, 1, 1]);
        Self { mean, std }
    }

    /// Normalizes the input image according to the ImageNet dataset.
    ///
    /// The input image should be in the range [0, 1].
    ///
    /// The normalization is done according to the following formula:
    /// `input = (input - mean) / std`
    pub fn normalize(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        (input - self.mean.clone()) / self.std.clone()
    }
}

impl<B: Backend> Transform<B> {
    /// Divides every pixel value by `max_value`, `255.0` maps an RGB8 image to `[0, 1]`.
    pub fn standardize(mut self, max_value: f32) -> Self {
        self.image = self.image.div_scalar(max_value);
        self
    }

    /// Applies channel-wise ImageNet normalization to an image already in `[0, 1]`.
    pub fn imagenet_normalize(mut self) -> Self {
        self.image = ImageNormalizer::new(&self.device).normalize(self.image);
        self
    }
}
