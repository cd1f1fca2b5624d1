use burn::{
    nn::{PaddingConfig2d, conv::Conv2dConfig},
    tensor::backend::Backend,
};

use super::{
    Activation, ActivationKind, Attributes, BatchNorm2dLayer, Conv2dLayer, FeatureMap, Layer,
    Node, TypeTag, tags,
};
use crate::{error::LayerError, layer_any};

/// Convolution, batch norm and activation, in that order.
///
/// The three parts are held as nodes, so a quantization pass can replace the convolution
/// while the block keeps its own identity.
#[derive(Debug)]
pub struct ConvBnAct<B: Backend> {
    conv: Node<B>,
    bn: Node<B>,
    act: Node<B>,
    attributes: Attributes,
}

impl<B: Backend> ConvBnAct<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        bias: bool,
        activation: ActivationKind,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_bias(bias);

        let attributes = Attributes::new()
            .with("in_channels", in_channels)
            .with("out_channels", out_channels)
            .with("kernel_size", kernel_size)
            .with("stride", stride)
            .with("padding", padding)
            .with("bias", bias)
            .with("activation", activation.name());

        Self {
            conv: Node::new(Conv2dLayer::new(conv, device)),
            bn: Node::new(BatchNorm2dLayer::new(out_channels, device)),
            act: Node::new(Activation::new(activation)),
            attributes,
        }
    }

    pub fn conv(&self) -> &Node<B> {
        &self.conv
    }
}

impl<B: Backend> Layer<B> for ConvBnAct<B> {
    fn type_tag(&self) -> TypeTag {
        tags::CONV_BN_ACT
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        let x = self.conv.forward(input)?;
        let x = self.bn.forward(x)?;
        self.act.forward(x)
    }

    fn children(&self) -> Vec<(String, &Node<B>)> {
        vec![
            ("conv".to_owned(), &self.conv),
            ("bn".to_owned(), &self.bn),
            ("act".to_owned(), &self.act),
        ]
    }

    fn children_mut(&mut self) -> Vec<(String, &mut Node<B>)> {
        vec![
            ("conv".to_owned(), &mut self.conv),
            ("bn".to_owned(), &mut self.bn),
            ("act".to_owned(), &mut self.act),
        ]
    }

    fn attributes(&self) -> Attributes {
        self.attributes.clone()
    }

    layer_any!();
}
