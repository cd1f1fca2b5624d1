use burn::tensor::backend::Backend;
use tracing::{debug, info};

use super::{
    MappingRegistry, QuantDescriptors, QuantizeWith, QuantizedMapping, SkipQuantization, SkipSet,
};
use crate::{
    config::QuantizationConfig,
    error::QuantizationError,
    nn::{Layer, Node, NodeId, TypeTag, join_path},
};

/// One float module replaced by a quantized one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub path: String,
    pub float_type: TypeTag,
    pub quantized_type: TypeTag,
}

/// What a rewrite pass did, in traversal order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    pub substitutions: Vec<Substitution>,
    /// Paths kept float because of a skip marker or a skip directive.
    pub skipped: Vec<String>,
    /// Containers rebuilt because they hold a replaced child.
    pub rebuilt: Vec<String>,
}

impl RewriteReport {
    pub fn is_empty(&self) -> bool {
        self.substitutions.is_empty() && self.rebuilt.is_empty()
    }

    pub fn substituted_paths(&self) -> Vec<&str> {
        self.substitutions.iter().map(|s| s.path.as_str()).collect()
    }
}

/// One quantization session: mappings, skips and the descriptor bundle used for every
/// replacement.
///
/// A utility starts from the process-wide mappings; everything registered on it afterwards
/// stays local to it.
#[derive(Debug, Clone)]
pub struct QuantizationUtility<B: Backend> {
    mappings: MappingRegistry<B>,
    skips: SkipSet,
    descriptors: QuantDescriptors,
}

impl<B: Backend> Default for QuantizationUtility<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> QuantizationUtility<B> {
    pub fn new() -> Self {
        Self::with_config(&QuantizationConfig::new())
    }

    pub fn with_config(config: &QuantizationConfig) -> Self {
        Self::with_descriptors(QuantDescriptors::from(config))
    }

    pub fn with_descriptors(descriptors: QuantDescriptors) -> Self {
        Self {
            mappings: MappingRegistry::global(),
            skips: SkipSet::new(),
            descriptors,
        }
    }

    pub fn mappings(&self) -> &MappingRegistry<B> {
        &self.mappings
    }

    pub fn skips(&self) -> &SkipSet {
        &self.skips
    }

    pub fn descriptors(&self) -> &QuantDescriptors {
        &self.descriptors
    }

    /// Keeps the modules at these qualified paths, and their subtrees, float.
    pub fn register_skip_quantization<S: Into<String>>(
        &mut self,
        layer_names: impl IntoIterator<Item = S>,
    ) {
        for name in layer_names {
            self.skips.add_path(name);
        }
    }

    pub fn register_skip_instance(&mut self, node: NodeId) {
        self.skips.add_instance(node);
    }

    /// Replaces the modules at these qualified paths using `mapping`, whatever their type.
    pub fn register_quantization_mapping<S: Into<String>>(
        &mut self,
        layer_names: impl IntoIterator<Item = S>,
        mapping: QuantizedMapping<B>,
    ) {
        for name in layer_names {
            self.mappings.register_path(name, mapping);
        }
    }

    pub fn register_instance_mapping(&mut self, node: NodeId, mapping: QuantizedMapping<B>) {
        self.mappings.register_instance(node, mapping);
    }

    pub fn register_type_mapping(&mut self, float_type: TypeTag, mapping: QuantizedMapping<B>) {
        self.mappings.register(float_type, mapping);
    }

    /// Rewrites every descendant of `root` in place. The root itself is kept.
    pub fn quantize_module(&self, root: &mut dyn Layer<B>) -> Result<RewriteReport, QuantizationError> {
        let mut report = RewriteReport::default();
        for (name, child) in root.children_mut() {
            self.rewrite(child, &name, &mut report)?;
        }

        summarize(root.type_tag(), &report);
        Ok(report)
    }

    /// Rewrites `root` and its subtree in place. The root may itself be replaced.
    pub fn quantize_node(&self, root: &mut Node<B>) -> Result<RewriteReport, QuantizationError> {
        let mut report = RewriteReport::default();
        self.rewrite(root, "", &mut report)?;

        summarize(root.type_tag(), &report);
        Ok(report)
    }

    /// Returns `true` when the slot now holds a different node.
    fn rewrite(
        &self,
        node: &mut Node<B>,
        path: &str,
        report: &mut RewriteReport,
    ) -> Result<bool, QuantizationError> {
        let unwrapped = node
            .downcast_mut::<SkipQuantization<B>>()
            .map(SkipQuantization::take_inner);
        if let Some(inner) = unwrapped {
            *node = inner;
            debug!(path, "skipped by marker");
            report.skipped.push(path.to_owned());
            return Ok(false);
        }

        // a QuantizeWith marker keeps the slot, and its id, until the replacement is built
        let explicit = node.downcast_ref::<QuantizeWith<B>>().map(QuantizeWith::mapping);

        if self.skips.is_skipped(node.id(), path) {
            debug!(path, node = %node.id(), "skipped by directive");
            unwrap_explicit(node);
            report.skipped.push(path.to_owned());
            return Ok(false);
        }

        let num_children = node.children().len();
        let mut child_replaced = false;
        let children = node.layer_mut().children_mut();
        debug_assert_eq!(children.len(), num_children, "children_mut out of sync with children");
        for (name, child) in children {
            let child_path = join_path(path, &name);
            child_replaced |= self.rewrite(child, &child_path, report)?;
        }

        if float_layer(node).is_quantized() {
            unwrap_explicit(node);
            return Ok(false);
        }

        let mapping = explicit.or_else(|| self.mappings.lookup(node.id(), path, node.type_tag()));
        if let Some(mapping) = mapping {
            let float_type = node.type_tag();
            let quantized = mapping.quantize(float_layer(node), &self.descriptors)?;
            *node = Node::from_boxed(quantized);

            debug!(path, float_type, quantized_type = mapping.quantized_type(), "replaced");
            report.substitutions.push(Substitution {
                path: path.to_owned(),
                float_type,
                quantized_type: mapping.quantized_type(),
            });
            return Ok(true);
        }

        if child_replaced {
            if let Some(container) = node.layer_mut().rebuild() {
                *node = Node::from_boxed(container);
                debug!(path, container = node.type_tag(), "rebuilt");
                report.rebuilt.push(path.to_owned());
                return Ok(true);
            }
        }

        Ok(false)
    }
}

/// The module a replacement is built from, looking through a [`QuantizeWith`] marker.
fn float_layer<B: Backend>(node: &Node<B>) -> &dyn Layer<B> {
    match node.downcast_ref::<QuantizeWith<B>>() {
        Some(marker) => marker.inner().layer(),
        None => node.layer(),
    }
}

fn unwrap_explicit<B: Backend>(node: &mut Node<B>) {
    if let Some(inner) = node.downcast_mut::<QuantizeWith<B>>().map(QuantizeWith::take_inner) {
        *node = inner;
    }
}

fn summarize(root: TypeTag, report: &RewriteReport) {
    info!(
        root,
        substitutions = report.substitutions.len(),
        skipped = report.skipped.len(),
        rebuilt = report.rebuilt.len(),
        "quantization pass done"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::LayerError,
        layer_any,
        nn::{
            Activation, ActivationKind, Attributes, Conv2dLayer, ConvBnAct, FeatureMap, Flatten,
            Identity, LinearLayer, MaxPool2dLayer, ModuleList, Sequential, tags,
        },
        quantization::{
            QuantConv2d, QuantLinear, QuantMaxPool2d, QuantizedLayer, register_quantized_module,
        },
    };
    use burn::{
        backend::{NdArray, ndarray::NdArrayDevice},
        nn::{PaddingConfig2d, conv::Conv2dConfig, pool::MaxPool2dConfig},
        tensor::Tensor,
    };

    type B = NdArray<f32>;

    const RES: usize = 8;
    const N_CLASSES: usize = 10;

    fn conv(in_channels: usize, out_channels: usize) -> Conv2dLayer<B> {
        Conv2dLayer::new(
            Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1)),
            &NdArrayDevice::default(),
        )
    }

    fn input() -> FeatureMap<B> {
        Tensor::<B, 4>::ones([1, 3, RES, RES], &NdArrayDevice::default()).into()
    }

    /// Flatten followed by a linear layer, keeping its constructor arguments as state.
    #[derive(Debug)]
    struct MyBlock {
        tag: TypeTag,
        in_feats: usize,
        out_feats: usize,
        flatten: Node<B>,
        linear: Node<B>,
    }

    impl MyBlock {
        fn new(in_feats: usize, out_feats: usize) -> Self {
            Self {
                tag: "MyBlock",
                in_feats,
                out_feats,
                flatten: Node::new(Flatten::new()),
                linear: Node::new(LinearLayer::<B>::new(
                    in_feats,
                    out_feats,
                    true,
                    &NdArrayDevice::default(),
                )),
            }
        }

        fn tagged(mut self, tag: TypeTag) -> Self {
            self.tag = tag;
            self
        }
    }

    impl Layer<B> for MyBlock {
        fn type_tag(&self) -> TypeTag {
            self.tag
        }

        fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
            self.linear.forward(self.flatten.forward(input)?)
        }

        fn children(&self) -> Vec<(String, &Node<B>)> {
            vec![
                ("flatten".to_owned(), &self.flatten),
                ("linear".to_owned(), &self.linear),
            ]
        }

        fn children_mut(&mut self) -> Vec<(String, &mut Node<B>)> {
            vec![
                ("flatten".to_owned(), &mut self.flatten),
                ("linear".to_owned(), &mut self.linear),
            ]
        }

        fn attributes(&self) -> Attributes {
            Attributes::new()
                .with("in_feats", self.in_feats)
                .with("out_feats", self.out_feats)
        }

        layer_any!();
    }

    /// Quantized counterpart of [`MyBlock`] relying on attribute-driven construction.
    #[derive(Debug)]
    struct MyQuantizedBlock {
        flatten: Node<B>,
        linear: Node<B>,
    }

    impl MyQuantizedBlock {
        fn build(
            in_feats: usize,
            out_feats: usize,
            descriptors: &QuantDescriptors,
        ) -> Result<Self, QuantizationError> {
            let float = LinearLayer::<B>::new(in_feats, out_feats, true, &NdArrayDevice::default());
            Ok(Self {
                flatten: Node::new(Flatten::new()),
                linear: Node::new(QuantLinear::<B>::from_float(&float, descriptors)?),
            })
        }
    }

    impl Layer<B> for MyQuantizedBlock {
        fn type_tag(&self) -> TypeTag {
            "MyQuantizedBlock"
        }

        fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
            self.linear.forward(self.flatten.forward(input)?)
        }

        fn children(&self) -> Vec<(String, &Node<B>)> {
            vec![
                ("flatten".to_owned(), &self.flatten),
                ("linear".to_owned(), &self.linear),
            ]
        }

        fn is_quantized(&self) -> bool {
            true
        }

        layer_any!();
    }

    impl QuantizedLayer<B> for MyQuantizedBlock {
        const TYPE_TAG: TypeTag = "MyQuantizedBlock";
        const PARAMS: &'static [&'static str] = &["in_feats", "out_feats"];

        fn new_quantized(
            args: &Attributes,
            descriptors: &QuantDescriptors,
        ) -> Result<Self, QuantizationError> {
            Self::build(args.usize("in_feats")?, args.usize("out_feats")?, descriptors)
        }
    }

    /// Same block, but built by reading the float block's linear layer directly.
    #[derive(Debug)]
    struct ExplicitQuantizedBlock(MyQuantizedBlock);

    impl Layer<B> for ExplicitQuantizedBlock {
        fn type_tag(&self) -> TypeTag {
            "ExplicitQuantizedBlock"
        }

        fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
            self.0.forward(input)
        }

        fn is_quantized(&self) -> bool {
            true
        }

        layer_any!();
    }

    impl QuantizedLayer<B> for ExplicitQuantizedBlock {
        const TYPE_TAG: TypeTag = "ExplicitQuantizedBlock";

        fn from_float(
            float: &dyn Layer<B>,
            descriptors: &QuantDescriptors,
        ) -> Result<Self, QuantizationError> {
            let linear = float
                .children()
                .into_iter()
                .find(|(name, _)| name == "linear")
                .map(|(_, node)| node.attributes())
                .ok_or_else(|| QuantizationError::MissingConstructor(Self::TYPE_TAG))?;

            Ok(Self(MyQuantizedBlock::build(
                linear.usize("in_features")?,
                linear.usize("out_features")?,
                descriptors,
            )?))
        }
    }

    /// `conv` followed by `my_block`.
    #[derive(Debug)]
    struct MyModel {
        conv: Node<B>,
        my_block: Node<B>,
    }

    impl MyModel {
        fn new(block: impl Layer<B>) -> Self {
            Self {
                conv: Node::new(conv(3, 4)),
                my_block: Node::new(block),
            }
        }

        fn float_block() -> MyBlock {
            MyBlock::new(4 * RES * RES, N_CLASSES)
        }
    }

    impl Layer<B> for MyModel {
        fn type_tag(&self) -> TypeTag {
            "MyModel"
        }

        fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
            self.my_block.forward(self.conv.forward(input)?)
        }

        fn children(&self) -> Vec<(String, &Node<B>)> {
            vec![
                ("conv".to_owned(), &self.conv),
                ("my_block".to_owned(), &self.my_block),
            ]
        }

        fn children_mut(&mut self) -> Vec<(String, &mut Node<B>)> {
            vec![
                ("conv".to_owned(), &mut self.conv),
                ("my_block".to_owned(), &mut self.my_block),
            ]
        }

        layer_any!();
    }

    /// Runs every conv of a module list on the same input and concatenates the channels.
    #[derive(Debug)]
    struct ConvBranches {
        convs: Node<B>,
    }

    impl Layer<B> for ConvBranches {
        fn type_tag(&self) -> TypeTag {
            "ConvBranches"
        }

        fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
            let convs = self
                .convs
                .downcast_ref::<ModuleList<B>>()
                .ok_or(LayerError::NotCallable("ConvBranches"))?;
            let outputs = convs
                .iter()
                .map(|conv| conv.forward(input.clone())?.into_spatial("ConvBranches"))
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Tensor::cat(outputs, 1).into())
        }

        fn children(&self) -> Vec<(String, &Node<B>)> {
            vec![("convs".to_owned(), &self.convs)]
        }

        fn children_mut(&mut self) -> Vec<(String, &mut Node<B>)> {
            vec![("convs".to_owned(), &mut self.convs)]
        }

        layer_any!();
    }

    /// Block carrying its constructor arguments as plain attributes.
    #[derive(Debug)]
    struct AbBlock(Attributes);

    impl Layer<B> for AbBlock {
        fn type_tag(&self) -> TypeTag {
            "AbBlock"
        }

        fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
            Ok(input)
        }

        fn attributes(&self) -> Attributes {
            self.0.clone()
        }

        layer_any!();
    }

    #[derive(Debug)]
    struct QuantAbBlock {
        a: usize,
        b: usize,
    }

    impl Layer<B> for QuantAbBlock {
        fn type_tag(&self) -> TypeTag {
            "QuantAbBlock"
        }

        fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
            Ok(input)
        }

        fn attributes(&self) -> Attributes {
            Attributes::new().with("a", self.a).with("b", self.b)
        }

        fn is_quantized(&self) -> bool {
            true
        }

        layer_any!();
    }

    impl QuantizedLayer<B> for QuantAbBlock {
        const TYPE_TAG: TypeTag = "QuantAbBlock";
        const PARAMS: &'static [&'static str] = &["a", "b"];

        fn new_quantized(args: &Attributes, _: &QuantDescriptors) -> Result<Self, QuantizationError> {
            Ok(Self {
                a: args.usize("a")?,
                b: args.usize("b")?,
            })
        }
    }

    /// Conv replacement that only records the channel count, to tell it apart from
    /// [`QuantConv2d`].
    #[derive(Debug)]
    struct MarkedConv {
        in_channels: usize,
    }

    impl Layer<B> for MarkedConv {
        fn type_tag(&self) -> TypeTag {
            "MarkedConv"
        }

        fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
            Ok(input)
        }

        fn attributes(&self) -> Attributes {
            Attributes::new().with("in_channels", self.in_channels)
        }

        fn is_quantized(&self) -> bool {
            true
        }

        layer_any!();
    }

    impl QuantizedLayer<B> for MarkedConv {
        const TYPE_TAG: TypeTag = "MarkedConv";
        const PARAMS: &'static [&'static str] = &["in_channels"];

        fn new_quantized(args: &Attributes, _: &QuantDescriptors) -> Result<Self, QuantizationError> {
            Ok(Self {
                in_channels: args.usize("in_channels")?,
            })
        }
    }

    fn assert_quantized_model(model: &MyModel) {
        assert!(model.conv.is::<QuantConv2d<B>>());
        let y = model.forward(input()).unwrap();
        assert_eq!(y.shapes(), vec![vec![1, N_CLASSES]]);
    }

    #[test]
    fn vanilla_replacement() {
        let mut model = Sequential::<B>::new().push("conv1", conv(3, 8));

        let report = QuantizationUtility::<B>::new()
            .quantize_module(&mut model)
            .unwrap();

        assert!(model.get(0).unwrap().is::<QuantConv2d<B>>());
        assert_eq!(report.substituted_paths(), vec!["conv1"]);
        let y = model.forward(input()).unwrap();
        assert_eq!(y.shapes(), vec![vec![1, 8, RES, RES]]);
    }

    #[test]
    fn module_list_replacement() {
        let mut model = ConvBranches {
            convs: Node::new(ModuleList::from_layers((0..3).map(|_| conv(3, 8)))),
        };
        let list_id = model.convs.id();

        let report = QuantizationUtility::<B>::new()
            .quantize_module(&mut model)
            .unwrap();

        let convs = model.convs.downcast_ref::<ModuleList<B>>().unwrap();
        assert_eq!(convs.len(), 3);
        assert!(convs.iter().all(|conv| conv.is::<QuantConv2d<B>>()));
        assert_ne!(model.convs.id(), list_id);
        assert_eq!(report.substituted_paths(), vec!["convs.0", "convs.1", "convs.2"]);
        assert_eq!(report.rebuilt, vec!["convs"]);

        let y = model.forward(input()).unwrap();
        assert_eq!(y.shapes(), vec![vec![1, 3 * 8, RES, RES]]);
    }

    #[test]
    fn sequential_replacement() {
        let mut root = Node::new(
            Sequential::<B>::new().push(
                "convs",
                Sequential::new()
                    .push("0", conv(3, 8))
                    .push("1", conv(8, 16)),
            ),
        );

        QuantizationUtility::<B>::new()
            .quantize_node(&mut root)
            .unwrap();

        let convs = root.get("convs").unwrap();
        assert_eq!(convs.children().len(), 2);
        assert!(convs.children().iter().all(|(_, c)| c.is::<QuantConv2d<B>>()));

        let y = root.forward(input()).unwrap();
        assert_eq!(y.shapes(), vec![vec![1, 16, RES, RES]]);
    }

    #[test]
    fn nested_module_replacement() {
        let mut model = MyModel::new(MyModel::float_block());
        let block_id = model.my_block.id();

        QuantizationUtility::<B>::new()
            .quantize_module(&mut model)
            .unwrap();

        assert_quantized_model(&model);
        // custom blocks keep their identity, only the leaf is swapped
        assert_eq!(model.my_block.id(), block_id);
        let linear = model.my_block.children()[1].1;
        assert!(linear.is::<QuantLinear<B>>());
    }

    #[test]
    fn static_selective_skip_quantization() {
        let mut model = Sequential::<B>::new()
            .push("conv1", conv(3, 8))
            .push("conv2", SkipQuantization::new(conv(8, 16)));

        let report = QuantizationUtility::<B>::new()
            .quantize_module(&mut model)
            .unwrap();

        assert!(model.get(0).unwrap().is::<QuantConv2d<B>>());
        assert!(model.get(1).unwrap().is::<Conv2dLayer<B>>());
        assert_eq!(report.skipped, vec!["conv2"]);

        let y = model.forward(input()).unwrap();
        assert_eq!(y.shapes(), vec![vec![1, 16, RES, RES]]);
    }

    #[test]
    fn dynamic_skip_quantization() {
        let mut model = Sequential::<B>::new()
            .push("conv1", conv(3, 8))
            .push("conv2", conv(8, 16));

        let mut q_util = QuantizationUtility::<B>::new();
        q_util.register_skip_quantization(["conv2"]);
        q_util.quantize_module(&mut model).unwrap();

        assert!(model.get(0).unwrap().is::<QuantConv2d<B>>());
        assert!(model.get(1).unwrap().is::<Conv2dLayer<B>>());
    }

    #[test]
    fn custom_mapping_with_explicit_from_float() {
        let mut model = MyModel::new(QuantizeWith::new(
            MyModel::float_block(),
            QuantizedMapping::of::<ExplicitQuantizedBlock>(),
        ));

        QuantizationUtility::<B>::new()
            .quantize_module(&mut model)
            .unwrap();

        assert_quantized_model(&model);
        assert!(model.my_block.is::<ExplicitQuantizedBlock>());
    }

    #[test]
    fn custom_mapping_with_implicit_from_float() {
        let mut model = MyModel::new(QuantizeWith::new(
            MyModel::float_block(),
            QuantizedMapping::of::<MyQuantizedBlock>(),
        ));

        QuantizationUtility::<B>::new()
            .quantize_module(&mut model)
            .unwrap();

        assert_quantized_model(&model);
        assert!(model.my_block.is::<MyQuantizedBlock>());
    }

    #[test]
    fn custom_mapping_registered_process_wide() {
        let mapping = register_quantized_module::<B, MyQuantizedBlock>("DecoratedBlock");
        assert_eq!(mapping.quantized_type(), "MyQuantizedBlock");

        let mut model = MyModel::new(MyModel::float_block().tagged("DecoratedBlock"));
        QuantizationUtility::<B>::new()
            .quantize_module(&mut model)
            .unwrap();

        assert_quantized_model(&model);
        assert!(model.my_block.is::<MyQuantizedBlock>());
    }

    #[test]
    fn dynamic_quantized_mapping() {
        let mut model = MyModel::new(MyModel::float_block());

        let mut q_util = QuantizationUtility::<B>::new();
        q_util.register_quantization_mapping(["my_block"], QuantizedMapping::of::<MyQuantizedBlock>());
        let report = q_util.quantize_module(&mut model).unwrap();

        assert_quantized_model(&model);
        assert!(model.my_block.is::<MyQuantizedBlock>());
        // children first: the inner linear is replaced before its block
        assert_eq!(
            report.substituted_paths(),
            vec!["conv", "my_block.linear", "my_block"]
        );
    }

    #[test]
    fn container_keeps_length_and_order() {
        let mut model = Sequential::<B>::new()
            .push("act", Activation::new(ActivationKind::Relu))
            .push("conv", conv(3, 3))
            .push("id", Identity::new());

        QuantizationUtility::<B>::new()
            .quantize_module(&mut model)
            .unwrap();

        let types: Vec<TypeTag> = model.iter().map(Node::type_tag).collect();
        assert_eq!(types, vec![tags::ACTIVATION, "QuantConv2d", tags::IDENTITY]);
    }

    #[test]
    fn nested_containers_are_rebuilt() {
        let mut root = Node::new(
            Sequential::<B>::new()
                .push("id", Identity::new())
                .push(
                    "inner",
                    Sequential::new()
                        .push("conv", conv(3, 3))
                        .push("act", Activation::new(ActivationKind::Silu)),
                ),
        );
        let root_id = root.id();
        let inner_id = root.get("inner").unwrap().id();

        let report = QuantizationUtility::<B>::new()
            .quantize_node(&mut root)
            .unwrap();

        assert_ne!(root.id(), root_id);
        assert_ne!(root.get("inner").unwrap().id(), inner_id);
        assert_eq!(root.children().len(), 2);
        assert_eq!(root.get("inner").unwrap().children().len(), 2);
        assert!(root.get("inner.conv").unwrap().is::<QuantConv2d<B>>());
        assert_eq!(report.rebuilt, vec!["inner", ""]);
    }

    #[test]
    fn skip_wins_over_mappings() {
        let mut model = Sequential::<B>::new()
            .push("typed", conv(3, 3))
            .push(
                "explicit",
                QuantizeWith::new(conv(3, 3), QuantizedMapping::of::<MarkedConv>()),
            );

        let mut q_util = QuantizationUtility::<B>::new();
        q_util.register_skip_quantization(["typed", "explicit"]);
        let report = q_util.quantize_module(&mut model).unwrap();

        assert!(model.iter().all(|node| node.is::<Conv2dLayer<B>>()));
        assert!(report.substitutions.is_empty());
        assert_eq!(report.skipped, vec!["typed", "explicit"]);
    }

    #[test]
    fn skip_by_instance() {
        let mut model = Sequential::<B>::new()
            .push("a", conv(3, 3))
            .push("b", conv(3, 3));
        let skipped = model.get(1).unwrap().id();

        let mut q_util = QuantizationUtility::<B>::new();
        q_util.register_skip_instance(skipped);
        q_util.quantize_module(&mut model).unwrap();

        assert!(model.get(0).unwrap().is::<QuantConv2d<B>>());
        assert!(model.get(1).unwrap().is::<Conv2dLayer<B>>());
    }

    #[test]
    fn skip_by_instance_unwraps_explicit_marker() {
        let mut model = Sequential::<B>::new().push(
            "explicit",
            QuantizeWith::new(conv(3, 3), QuantizedMapping::of::<MarkedConv>()),
        );
        let marked = model.get(0).unwrap().id();

        let mut q_util = QuantizationUtility::<B>::new();
        q_util.register_skip_instance(marked);
        let report = q_util.quantize_module(&mut model).unwrap();

        assert!(model.get(0).unwrap().is::<Conv2dLayer<B>>());
        assert!(report.substitutions.is_empty());
        assert_eq!(report.skipped, vec!["explicit"]);
    }

    #[test]
    fn instance_mapping_overrides_type_mapping() {
        let mut model = Sequential::<B>::new()
            .push("a", conv(3, 3))
            .push("b", conv(3, 3));
        let first = model.get(0).unwrap().id();

        let mut q_util = QuantizationUtility::<B>::new();
        q_util.register_instance_mapping(first, QuantizedMapping::of::<MarkedConv>());
        q_util.quantize_module(&mut model).unwrap();

        let marked = model.get(0).unwrap().downcast_ref::<MarkedConv>().unwrap();
        assert_eq!(marked.in_channels, 3);
        assert!(model.get(1).unwrap().is::<QuantConv2d<B>>());
    }

    #[test]
    fn default_construction_forwards_attributes() {
        let mut model = Sequential::<B>::new().push(
            "block",
            AbBlock(Attributes::new().with("a", 4usize).with("b", 10usize)),
        );

        let mut q_util = QuantizationUtility::<B>::new();
        q_util.register_type_mapping("AbBlock", QuantizedMapping::of::<QuantAbBlock>());
        q_util.quantize_module(&mut model).unwrap();

        let block = model.get(0).unwrap().downcast_ref::<QuantAbBlock>().unwrap();
        assert_eq!((block.a, block.b), (4, 10));
    }

    #[test]
    fn missing_attributes_fail_the_rewrite() {
        let mut model =
            Sequential::<B>::new().push("block", AbBlock(Attributes::new().with("a", 4usize)));

        let mut q_util = QuantizationUtility::<B>::new();
        q_util.register_type_mapping("AbBlock", QuantizedMapping::of::<QuantAbBlock>());
        let err = q_util.quantize_module(&mut model).unwrap_err();

        match err {
            QuantizationError::AttributeMismatch {
                float_type,
                quantized_type,
                missing,
            } => {
                assert_eq!(float_type, "AbBlock");
                assert_eq!(quantized_type, "QuantAbBlock");
                assert_eq!(missing, vec!["b"]);
            }
            other => panic!("unexpected error {other}"),
        }
        // the float module is left in its slot
        assert!(model.get(0).unwrap().is::<AbBlock>());
    }

    #[test]
    fn failed_explicit_rewrite_keeps_the_marker() {
        let mut model = Sequential::<B>::new().push(
            "block",
            QuantizeWith::new(
                AbBlock(Attributes::new().with("a", 4usize)),
                QuantizedMapping::of::<QuantAbBlock>(),
            ),
        );

        let err = QuantizationUtility::<B>::new()
            .quantize_module(&mut model)
            .unwrap_err();

        assert!(matches!(err, QuantizationError::AttributeMismatch { .. }));
        let node = model.get(0).unwrap();
        assert!(node.is::<QuantizeWith<B>>());
        assert_eq!(node.type_tag(), "AbBlock");
    }

    #[test]
    fn markers_expose_their_subtree_to_the_walker() {
        let mut skipped = SkipQuantization::<B>::new(
            Sequential::<B>::new()
                .push("a", conv(3, 3))
                .push("b", conv(3, 3)),
        );
        let names: Vec<_> = skipped.children_mut().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a", "b"]);

        let mut explicit = QuantizeWith::<B>::new(
            Sequential::<B>::new().push("conv", conv(3, 3)),
            QuantizedMapping::of::<MarkedConv>(),
        );
        let report = QuantizationUtility::<B>::new()
            .quantize_module(&mut explicit)
            .unwrap();

        assert!(explicit.inner().get("conv").unwrap().is::<QuantConv2d<B>>());
        assert_eq!(report.substitutions.len(), 1);
    }

    fn vgg_like() -> Node<B> {
        let device = &NdArrayDevice::default();
        Node::new(
            Sequential::<B>::new()
                .push(
                    "stage",
                    Sequential::new()
                        .push("0", ConvBnAct::<B>::new(3, 4, 3, 1, 1, false, ActivationKind::Relu, device))
                        .push("1", ConvBnAct::<B>::new(4, 4, 3, 1, 1, false, ActivationKind::Relu, device)),
                )
                .push(
                    "pool",
                    MaxPool2dLayer::new(MaxPool2dConfig::new([2, 2]).with_strides([2, 2])),
                )
                .push("flatten", Flatten::new())
                .push("fc", LinearLayer::<B>::new(4 * (RES / 2) * (RES / 2), N_CLASSES, true, device)),
        )
    }

    #[test]
    fn substitutions_match_mapped_node_count() {
        let mut root = vgg_like();
        let q_util = QuantizationUtility::<B>::new();

        let mapped = root
            .named_modules()
            .into_iter()
            .filter(|(_, node)| q_util.mappings().contains_type(node.type_tag()))
            .count();
        let report = q_util.quantize_node(&mut root).unwrap();

        assert_eq!(mapped, 4);
        assert_eq!(report.substitutions.len(), mapped);
        assert!(root.get("pool").unwrap().is::<QuantMaxPool2d>());

        let y = root.forward(input()).unwrap();
        assert_eq!(y.shapes(), vec![vec![1, N_CLASSES]]);
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let mut root = vgg_like();
        let q_util = QuantizationUtility::<B>::new();
        q_util.quantize_node(&mut root).unwrap();

        let before: Vec<(String, NodeId)> = root
            .named_modules()
            .into_iter()
            .map(|(path, node)| (path, node.id()))
            .collect();
        let report = q_util.quantize_node(&mut root).unwrap();
        let after: Vec<(String, NodeId)> = root
            .named_modules()
            .into_iter()
            .map(|(path, node)| (path, node.id()))
            .collect();

        assert!(report.is_empty());
        assert_eq!(before, after);
    }
}
