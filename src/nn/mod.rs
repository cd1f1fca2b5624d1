//! Dynamic module tree.
//!
//! Every computation unit is a [`Layer`] owned by a [`Node`] slot. A node carries a
//! process-unique [`NodeId`] and an ordered list of named children, so the tree can be
//! walked, addressed by dot-separated path and rewritten in place.

pub mod basic;
pub mod container;
pub mod conv_bn_act;

use std::{
    any::Any,
    collections::BTreeMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use burn::tensor::{Tensor, backend::Backend};

use crate::error::{LayerError, QuantizationError};

pub use basic::{
    Activation, ActivationKind, BatchNorm2dLayer, Conv2dLayer, Flatten, Identity, LinearLayer,
    MaxPool2dLayer, PixelShuffle,
};
pub use container::{ModuleList, Sequential};
pub use conv_bn_act::ConvBnAct;

/// Stable runtime identity of a layer type.
pub type TypeTag = &'static str;

/// Type tags of the built-in layers.
pub mod tags {
    use super::TypeTag;

    pub const CONV2D: TypeTag = "Conv2d";
    pub const LINEAR: TypeTag = "Linear";
    pub const BATCH_NORM2D: TypeTag = "BatchNorm2d";
    pub const ACTIVATION: TypeTag = "Activation";
    pub const FLATTEN: TypeTag = "Flatten";
    pub const PIXEL_SHUFFLE: TypeTag = "PixelShuffle";
    pub const MAX_POOL2D: TypeTag = "MaxPool2d";
    pub const IDENTITY: TypeTag = "Identity";
    pub const SEQUENTIAL: TypeTag = "Sequential";
    pub const MODULE_LIST: TypeTag = "ModuleList";
    pub const CONV_BN_ACT: TypeTag = "ConvBnAct";
}

/// Implements the `as_any` downcasting hooks of [`Layer`] for the enclosing type.
#[macro_export]
macro_rules! layer_any {
    () => {
        fn as_any(&self) -> &dyn ::std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
            self
        }
    };
}

/// Tensor flowing through [`Layer::forward`], tagged with its rank.
#[derive(Debug, Clone)]
pub enum FeatureMap<B: Backend> {
    /// `[batch, features]`
    Flat(Tensor<B, 2>),
    /// `[batch, channels, height, width]`
    Spatial(Tensor<B, 4>),
    /// Several spatial maps, e.g. the strides of a backbone or the outputs of a head.
    Pyramid(Vec<Tensor<B, 4>>),
}

impl<B: Backend> FeatureMap<B> {
    pub fn kind(&self) -> &'static str {
        match self {
            FeatureMap::Flat(_) => "flat",
            FeatureMap::Spatial(_) => "spatial",
            FeatureMap::Pyramid(_) => "pyramid",
        }
    }

    pub fn into_spatial(self, layer: TypeTag) -> Result<Tensor<B, 4>, LayerError> {
        match self {
            FeatureMap::Spatial(t) => Ok(t),
            other => Err(LayerError::UnexpectedInput {
                layer,
                expected: "spatial",
                found: other.kind(),
            }),
        }
    }

    pub fn into_flat(self, layer: TypeTag) -> Result<Tensor<B, 2>, LayerError> {
        match self {
            FeatureMap::Flat(t) => Ok(t),
            other => Err(LayerError::UnexpectedInput {
                layer,
                expected: "flat",
                found: other.kind(),
            }),
        }
    }

    pub fn into_pyramid(self, layer: TypeTag) -> Result<Vec<Tensor<B, 4>>, LayerError> {
        match self {
            FeatureMap::Pyramid(t) => Ok(t),
            other => Err(LayerError::UnexpectedInput {
                layer,
                expected: "pyramid",
                found: other.kind(),
            }),
        }
    }

    /// Shapes of the contained tensors, one entry per tensor.
    pub fn shapes(&self) -> Vec<Vec<usize>> {
        match self {
            FeatureMap::Flat(t) => vec![t.dims().to_vec()],
            FeatureMap::Spatial(t) => vec![t.dims().to_vec()],
            FeatureMap::Pyramid(ts) => ts.iter().map(|t| t.dims().to_vec()).collect(),
        }
    }
}

impl<B: Backend> From<Tensor<B, 2>> for FeatureMap<B> {
    fn from(value: Tensor<B, 2>) -> Self {
        FeatureMap::Flat(value)
    }
}

impl<B: Backend> From<Tensor<B, 4>> for FeatureMap<B> {
    fn from(value: Tensor<B, 4>) -> Self {
        FeatureMap::Spatial(value)
    }
}

impl<B: Backend> From<Vec<Tensor<B, 4>>> for FeatureMap<B> {
    fn from(value: Vec<Tensor<B, 4>>) -> Self {
        FeatureMap::Pyramid(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Ints(Vec<usize>),
    Text(String),
}

impl From<usize> for AttrValue {
    fn from(value: usize) -> Self {
        AttrValue::Int(value as i64)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<Vec<usize>> for AttrValue {
    fn from(value: Vec<usize>) -> Self {
        AttrValue::Ints(value)
    }
}

impl From<[usize; 2]> for AttrValue {
    fn from(value: [usize; 2]) -> Self {
        AttrValue::Ints(value.to_vec())
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_owned())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

/// Constructor state a layer exposes, keyed by the constructor's parameter names.
///
/// Quantized replacements that rely on the default `from_float` construction read their
/// constructor arguments from here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(BTreeMap<String, AttrValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<AttrValue>) -> Option<AttrValue> {
        self.0.insert(name.to_owned(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Keeps only the named attributes that are present.
    pub fn select(&self, names: &[&str]) -> Attributes {
        Attributes(
            self.0
                .iter()
                .filter(|(k, _)| names.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    fn require(&self, name: &str, expected: &'static str) -> Result<&AttrValue, QuantizationError> {
        self.get(name).ok_or_else(|| QuantizationError::AttributeType {
            name: name.to_owned(),
            expected,
        })
    }

    pub fn usize(&self, name: &str) -> Result<usize, QuantizationError> {
        match self.require(name, "a non-negative integer")? {
            AttrValue::Int(v) if *v >= 0 => Ok(*v as usize),
            _ => Err(QuantizationError::AttributeType {
                name: name.to_owned(),
                expected: "a non-negative integer",
            }),
        }
    }

    pub fn float(&self, name: &str) -> Result<f64, QuantizationError> {
        match self.require(name, "a float")? {
            AttrValue::Float(v) => Ok(*v),
            AttrValue::Int(v) => Ok(*v as f64),
            _ => Err(QuantizationError::AttributeType {
                name: name.to_owned(),
                expected: "a float",
            }),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool, QuantizationError> {
        match self.require(name, "a boolean")? {
            AttrValue::Bool(v) => Ok(*v),
            _ => Err(QuantizationError::AttributeType {
                name: name.to_owned(),
                expected: "a boolean",
            }),
        }
    }

    pub fn pair(&self, name: &str) -> Result<[usize; 2], QuantizationError> {
        match self.require(name, "a pair of integers")? {
            AttrValue::Ints(v) if v.len() == 2 => Ok([v[0], v[1]]),
            AttrValue::Int(v) if *v >= 0 => Ok([*v as usize, *v as usize]),
            _ => Err(QuantizationError::AttributeType {
                name: name.to_owned(),
                expected: "a pair of integers",
            }),
        }
    }

    pub fn text(&self, name: &str) -> Result<&str, QuantizationError> {
        match self.require(name, "a string")? {
            AttrValue::Text(v) => Ok(v.as_str()),
            _ => Err(QuantizationError::AttributeType {
                name: name.to_owned(),
                expected: "a string",
            }),
        }
    }
}

/// A unit of computation in the module tree.
///
/// Layers own their children through [`Node`] slots and expose them in declaration order,
/// which fixes the traversal order of every walk over the tree.
pub trait Layer<B: Backend>: fmt::Debug + 'static {
    fn type_tag(&self) -> TypeTag;

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError>;

    fn children(&self) -> Vec<(String, &Node<B>)> {
        Vec::new()
    }

    fn children_mut(&mut self) -> Vec<(String, &mut Node<B>)> {
        Vec::new()
    }

    fn attributes(&self) -> Attributes {
        Attributes::default()
    }

    /// Capability query: `true` for quantized replacements.
    fn is_quantized(&self) -> bool {
        false
    }

    /// Containers return a fresh container of the same kind holding the current children.
    /// The children are moved out, leaving `self` empty.
    fn rebuild(&mut self) -> Option<Box<dyn Layer<B>>> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one node instance, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owned, replaceable slot holding one layer.
#[derive(Debug)]
pub struct Node<B: Backend> {
    id: NodeId,
    layer: Box<dyn Layer<B>>,
}

impl<B: Backend> Node<B> {
    pub fn new(layer: impl Layer<B>) -> Self {
        Self::from_boxed(Box::new(layer))
    }

    pub fn from_boxed(layer: Box<dyn Layer<B>>) -> Self {
        Self {
            id: NodeId::next(),
            layer,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn type_tag(&self) -> TypeTag {
        self.layer.type_tag()
    }

    pub fn layer(&self) -> &dyn Layer<B> {
        self.layer.as_ref()
    }

    pub fn layer_mut(&mut self) -> &mut dyn Layer<B> {
        self.layer.as_mut()
    }

    pub fn forward(&self, input: impl Into<FeatureMap<B>>) -> Result<FeatureMap<B>, LayerError> {
        self.layer.forward(input.into())
    }

    pub fn is_quantized(&self) -> bool {
        self.layer.is_quantized()
    }

    pub fn attributes(&self) -> Attributes {
        self.layer.attributes()
    }

    pub fn children(&self) -> Vec<(String, &Node<B>)> {
        self.layer.children()
    }

    pub fn downcast_ref<T: Layer<B>>(&self) -> Option<&T> {
        self.layer.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Layer<B>>(&mut self) -> Option<&mut T> {
        self.layer.as_any_mut().downcast_mut::<T>()
    }

    pub fn is<T: Layer<B>>(&self) -> bool {
        self.layer.as_any().is::<T>()
    }

    /// Every node of the subtree with its qualified path, depth first, parents before
    /// children. The node itself comes first with an empty path.
    pub fn named_modules(&self) -> Vec<(String, &Node<B>)> {
        let mut out = Vec::new();
        collect_named(self, String::new(), &mut out);
        out
    }

    /// Looks up a descendant by dot-separated path. The empty path is the node itself.
    pub fn get(&self, path: &str) -> Option<&Node<B>> {
        if path.is_empty() {
            return Some(self);
        }

        let mut current = self;
        for name in path.split('.') {
            current = current
                .children()
                .into_iter()
                .find(|(child_name, _)| child_name == name)
                .map(|(_, child)| child)?;
        }
        Some(current)
    }
}

fn collect_named<'a, B: Backend>(
    node: &'a Node<B>,
    path: String,
    out: &mut Vec<(String, &'a Node<B>)>,
) {
    let children = node.children();
    out.push((path.clone(), node));
    for (name, child) in children {
        collect_named(child, join_path(&path, &name), out);
    }
}

/// Joins a qualified path prefix and a child name with a dot.
pub fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}.{name}")
    }
}
