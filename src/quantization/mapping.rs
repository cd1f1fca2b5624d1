use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{LazyLock, PoisonError, RwLock},
};

use burn::tensor::backend::Backend;
use tracing::debug;

use super::{
    QuantizedLayer, QuantizedMapping,
    modules::{QuantConv2d, QuantLinear, QuantMaxPool2d},
};
use crate::{
    error::LayerError,
    layer_any,
    nn::{Attributes, FeatureMap, Identity, Layer, Node, NodeId, TypeTag, tags},
};

/// Float module → quantized replacement table.
///
/// Lookups try the instance binding first, then the qualified path, then the type tag.
#[derive(Debug)]
pub struct MappingRegistry<B: Backend> {
    by_type: HashMap<TypeTag, QuantizedMapping<B>>,
    by_instance: HashMap<NodeId, QuantizedMapping<B>>,
    by_path: HashMap<String, QuantizedMapping<B>>,
}

impl<B: Backend> Clone for MappingRegistry<B> {
    fn clone(&self) -> Self {
        Self {
            by_type: self.by_type.clone(),
            by_instance: self.by_instance.clone(),
            by_path: self.by_path.clone(),
        }
    }
}

impl<B: Backend> Default for MappingRegistry<B> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<B: Backend> MappingRegistry<B> {
    pub fn empty() -> Self {
        Self {
            by_type: HashMap::new(),
            by_instance: HashMap::new(),
            by_path: HashMap::new(),
        }
    }

    /// Built-in float → quantized mappings.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(tags::CONV2D, QuantizedMapping::of::<QuantConv2d<B>>());
        registry.register(tags::LINEAR, QuantizedMapping::of::<QuantLinear<B>>());
        registry.register(tags::MAX_POOL2D, QuantizedMapping::of::<QuantMaxPool2d>());
        registry
    }

    /// Built-in mappings overlaid with everything registered process-wide through
    /// [`register_quantized_module`].
    pub fn global() -> Self {
        let mut registry = Self::with_defaults();
        let table = GLOBAL_MAPPINGS
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(global) = table
            .get(&TypeId::of::<B>())
            .and_then(|entry| entry.downcast_ref::<MappingRegistry<B>>())
        {
            registry.by_type.extend(global.by_type.iter().map(|(k, v)| (*k, *v)));
        }

        registry
    }

    /// Maps every module of `float_type`, replacing any previous mapping for it.
    pub fn register(
        &mut self,
        float_type: TypeTag,
        mapping: QuantizedMapping<B>,
    ) -> Option<QuantizedMapping<B>> {
        self.by_type.insert(float_type, mapping)
    }

    /// Maps one node instance only. Wins over the type mapping for that node.
    pub fn register_instance(
        &mut self,
        node: NodeId,
        mapping: QuantizedMapping<B>,
    ) -> Option<QuantizedMapping<B>> {
        self.by_instance.insert(node, mapping)
    }

    /// Maps whatever node sits at a qualified path at rewrite time.
    pub fn register_path(
        &mut self,
        path: impl Into<String>,
        mapping: QuantizedMapping<B>,
    ) -> Option<QuantizedMapping<B>> {
        self.by_path.insert(path.into(), mapping)
    }

    pub fn lookup(&self, node: NodeId, path: &str, type_tag: TypeTag) -> Option<QuantizedMapping<B>> {
        self.by_instance
            .get(&node)
            .or_else(|| self.by_path.get(path))
            .or_else(|| self.by_type.get(type_tag))
            .copied()
    }

    pub fn contains_type(&self, float_type: TypeTag) -> bool {
        self.by_type.contains_key(float_type)
    }

    /// Float types with a type-level mapping.
    pub fn float_types(&self) -> Vec<TypeTag> {
        let mut types: Vec<TypeTag> = self.by_type.keys().copied().collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.by_type.len() + self.by_instance.len() + self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide mappings, one registry per backend type.
static GLOBAL_MAPPINGS: LazyLock<RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Registers `Q` as the quantized replacement of every `float_type` module, for all
/// utilities created afterwards.
///
/// Meant to be called right after `Q` is defined; the mapping is returned so the call
/// can sit in an initializer. Existing models are not visited.
pub fn register_quantized_module<B: Backend, Q: QuantizedLayer<B>>(
    float_type: TypeTag,
) -> QuantizedMapping<B> {
    let mapping = QuantizedMapping::of::<Q>();
    let mut table = GLOBAL_MAPPINGS
        .write()
        .unwrap_or_else(PoisonError::into_inner);

    let entry = table
        .entry(TypeId::of::<B>())
        .or_insert_with(|| Box::new(MappingRegistry::<B>::empty()));

    if let Some(registry) = entry.downcast_mut::<MappingRegistry<B>>() {
        registry.register(float_type, mapping);
        debug!(float_type, quantized_type = Q::TYPE_TAG, "registered quantized module");
    }

    mapping
}

/// Construction-time marker binding an explicit quantized replacement to one module.
///
/// Behaves like the wrapped module until a quantization pass unwraps it.
#[derive(Debug)]
pub struct QuantizeWith<B: Backend> {
    inner: Node<B>,
    mapping: QuantizedMapping<B>,
}

impl<B: Backend> QuantizeWith<B> {
    pub fn new(float: impl Layer<B>, mapping: QuantizedMapping<B>) -> Self {
        Self {
            inner: Node::new(float),
            mapping,
        }
    }

    pub fn mapping(&self) -> QuantizedMapping<B> {
        self.mapping
    }

    pub fn inner(&self) -> &Node<B> {
        &self.inner
    }

    pub(crate) fn take_inner(&mut self) -> Node<B> {
        std::mem::replace(&mut self.inner, Node::new(Identity::new()))
    }
}

impl<B: Backend> Layer<B> for QuantizeWith<B> {
    fn type_tag(&self) -> TypeTag {
        self.inner.type_tag()
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        self.inner.forward(input)
    }

    fn children(&self) -> Vec<(String, &Node<B>)> {
        self.inner.children()
    }

    fn children_mut(&mut self) -> Vec<(String, &mut Node<B>)> {
        self.inner.layer_mut().children_mut()
    }

    fn attributes(&self) -> Attributes {
        self.inner.attributes()
    }

    layer_any!();
}
