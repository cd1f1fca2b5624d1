use burn::tensor::backend::Backend;

use super::{FeatureMap, Layer, Node, TypeTag, tags};
use crate::{error::LayerError, layer_any};

/// Ordered chain of named children, each fed the previous child's output.
#[derive(Debug)]
pub struct Sequential<B: Backend> {
    children: Vec<(String, Node<B>)>,
}

impl<B: Backend> Default for Sequential<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Sequential<B> {
    pub fn new() -> Self {
        Self {
            children: Vec::new(),
        }
    }

    /// Children are named by their position.
    pub fn from_layers(layers: Vec<Box<dyn Layer<B>>>) -> Self {
        Self {
            children: layers
                .into_iter()
                .enumerate()
                .map(|(i, layer)| (i.to_string(), Node::from_boxed(layer)))
                .collect(),
        }
    }

    pub fn from_named(children: Vec<(String, Node<B>)>) -> Self {
        Self { children }
    }

    pub fn push(mut self, name: &str, layer: impl Layer<B>) -> Self {
        self.children.push((name.to_owned(), Node::new(layer)));
        self
    }

    pub fn push_node(mut self, name: &str, node: Node<B>) -> Self {
        self.children.push((name.to_owned(), node));
        self
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Node<B>> {
        self.children.get(index).map(|(_, node)| node)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node<B>> {
        self.children.iter().map(|(_, node)| node)
    }
}

impl<B: Backend> Layer<B> for Sequential<B> {
    fn type_tag(&self) -> TypeTag {
        tags::SEQUENTIAL
    }

    fn forward(&self, input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        self.children
            .iter()
            .try_fold(input, |x, (_, child)| child.forward(x))
    }

    fn children(&self) -> Vec<(String, &Node<B>)> {
        self.children
            .iter()
            .map(|(name, node)| (name.clone(), node))
            .collect()
    }

    fn children_mut(&mut self) -> Vec<(String, &mut Node<B>)> {
        self.children
            .iter_mut()
            .map(|(name, node)| (name.clone(), node))
            .collect()
    }

    fn rebuild(&mut self) -> Option<Box<dyn Layer<B>>> {
        Some(Box::new(Sequential::from_named(std::mem::take(
            &mut self.children,
        ))))
    }

    layer_any!();
}

/// Ordered, index-addressed children. Owners call the children themselves.
#[derive(Debug)]
pub struct ModuleList<B: Backend> {
    items: Vec<Node<B>>,
}

impl<B: Backend> Default for ModuleList<B> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<B: Backend> ModuleList<B> {
    pub fn new(items: Vec<Node<B>>) -> Self {
        Self { items }
    }

    pub fn from_layers<L: Layer<B>>(layers: impl IntoIterator<Item = L>) -> Self {
        Self::new(layers.into_iter().map(Node::new).collect())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Node<B>> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node<B>> {
        self.items.iter()
    }
}

impl<B: Backend> Layer<B> for ModuleList<B> {
    fn type_tag(&self) -> TypeTag {
        tags::MODULE_LIST
    }

    fn forward(&self, _input: FeatureMap<B>) -> Result<FeatureMap<B>, LayerError> {
        Err(LayerError::NotCallable(tags::MODULE_LIST))
    }

    fn children(&self) -> Vec<(String, &Node<B>)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, node)| (i.to_string(), node))
            .collect()
    }

    fn children_mut(&mut self) -> Vec<(String, &mut Node<B>)> {
        self.items
            .iter_mut()
            .enumerate()
            .map(|(i, node)| (i.to_string(), node))
            .collect()
    }

    fn rebuild(&mut self) -> Option<Box<dyn Layer<B>>> {
        Some(Box::new(ModuleList::new(std::mem::take(&mut self.items))))
    }

    layer_any!();
}
