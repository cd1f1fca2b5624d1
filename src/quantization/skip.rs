use std::collections::{BTreeSet, HashSet};

use burn::tensor::backend::Backend;

use crate::{
    error::LayerError,
    layer_any,
    nn::{Attributes, FeatureMap, Identity, Layer, Node, NodeId, TypeTag},
};

/// One entry of the "do not quantize" set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SkipDirective {
    /// Qualified path, matched at rewrite time.
    Path(String),
    Instance(NodeId),
}

impl From<&str> for SkipDirective {
    fn from(value: &str) -> Self {
        SkipDirective::Path(value.to_owned())
    }
}

impl From<String> for SkipDirective {
    fn from(value: String) -> Self {
        SkipDirective::Path(value)
    }
}

impl From<NodeId> for SkipDirective {
    fn from(value: NodeId) -> Self {
        SkipDirective::Instance(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkipSet {
    paths: BTreeSet<String>,
    instances: HashSet<NodeId>,
}

impl SkipSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, directive: impl Into<SkipDirective>) {
        match directive.into() {
            SkipDirective::Path(path) => {
                self.paths.insert(path);
            }
            SkipDirective::Instance(id) => {
                self.instances.insert(id);
            }
        }
    }

    pub fn add_path(&mut self, path: impl Into<String>) {
        self.paths.insert(path.into());
    }

    pub fn add_instance(&mut self, id: NodeId) {
        self.instances.insert(id);
    }

    pub fn is_skipped(&self, id: NodeId, path: &str) -> bool {
        self.instances.contains(&id) || self.paths.contains(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len() + self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Construction-time marker: the wrapped module and its whole subtree stay float.
#[derive(Debug)]
pub struct SkipQuantization<B: Backend> {
    inner: Node<B>,
}

impl<B: Backend> SkipQuantization<B> {
    pub fn new(float: impl Layer<B>) -> Self {
        Self {
            inner: Node::new(float),
        }
    }

    pub fn inner(&self) -> &Node<B> {
        &self.inner
    }

    pub(crate) fn take_inner(&mut self) -> Node<B> {
        std::mem::replace(&mut self.inner, Node::new(Identity::new()))
    }
}

impl<B: Backend> Layer<B> for SkipQuantization<B> {
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
