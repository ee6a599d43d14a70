// Layer-graph data model
//
// A network is an ordered list of layers exchanging named tensors. Order is
// semantically meaningful: declaration order is a valid topological order, and
// every pass in this crate walks it front to back. The model carries no tensor
// data; tensors exist here as names flowing between layers.

use crate::error::{NetError, Result};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Reserved type tag for synthesized fan-out layers.
pub const SPLIT_LAYER_TYPE: &str = "Split";

/// A single computational layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDef {
    /// Layer name, unique within a network
    pub name: String,

    /// Operation type (e.g. "Convolution", "ReLU", "Split")
    pub layer_type: String,

    /// Ordered input tensor references
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Ordered output tensor names
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Per-output loss weights, parallel to `outputs`. May be shorter than
    /// `outputs`; missing entries read as 0, meaning "not a loss".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loss_weights: Vec<f32>,
}

impl LayerDef {
    /// Create a layer with no connections
    pub fn new(name: impl Into<String>, layer_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layer_type: layer_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            loss_weights: Vec::new(),
        }
    }

    /// Append an input tensor reference
    pub fn input(mut self, tensor: impl Into<String>) -> Self {
        self.inputs.push(tensor.into());
        self
    }

    /// Append an output tensor
    pub fn output(mut self, tensor: impl Into<String>) -> Self {
        self.outputs.push(tensor.into());
        self
    }

    /// Attach a loss weight to the most recently added output
    ///
    /// Earlier outputs without an explicit weight are padded with 0.
    pub fn loss(mut self, weight: f32) -> Self {
        if self.outputs.is_empty() {
            return self;
        }
        self.loss_weights.resize(self.outputs.len() - 1, 0.0);
        self.loss_weights.push(weight);
        self
    }

    /// Loss weight attached to an output slot, 0 when absent
    pub fn loss_weight(&self, slot: usize) -> f32 {
        self.loss_weights.get(slot).copied().unwrap_or(0.0)
    }

    /// Whether this layer is a synthesized fan-out layer
    pub fn is_split(&self) -> bool {
        self.layer_type == SPLIT_LAYER_TYPE
    }
}

/// A network: declared inputs plus layers in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetDef {
    /// Network name
    #[serde(default)]
    pub name: String,

    /// Declared network inputs (tensors with no producing layer)
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Layers in declaration order (a valid topological order)
    #[serde(default)]
    pub layers: Vec<LayerDef>,
}

impl NetDef {
    /// Create an empty network
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            layers: Vec::new(),
        }
    }

    /// Declare a network input
    pub fn input(mut self, tensor: impl Into<String>) -> Self {
        self.inputs.push(tensor.into());
        self
    }

    /// Append a layer
    pub fn layer(mut self, layer: LayerDef) -> Self {
        self.layers.push(layer);
        self
    }

    /// Check structural well-formedness
    ///
    /// Every input reference must resolve to an earlier producer or a declared
    /// network input, layer names must be unique, and the data dependencies
    /// must form a DAG.
    pub fn validate(&self) -> Result<()> {
        crate::graph::usage::analyze_usage(self)?;

        let mut seen = FxHashSet::default();
        for layer in &self.layers {
            if !seen.insert(layer.name.as_str()) {
                return Err(NetError::InvalidModel(format!(
                    "duplicate layer name '{}'",
                    layer.name
                )));
            }
        }

        crate::graph::view::DependencyView::new(self).topological_sort()?;
        Ok(())
    }
}
