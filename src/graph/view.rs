// Dependency view over a layer graph
//
// Petgraph-backed analysis structure: one node per layer, one data edge per
// resolved input reference. The rewrite passes never consult this view (they
// walk declaration order directly); it exists for topological validation,
// fan-out queries, statistics and DOT export.

use crate::graph::def::NetDef;
use anyhow::{anyhow, Result};
use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use rustc_hash::FxHashMap;
use std::collections::HashMap;

use super::usage::TensorSite;

/// Node identifier in the dependency view (petgraph NodeIndex)
pub type NodeId = NodeIndex;

/// A layer as seen by the dependency view
#[derive(Debug, Clone)]
pub struct LayerNode {
    /// Declaration index in the source network
    pub index: usize,
    /// Layer name
    pub name: String,
    /// Operation type
    pub layer_type: String,
    /// Whether any output carries a nonzero loss weight
    pub has_loss: bool,
}

/// Data edge between two layers
#[derive(Debug, Clone)]
pub struct DataEdge {
    /// Output slot on the producing layer
    pub output_slot: usize,
    /// Input slot on the consuming layer
    pub input_slot: usize,
    /// Name of the tensor flowing along this edge
    pub tensor: String,
}

/// Petgraph view of a network's data dependencies
pub struct DependencyView {
    graph: StableGraph<LayerNode, DataEdge>,

    /// Consumer counts per tensor producer site (structural consumers only;
    /// loss weights are not edges)
    consumer_counts: FxHashMap<TensorSite, usize>,

    /// Declared network input count
    num_inputs: usize,
}

impl DependencyView {
    /// Build the view for a network
    ///
    /// Input references that resolve to nothing are skipped here; surfacing
    /// them as errors is the job of the usage analyzer.
    pub fn new(net: &NetDef) -> Self {
        let mut graph = StableGraph::new();
        let mut consumer_counts: FxHashMap<TensorSite, usize> = FxHashMap::default();
        let mut last_producer: FxHashMap<&str, TensorSite> = FxHashMap::default();
        let mut node_ids = Vec::with_capacity(net.layers.len());

        for (slot, tensor) in net.inputs.iter().enumerate() {
            last_producer.insert(tensor.as_str(), TensorSite::NetInput { slot });
        }

        for (i, layer) in net.layers.iter().enumerate() {
            let node_id = graph.add_node(LayerNode {
                index: i,
                name: layer.name.clone(),
                layer_type: layer.layer_type.clone(),
                has_loss: layer.loss_weights.iter().any(|&w| w != 0.0),
            });
            node_ids.push(node_id);

            for (j, tensor) in layer.inputs.iter().enumerate() {
                let Some(&site) = last_producer.get(tensor.as_str()) else {
                    continue;
                };
                *consumer_counts.entry(site).or_insert(0) += 1;
                if let TensorSite::LayerOutput { layer: src, slot } = site {
                    graph.add_edge(
                        node_ids[src],
                        node_id,
                        DataEdge {
                            output_slot: slot,
                            input_slot: j,
                            tensor: tensor.clone(),
                        },
                    );
                }
            }

            for (j, tensor) in layer.outputs.iter().enumerate() {
                last_producer.insert(tensor.as_str(), TensorSite::LayerOutput { layer: i, slot: j });
            }
        }

        Self {
            graph,
            consumer_counts,
            num_inputs: net.inputs.len(),
        }
    }

    /// Compute topological sort
    pub fn topological_sort(&self) -> Result<Vec<NodeId>> {
        toposort(&self.graph, None).map_err(|_| anyhow!("Graph contains cycles"))
    }

    /// Structural consumer count for a tensor producer site
    pub fn fan_out(&self, site: TensorSite) -> usize {
        self.consumer_counts.get(&site).copied().unwrap_or(0)
    }

    /// Consumer counts per producer site
    pub fn consumer_counts(&self) -> &FxHashMap<TensorSite, usize> {
        &self.consumer_counts
    }

    /// Number of layers in the view
    pub fn layer_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of data edges in the view
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Get graph statistics
    pub fn statistics(&self) -> GraphStatistics {
        let mut layer_type_counts: HashMap<String, usize> = HashMap::new();
        for node in self.graph.node_weights() {
            *layer_type_counts.entry(node.layer_type.clone()).or_insert(0) += 1;
        }

        GraphStatistics {
            total_layers: self.graph.node_count(),
            total_edges: self.graph.edge_count(),
            num_inputs: self.num_inputs,
            layer_type_counts,
        }
    }

    /// Export to Graphviz DOT format
    pub fn visualize_dot(&self) -> String {
        use std::fmt::Write;
        let mut dot = String::new();
        writeln!(&mut dot, "digraph NetDef {{").unwrap();
        writeln!(&mut dot, "  rankdir=TB;").unwrap();
        writeln!(&mut dot, "  node [shape=box, style=rounded];").unwrap();

        for node_id in self.graph.node_indices() {
            let node = &self.graph[node_id];
            let label = format!("{}\\n{}", node.name, node.layer_type);

            let color = if node.has_loss {
                "lightpink"
            } else {
                match node.layer_type.as_str() {
                    "Split" => "lightyellow",
                    "Convolution" | "InnerProduct" => "lightblue",
                    "ReLU" | "Sigmoid" | "TanH" => "lightgreen",
                    _ => "white",
                }
            };

            writeln!(
                &mut dot,
                "  node{} [label=\"{}\", fillcolor={}, style=filled];",
                node_id.index(),
                label,
                color
            )
            .unwrap();
        }

        for edge in self.graph.edge_references() {
            writeln!(
                &mut dot,
                "  node{} -> node{} [label=\"{}: out{}→in{}\"];",
                edge.source().index(),
                edge.target().index(),
                edge.weight().tensor,
                edge.weight().output_slot,
                edge.weight().input_slot
            )
            .unwrap();
        }

        writeln!(&mut dot, "}}").unwrap();
        dot
    }
}

/// Graph statistics
#[derive(Debug, Clone)]
pub struct GraphStatistics {
    pub total_layers: usize,
    pub total_edges: usize,
    pub num_inputs: usize,
    pub layer_type_counts: HashMap<String, usize>,
}

impl std::fmt::Display for GraphStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Network Statistics:")?;
        writeln!(f, "  Total layers: {}", self.total_layers)?;
        writeln!(f, "  Total edges: {}", self.total_edges)?;
        writeln!(f, "  Network inputs: {}", self.num_inputs)?;
        writeln!(f, "  Layer types:")?;

        let mut sorted_types: Vec<_> = self.layer_type_counts.iter().collect();
        sorted_types.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

        for (layer_type, count) in sorted_types {
            writeln!(f, "    {}: {}", layer_type, count)?;
        }

        Ok(())
    }
}
