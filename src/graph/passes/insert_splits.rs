// Split insertion for gradient-safe backpropagation
//
// Rewrites a network so that every tensor is consumed by at most one
// downstream layer. A tensor with several consumers (a nonzero loss weight
// counts as one more) gets a synthesized Split layer exposing one uniquely
// named output per consumer; each consumer is rewired to its own output, and
// the Split layer owns the accumulation of their gradients back into the
// producer's single buffer. Without the rewrite, every consumer would have to
// co-mutate one shared gradient buffer.

use super::RewritePass;
use crate::error::{NetError, Result};
use crate::graph::def::{LayerDef, NetDef, SPLIT_LAYER_TYPE};
use crate::graph::naming::{split_layer_name, split_output_name};
use crate::graph::usage::{analyze_usage, ConsumerSite, TensorSite, UsageMap};
use rustc_hash::FxHashMap;

/// The split-insertion pass
pub struct InsertSplits;

impl RewritePass for InsertSplits {
    fn name(&self) -> &str {
        "insert-splits"
    }

    fn run(&self, net: &NetDef) -> Result<NetDef> {
        insert_splits(net)
    }
}

/// Rewrite `net` so that every tensor has at most one consumer
///
/// The input network is never mutated; a fresh, independent network is
/// returned. Running the pass on its own output is a structural no-op.
///
/// # Errors
///
/// Returns [`NetError::DanglingReference`] if an input reference resolves to
/// nothing, and [`NetError::UnresolvedSplitAssignment`] on an internal
/// plan/rewrite mismatch. No partial network is ever returned.
pub fn insert_splits(net: &NetDef) -> Result<NetDef> {
    let usage = analyze_usage(net)?;
    let plan = plan_splits(net, &usage);
    apply_plan(net, &usage, &plan)
}

/// Planned split layer for one tensor producer site.
#[derive(Debug, Clone)]
struct SplitSpec {
    /// Shared tensor name
    tensor: String,
    /// Producing layer name ("input" for declared network inputs)
    producer: String,
    /// Output slot on the producer
    output_slot: usize,
    /// Total number of split outputs
    split_count: usize,
    /// Loss weight relocated onto the highest-indexed output, 0 when none
    loss_weight: f32,
}

impl SplitSpec {
    fn output_name(&self, ordinal: usize) -> String {
        split_output_name(&self.producer, &self.tensor, self.output_slot, ordinal)
    }

    /// Build the synthesized Split layer
    fn to_layer(&self) -> LayerDef {
        let mut layer = LayerDef::new(
            split_layer_name(&self.producer, &self.tensor, self.output_slot),
            SPLIT_LAYER_TYPE,
        )
        .input(self.tensor.clone());

        for ordinal in 0..self.split_count {
            layer.outputs.push(self.output_name(ordinal));
        }
        if self.loss_weight != 0.0 {
            layer.loss_weights = vec![0.0; self.split_count];
            layer.loss_weights[self.split_count - 1] = self.loss_weight;
        }
        layer
    }
}

/// Rewrite plan: split specs per producer site, plus the split-output ordinal
/// assigned to every consumer site that falls inside a split group.
#[derive(Debug, Clone, Default)]
struct SplitPlan {
    splits: FxHashMap<TensorSite, SplitSpec>,
    assignments: FxHashMap<ConsumerSite, usize>,
}

/// Derive the rewrite plan from the usage map
///
/// Sites are visited in declaration order, so the plan is reproducible
/// bit-for-bit for a given input network.
fn plan_splits(net: &NetDef, usage: &UsageMap) -> SplitPlan {
    let mut plan = SplitPlan::default();

    for slot in 0..net.inputs.len() {
        plan_site(TensorSite::NetInput { slot }, usage, &mut plan);
    }
    for (i, layer) in net.layers.iter().enumerate() {
        for slot in 0..layer.outputs.len() {
            plan_site(TensorSite::LayerOutput { layer: i, slot }, usage, &mut plan);
        }
    }

    plan
}

fn plan_site(site: TensorSite, usage: &UsageMap, plan: &mut SplitPlan) {
    let Some(record) = usage.site(site) else {
        return;
    };
    let split_count = record.fan_out();
    if split_count <= 1 {
        // A single consumer, or a tensor that is solely a loss endpoint,
        // passes through under its original name.
        return;
    }

    // Structural consumers take ordinals 0..C in encounter order; a relocated
    // loss weight takes the highest-indexed output.
    for (ordinal, consumer) in record.consumers.iter().enumerate() {
        plan.assignments.insert(*consumer, ordinal);
    }
    plan.splits.insert(
        site,
        SplitSpec {
            tensor: record.tensor.clone(),
            producer: record.producer.clone(),
            output_slot: site.slot(),
            split_count,
            loss_weight: record.loss_weight,
        },
    );
}

/// Emit the rewritten network
fn apply_plan(net: &NetDef, usage: &UsageMap, plan: &SplitPlan) -> Result<NetDef> {
    let mut out = NetDef {
        name: net.name.clone(),
        inputs: net.inputs.clone(),
        layers: Vec::with_capacity(net.layers.len() + plan.splits.len()),
    };

    // Splits over declared network inputs precede every layer, and therefore
    // every consumer.
    for slot in 0..net.inputs.len() {
        if let Some(spec) = plan.splits.get(&TensorSite::NetInput { slot }) {
            tracing::debug!(
                tensor = %spec.tensor,
                split_count = spec.split_count,
                "inserting split for network input"
            );
            out.layers.push(spec.to_layer());
        }
    }

    for (i, layer) in net.layers.iter().enumerate() {
        let mut copy = layer.clone();

        // Rewire any input that reads from a split group to its own output.
        for (j, input) in copy.inputs.iter_mut().enumerate() {
            let consumer = ConsumerSite { layer: i, slot: j };
            let Some(site) = usage.resolve(consumer) else {
                continue;
            };
            let Some(spec) = plan.splits.get(&site) else {
                continue;
            };
            let ordinal = plan.assignments.get(&consumer).copied().ok_or_else(|| {
                NetError::UnresolvedSplitAssignment {
                    tensor: input.clone(),
                    layer: layer.name.clone(),
                    input_slot: j,
                }
            })?;
            *input = spec.output_name(ordinal);
        }

        // A relocated loss weight must not stay on the producer as well; the
        // objective would be seeded twice.
        for j in 0..copy.loss_weights.len().min(copy.outputs.len()) {
            let site = TensorSite::LayerOutput { layer: i, slot: j };
            if plan.splits.get(&site).is_some_and(|s| s.loss_weight != 0.0) {
                copy.loss_weights[j] = 0.0;
            }
        }

        out.layers.push(copy);

        // Splits for this layer's outputs go immediately after it, keeping
        // the emitted order topologically valid.
        for slot in 0..layer.outputs.len() {
            if let Some(spec) = plan.splits.get(&TensorSite::LayerOutput { layer: i, slot }) {
                tracing::debug!(
                    tensor = %spec.tensor,
                    producer = %spec.producer,
                    split_count = spec.split_count,
                    loss_weight = spec.loss_weight,
                    "inserting split layer"
                );
                out.layers.push(spec.to_layer());
            }
        }
    }

    tracing::debug!(
        layers_in = net.layers.len(),
        layers_out = out.layers.len(),
        splits = plan.splits.len(),
        "split insertion complete"
    );

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_consumer_is_untouched() {
        let net = NetDef::new("chain")
            .input("data")
            .layer(LayerDef::new("conv1", "Convolution").input("data").output("x"))
            .layer(LayerDef::new("pool1", "Pooling").input("x").output("p"));

        let rewritten = insert_splits(&net).unwrap();
        assert_eq!(rewritten, net);
    }

    #[test]
    fn test_two_consumers_get_a_split() {
        let net = NetDef::new("fan_out")
            .input("data")
            .layer(LayerDef::new("a", "Convolution").input("data").output("x"))
            .layer(LayerDef::new("b", "Pooling").input("x").output("p"))
            .layer(LayerDef::new("c", "ReLU").input("x").output("r"));

        let rewritten = insert_splits(&net).unwrap();
        assert_eq!(rewritten.layers.len(), 4);

        let split = &rewritten.layers[1];
        assert_eq!(split.name, "x_a_0_split");
        assert_eq!(split.layer_type, SPLIT_LAYER_TYPE);
        assert_eq!(split.inputs, vec!["x"]);
        assert_eq!(split.outputs, vec!["x_a_0_split_0", "x_a_0_split_1"]);
        assert!(split.loss_weights.is_empty());

        assert_eq!(rewritten.layers[2].inputs, vec!["x_a_0_split_0"]);
        assert_eq!(rewritten.layers[3].inputs, vec!["x_a_0_split_1"]);
    }

    #[test]
    fn test_loss_weight_moves_to_last_split_output() {
        let net = NetDef::new("loss")
            .input("data")
            .layer(LayerDef::new("ip", "InnerProduct").input("data").output("pred").loss(1.5))
            .layer(LayerDef::new("acc", "Accuracy").input("pred").output("acc"));

        let rewritten = insert_splits(&net).unwrap();
        assert_eq!(rewritten.layers.len(), 3);

        // the producer no longer carries the weight
        let ip = &rewritten.layers[0];
        assert_eq!(ip.loss_weight(0), 0.0);

        let split = &rewritten.layers[1];
        assert_eq!(split.outputs.len(), 2);
        assert_eq!(split.loss_weights, vec![0.0, 1.5]);

        // the structural consumer reads ordinal 0; the loss output has no
        // structural consumer and seeds the gradient path on its own
        assert_eq!(rewritten.layers[2].inputs, vec!["pred_ip_0_split_0"]);
    }

    #[test]
    fn test_loss_only_endpoint_needs_no_split() {
        let net = NetDef::new("loss_only")
            .input("data")
            .layer(LayerDef::new("ip", "InnerProduct").input("data").output("pred").loss(1.0));

        let rewritten = insert_splits(&net).unwrap();
        assert_eq!(rewritten, net);
    }

    #[test]
    fn test_network_input_split_precedes_all_layers() {
        let net = NetDef::new("shared_input")
            .input("data")
            .layer(LayerDef::new("a", "Convolution").input("data").output("x"))
            .layer(LayerDef::new("b", "Convolution").input("data").output("y"));

        let rewritten = insert_splits(&net).unwrap();
        assert_eq!(rewritten.layers.len(), 3);

        let split = &rewritten.layers[0];
        assert_eq!(split.name, "data_input_0_split");
        assert_eq!(split.inputs, vec!["data"]);
        assert_eq!(rewritten.layers[1].inputs, vec!["data_input_0_split_0"]);
        assert_eq!(rewritten.layers[2].inputs, vec!["data_input_0_split_1"]);
    }

    #[test]
    fn test_rewrite_pass_trait() {
        let pass = InsertSplits;
        assert_eq!(pass.name(), "insert-splits");

        let net = NetDef::new("chain")
            .input("data")
            .layer(LayerDef::new("conv1", "Convolution").input("data").output("x"));
        assert_eq!(pass.run(&net).unwrap(), net);
    }

    #[test]
    fn test_dangling_reference_aborts() {
        let net = NetDef::new("dangling")
            .layer(LayerDef::new("a", "Pooling").input("ghost").output("p"));

        assert!(matches!(
            insert_splits(&net),
            Err(NetError::DanglingReference { .. })
        ));
    }
}
