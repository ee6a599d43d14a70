// Usage analysis for layer graphs
//
// One declaration-order scan over a network, recording for every tensor
// producer site the ordered list of consumer sites and any loss weight
// attached to the tensor. A layer may rewrite a tensor in place (same name as
// input and output), so records are keyed by producer site rather than by bare
// name; a consumer binds to the most recent producer at its point of
// declaration.

use crate::error::{NetError, Result};
use crate::graph::def::NetDef;
use crate::graph::naming::INPUT_PSEUDO_LAYER;
use rustc_hash::FxHashMap;

/// A tensor producer site: either a declared network input or a layer output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorSite {
    /// Declared network input at the given slot
    NetInput { slot: usize },

    /// Output `slot` of the layer at declaration index `layer`
    LayerOutput { layer: usize, slot: usize },
}

impl TensorSite {
    /// Output slot on the producer (declared-input slot for network inputs)
    pub fn slot(&self) -> usize {
        match *self {
            TensorSite::NetInput { slot } => slot,
            TensorSite::LayerOutput { slot, .. } => slot,
        }
    }
}

/// A consumer site: input `slot` of the layer at declaration index `layer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerSite {
    pub layer: usize,
    pub slot: usize,
}

/// Usage record for one tensor producer site.
#[derive(Debug, Clone)]
pub struct TensorUsage {
    /// Tensor name at this site
    pub tensor: String,

    /// Name of the producing layer ("input" for declared network inputs)
    pub producer: String,

    /// Consumer sites in encounter order
    pub consumers: Vec<ConsumerSite>,

    /// Loss weight attached to this output, 0 when the tensor is not a loss
    pub loss_weight: f32,
}

impl TensorUsage {
    /// Whether the tensor is (also) a training objective
    pub fn is_loss(&self) -> bool {
        self.loss_weight != 0.0
    }

    /// Number of downstream gradient buffers the tensor must fan out into:
    /// one per structural consumer, plus one for a nonzero loss weight.
    pub fn fan_out(&self) -> usize {
        self.consumers.len() + usize::from(self.is_loss())
    }
}

/// Result of the usage scan.
///
/// Lookup-only: all order-sensitive traversal re-walks the network in
/// declaration order and queries records by site, so map iteration order never
/// leaks into downstream behavior.
#[derive(Debug, Clone, Default)]
pub struct UsageMap {
    sites: FxHashMap<TensorSite, TensorUsage>,
    resolved: FxHashMap<ConsumerSite, TensorSite>,
}

impl UsageMap {
    /// Usage record for a producer site
    pub fn site(&self, site: TensorSite) -> Option<&TensorUsage> {
        self.sites.get(&site)
    }

    /// Producer site an input reference resolved to
    pub fn resolve(&self, consumer: ConsumerSite) -> Option<TensorSite> {
        self.resolved.get(&consumer).copied()
    }

    fn register(&mut self, site: TensorSite, tensor: &str, producer: &str) {
        self.sites.insert(
            site,
            TensorUsage {
                tensor: tensor.to_string(),
                producer: producer.to_string(),
                consumers: Vec::new(),
                loss_weight: 0.0,
            },
        );
    }

    fn record_mut(&mut self, site: TensorSite, tensor: &str) -> Result<&mut TensorUsage> {
        self.sites.get_mut(&site).ok_or_else(|| {
            NetError::InvalidModel(format!("no usage record for producer of '{}'", tensor))
        })
    }
}

/// Scan `net` once and build its usage map.
///
/// Fails with [`NetError::DanglingReference`] if any input reference names a
/// tensor with no recorded producer that is not a declared network input.
pub fn analyze_usage(net: &NetDef) -> Result<UsageMap> {
    let mut usage = UsageMap::default();
    let mut last_producer: FxHashMap<&str, TensorSite> = FxHashMap::default();

    for (slot, tensor) in net.inputs.iter().enumerate() {
        let site = TensorSite::NetInput { slot };
        last_producer.insert(tensor.as_str(), site);
        usage.register(site, tensor, INPUT_PSEUDO_LAYER);
    }

    for (i, layer) in net.layers.iter().enumerate() {
        for (j, tensor) in layer.inputs.iter().enumerate() {
            let site = last_producer.get(tensor.as_str()).copied().ok_or_else(|| {
                NetError::DanglingReference {
                    tensor: tensor.clone(),
                    layer: layer.name.clone(),
                    input_slot: j,
                }
            })?;
            let consumer = ConsumerSite { layer: i, slot: j };
            usage.resolved.insert(consumer, site);
            usage.record_mut(site, tensor)?.consumers.push(consumer);
        }

        for (j, tensor) in layer.outputs.iter().enumerate() {
            let site = TensorSite::LayerOutput { layer: i, slot: j };
            last_producer.insert(tensor.as_str(), site);
            usage.register(site, tensor, &layer.name);
        }

        // A nonzero loss weight marks the output as a training objective; it
        // counts as one more conceptual consumer when planning splits.
        let weighted = layer.loss_weights.len().min(layer.outputs.len());
        for j in 0..weighted {
            let weight = layer.loss_weights[j];
            if weight != 0.0 {
                let site = TensorSite::LayerOutput { layer: i, slot: j };
                usage.record_mut(site, &layer.outputs[j])?.loss_weight = weight;
            }
        }
    }

    Ok(usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::def::LayerDef;

    fn fan_out_net() -> NetDef {
        NetDef::new("fan_out")
            .input("data")
            .layer(LayerDef::new("conv1", "Convolution").input("data").output("x"))
            .layer(LayerDef::new("pool1", "Pooling").input("x").output("p"))
            .layer(LayerDef::new("relu1", "ReLU").input("x").output("r"))
    }

    #[test]
    fn test_consumers_in_encounter_order() {
        let usage = analyze_usage(&fan_out_net()).unwrap();

        let record = usage.site(TensorSite::LayerOutput { layer: 0, slot: 0 }).unwrap();
        assert_eq!(record.tensor, "x");
        assert_eq!(record.producer, "conv1");
        assert_eq!(
            record.consumers,
            vec![ConsumerSite { layer: 1, slot: 0 }, ConsumerSite { layer: 2, slot: 0 }]
        );
        assert_eq!(record.fan_out(), 2);
        assert!(!record.is_loss());
    }

    #[test]
    fn test_network_input_site() {
        let usage = analyze_usage(&fan_out_net()).unwrap();

        let record = usage.site(TensorSite::NetInput { slot: 0 }).unwrap();
        assert_eq!(record.tensor, "data");
        assert_eq!(record.producer, INPUT_PSEUDO_LAYER);
        assert_eq!(record.consumers, vec![ConsumerSite { layer: 0, slot: 0 }]);
    }

    #[test]
    fn test_loss_weight_counts_as_consumer() {
        let net = NetDef::new("loss")
            .input("data")
            .layer(LayerDef::new("ip", "InnerProduct").input("data").output("pred").loss(2.5))
            .layer(LayerDef::new("acc", "Accuracy").input("pred").output("acc"));
        let usage = analyze_usage(&net).unwrap();

        let record = usage.site(TensorSite::LayerOutput { layer: 0, slot: 0 }).unwrap();
        assert!(record.is_loss());
        assert_eq!(record.loss_weight, 2.5);
        assert_eq!(record.consumers.len(), 1);
        assert_eq!(record.fan_out(), 2);
    }

    #[test]
    fn test_in_place_binds_to_latest_producer() {
        let net = NetDef::new("in_place")
            .input("data")
            .layer(LayerDef::new("conv1", "Convolution").input("data").output("x"))
            .layer(LayerDef::new("relu1", "ReLU").input("x").output("x"))
            .layer(LayerDef::new("pool1", "Pooling").input("x").output("p"));
        let usage = analyze_usage(&net).unwrap();

        // conv1's "x" is consumed only by the in-place relu1
        let conv_out = usage.site(TensorSite::LayerOutput { layer: 0, slot: 0 }).unwrap();
        assert_eq!(conv_out.consumers, vec![ConsumerSite { layer: 1, slot: 0 }]);

        // pool1 reads relu1's re-production of "x"
        let relu_out = usage.site(TensorSite::LayerOutput { layer: 1, slot: 0 }).unwrap();
        assert_eq!(relu_out.consumers, vec![ConsumerSite { layer: 2, slot: 0 }]);
        assert_eq!(usage.resolve(ConsumerSite { layer: 2, slot: 0 }), Some(TensorSite::LayerOutput { layer: 1, slot: 0 }));
    }

    #[test]
    fn test_dangling_reference() {
        let net = NetDef::new("dangling")
            .layer(LayerDef::new("pool1", "Pooling").input("y").output("p"));

        match analyze_usage(&net) {
            Err(NetError::DanglingReference { tensor, layer, input_slot }) => {
                assert_eq!(tensor, "y");
                assert_eq!(layer, "pool1");
                assert_eq!(input_slot, 0);
            }
            other => panic!("expected DanglingReference, got {:?}", other),
        }
    }

    #[test]
    fn test_short_loss_weight_list() {
        let net = NetDef::new("short")
            .input("data")
            .layer(LayerDef::new("ip", "InnerProduct").input("data").output("a").output("b"));
        let usage = analyze_usage(&net).unwrap();

        // no loss weights at all: both outputs are plain tensors
        assert!(!usage.site(TensorSite::LayerOutput { layer: 0, slot: 0 }).unwrap().is_loss());
        assert!(!usage.site(TensorSite::LayerOutput { layer: 0, slot: 1 }).unwrap().is_loss());
    }
}
