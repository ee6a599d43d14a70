// Deterministic naming for synthesized split layers
//
// Names are derived from the producing layer, the shared tensor and the
// tensor's output slot. `(layer, output_slot)` is unique within a valid graph,
// so split layer names never collide; the consumer ordinal keeps the outputs
// of one split layer pairwise distinct.

/// Pseudo-layer name used when the split source is a declared network input.
pub const INPUT_PSEUDO_LAYER: &str = "input";

/// Name of the split layer synthesized for one shared tensor
pub fn split_layer_name(layer_name: &str, tensor_name: &str, output_slot: usize) -> String {
    format!("{}_{}_{}_split", tensor_name, layer_name, output_slot)
}

/// Name of one split output, serving the consumer at `split_ordinal`
pub fn split_output_name(
    layer_name: &str,
    tensor_name: &str,
    output_slot: usize,
    split_ordinal: usize,
) -> String {
    format!(
        "{}_{}",
        split_layer_name(layer_name, tensor_name, output_slot),
        split_ordinal
    )
}
