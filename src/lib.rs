//! # netgraph
//!
//! Layer-graph IR and gradient-safe rewrite passes for training networks.
//!
//! ## Overview
//!
//! A network is an ordered list of layers exchanging named tensors. When one
//! tensor feeds several downstream layers (or feeds one layer while also being
//! weighted as a training objective), naive backpropagation would make every
//! consumer accumulate into the same shared gradient buffer. The
//! [`insert_splits`] pass rewrites the graph so that every tensor has at most
//! one consumer: each shared tensor gets a synthesized `Split` layer with one
//! dedicated output per consumer, and the split owns the gradient summation.
//!
//! ## Architecture
//!
//! ```text
//! NetDef
//!     ↓
//! 1. Analyze usage → per-producer-site consumer lists and loss weights
//!     ↓
//! 2. Plan splits → which tensors fan out, split counts, loss relocation
//!     ↓
//! 3. Rewrite → copied layers, rewired inputs, Split layers in topological position
//!     ↓
//! rewritten NetDef (the input is never mutated)
//! ```
//!
//! ## Example
//!
//! ```
//! use netgraph::{insert_splits, LayerDef, NetDef};
//!
//! let net = NetDef::new("fan_out")
//!     .input("data")
//!     .layer(LayerDef::new("conv1", "Convolution").input("data").output("conv1"))
//!     .layer(LayerDef::new("pool1", "Pooling").input("conv1").output("pool1"))
//!     .layer(LayerDef::new("relu1", "ReLU").input("conv1").output("relu1"));
//!
//! // "conv1" feeds two layers, so a Split now fans it out
//! let rewritten = insert_splits(&net)?;
//! assert_eq!(rewritten.layers.len(), net.layers.len() + 1);
//! assert!(rewritten.layers[1].is_split());
//! # Ok::<(), netgraph::NetError>(())
//! ```
//!
//! The pass is synchronous and purely functional: the same input network
//! always produces the same output, and independent invocations never share
//! state. Serialization of [`NetDef`] is left to the surrounding
//! system; the types derive serde and round-trip losslessly.

pub mod error;
pub mod graph;

pub use error::{NetError, Result};
pub use graph::{
    insert_splits, DependencyView, InsertSplits, LayerDef, NetDef, RewritePass, SPLIT_LAYER_TYPE,
};

/// Get the version of netgraph
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
        assert!(ver.contains('.'));
    }
}
