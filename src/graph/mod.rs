// Layer-graph module
//
// This module provides the in-memory representation of a network and the
// machinery around it:
// - Data model: ordered layers exchanging named tensors
// - Usage analysis: per-producer-site consumer tracking
// - Rewrite passes: split insertion for gradient-safe fan-out
// - Dependency view: petgraph-backed validation, statistics and DOT export
//
// The representation separates graph structure from tensor data; tensors are
// names here, never values.

pub mod def;
pub mod naming;
pub mod passes;
pub mod usage;
pub mod view;

// Re-exports for convenience
pub use def::{LayerDef, NetDef, SPLIT_LAYER_TYPE};
pub use passes::{insert_splits, InsertSplits, RewritePass};
pub use usage::{analyze_usage, ConsumerSite, TensorSite, TensorUsage, UsageMap};
pub use view::{DependencyView, GraphStatistics};
