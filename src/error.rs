//! Error types for layer-graph analysis and rewriting

use thiserror::Error;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, NetError>;

/// Errors that can occur while analyzing or rewriting a layer graph
#[derive(Debug, Error)]
pub enum NetError {
    /// An input reference names a tensor that no earlier layer produces and
    /// that is not a declared network input.
    #[error("unknown input tensor '{tensor}' (layer '{layer}', input slot {input_slot})")]
    DanglingReference {
        tensor: String,
        layer: String,
        input_slot: usize,
    },

    /// A consumer inside a planned split group has no split output assigned to
    /// it. This is a planner/rewriter inconsistency, not a user-input error.
    #[error(
        "no split output assigned for tensor '{tensor}' (layer '{layer}', input slot {input_slot})"
    )]
    UnresolvedSplitAssignment {
        tensor: String,
        layer: String,
        input_slot: usize,
    },

    #[error("Invalid model structure: {0}")]
    InvalidModel(String),
}

// Manual From implementation for errors surfaced by the dependency view.
impl From<anyhow::Error> for NetError {
    fn from(err: anyhow::Error) -> Self {
        NetError::InvalidModel(err.to_string())
    }
}
