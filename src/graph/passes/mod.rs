// Rewrite passes over layer graphs
//
// Each pass is a pure transformation: it never mutates its input network and
// either returns a complete rewritten copy or an error, never a partial
// result.

mod insert_splits;

pub use insert_splits::{insert_splits, InsertSplits};

use crate::error::Result;
use crate::graph::def::NetDef;

/// Graph rewrite pass trait
///
/// Implementations produce a fresh network; callers may chain passes by
/// feeding each output into the next.
pub trait RewritePass {
    /// Get the name of this pass (for logging/debugging)
    fn name(&self) -> &str;

    /// Run the pass, producing a rewritten copy of `net`
    fn run(&self, net: &NetDef) -> Result<NetDef>;
}
