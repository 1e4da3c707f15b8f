mod builder;
mod liveness;
mod types;

pub use builder::*;
pub use liveness::*;
pub use types::*;

/// Block-level control-flow graph. Node `i` carries block id `i`.
pub type ControlFlowGraph = petgraph::stable_graph::StableDiGraph<BlockId, (), usize>;
