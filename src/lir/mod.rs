mod builder;
mod chunk;
mod env;
mod gap;
mod operand;
mod types;
mod visitor;

pub use builder::*;
pub use chunk::*;
pub use env::*;
pub use gap::*;
pub use operand::*;
pub use types::*;
pub use visitor::*;

use crate::{
    errors::LowerResult,
    hir::{HGraph, Liveness},
    options::LowerOptions,
};

/// Lowers `graph` into a chunk ready for register allocation.
pub fn lower(graph: &HGraph, options: &LowerOptions) -> LowerResult<Chunk> {
    let liveness = Liveness::compute(graph);
    let mut builder = ChunkBuilder::new(graph, &liveness, options.target);
    let chunk = builder.build()?;
    if options.verify {
        chunk.verify();
    }
    if log::log_enabled!(log::Level::Trace) {
        log::trace!("lowered chunk for {}:\n{}", options.target, chunk);
    }
    Ok(chunk)
}
