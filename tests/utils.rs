#![allow(dead_code)]

use lowir::{
    hir::{HGraph, Liveness, LivenessOracle, ValueId},
    lir::{self, Chunk, InnerPosition, MoveOperands, Operand},
    options::LowerOptions,
};

pub fn options() -> LowerOptions {
    let options = LowerOptions {
        verify: true,
        log_level: LowerOptions::from_env().log_level,
        ..LowerOptions::default()
    };
    // every test in a binary shares one global logger
    let _ = options.init_logging();
    options
}

pub fn lower(graph: &HGraph) -> Chunk {
    match lir::lower(graph, &options()) {
        Ok(chunk) => chunk,
        Err(err) => panic!("lowering failed: {}\n{}", err, graph),
    }
}

pub fn mnemonics(chunk: &Chunk) -> Vec<&'static str> {
    chunk.instructions().iter().map(|i| i.mnemonic()).collect()
}

/// Position of the first instruction lowered from `value`.
pub fn position_of(chunk: &Chunk, value: ValueId) -> usize {
    chunk
        .instructions()
        .iter()
        .position(|i| i.hydrogen_value() == Some(value))
        .unwrap_or_else(|| panic!("{} was not lowered", value))
}

pub fn vregs(ops: &[Operand]) -> Vec<usize> {
    ops.iter().filter_map(Operand::vreg).collect()
}

pub fn vreg(value: ValueId) -> Operand {
    Operand::unallocated(value, lowir::lir::Policy::Any)
}

pub fn moves_at(chunk: &Chunk, index: usize, pos: InnerPosition) -> Vec<MoveOperands> {
    chunk
        .get_gap_at(index)
        .get_parallel_move(pos)
        .map(|m| m.moves().clone())
        .unwrap_or_default()
}

/// Every operand of every pointer map must be live across the instruction's
/// originating value.
pub fn assert_pointer_maps_live(graph: &HGraph, chunk: &Chunk) {
    let liveness = Liveness::compute(graph);
    for map in chunk.pointer_maps() {
        let instr = chunk.instruction(map.position());
        assert!(instr.has_pointer_map());
        let value = instr
            .hydrogen_value()
            .expect("pointer map on an instruction without a value");
        for vreg in vregs(map.pointer_operands()) {
            assert!(
                liveness.is_live_across(value, ValueId(vreg)),
                "v{} is not live across {}",
                vreg,
                value
            );
        }
    }
}
