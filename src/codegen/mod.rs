use crate::{
    hir::{BinaryOp, BlockId, CallTarget, ClosureId, Literal, Representation},
    lir::{Chunk, EnvId, Gap, Instruction, Label, Operand, OsrEntry},
};

mod listing;
mod resolver;

pub use listing::*;
pub use resolver::*;

/// Native emission hook. `Instruction::compile_to_native` calls exactly one
/// `do_*` method per instruction.
pub trait CodeGen {
    /// Offset of the next emitted instruction.
    fn offset(&self) -> usize;

    fn do_gap(&mut self, gap: &Gap);
    fn do_label(&mut self, label: &Label);
    fn do_goto(&mut self, instr: &Instruction, block: BlockId, include_stack_check: bool);
    fn do_lazy_bailout(&mut self, instr: &Instruction, gap_instructions_size: usize);
    fn do_deoptimize(&mut self, instr: &Instruction);
    fn do_osr_entry(&mut self, instr: &Instruction, entry: &OsrEntry);
    fn do_constant(&mut self, instr: &Instruction, literal: &Literal);
    fn do_parameter(&mut self, instr: &Instruction, index: usize);
    fn do_arithmetic(
        &mut self,
        instr: &Instruction,
        op: BinaryOp,
        repr: Representation,
        left: &Operand,
        right: &Operand,
    );
    fn do_push_argument(&mut self, instr: &Instruction, value: &Operand);
    fn do_call(&mut self, instr: &Instruction, target: &CallTarget, argc: usize);
    fn do_allocate(&mut self, instr: &Instruction, size: usize);
    fn do_stack_check(&mut self, instr: &Instruction);
    fn do_branch(&mut self, instr: &Instruction, cond: &Operand, then: BlockId, els: BlockId);
    fn do_return(&mut self, instr: &Instruction, value: &Operand);
}

/// Code offset right after an instruction that may collect garbage, with the
/// locations holding heap references there.
#[derive(Clone, Debug, PartialEq)]
pub struct Safepoint {
    pub offset: usize,
    pub position: usize,
    pub pointers: Vec<Operand>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeoptEntry {
    pub offset: usize,
    pub position: usize,
    pub environment: EnvId,
    /// Entered after a call returns rather than before the instruction runs.
    pub lazy: bool,
}

/// Tables produced alongside the code.
#[derive(Clone, Debug, Default)]
pub struct CodeTables {
    pub safepoints: Vec<Safepoint>,
    pub deopt_entries: Vec<DeoptEntry>,
    pub inlined_closures: Vec<ClosureId>,
}

/// Emits every instruction of `chunk` in order. Blocks whose label was
/// replaced during elision are skipped entirely.
pub fn generate(chunk: &Chunk, cg: &mut dyn CodeGen) -> CodeTables {
    let mut tables = CodeTables {
        inlined_closures: chunk.inlined_closures().clone(),
        ..CodeTables::default()
    };

    let mut skipping = false;
    for (position, instr) in chunk.instructions().iter().enumerate() {
        if let Some(label) = instr.as_label() {
            skipping = label.has_replacement();
            if skipping {
                log::debug!("skipping elided block B{}", label.block_id());
            } else {
                label.bind_target().bind(cg.offset());
            }
        }
        if skipping {
            continue;
        }

        let start = cg.offset();
        instr.compile_to_native(cg);

        if instr.has_environment() {
            let lazy = instr.is_lazy_bailout();
            tables.deopt_entries.push(DeoptEntry {
                offset: if lazy { cg.offset() } else { start },
                position,
                environment: instr.environment(),
                lazy,
            });
        }
        if instr.has_pointer_map() {
            let map = chunk.pointer_map(instr.pointer_map());
            tables.safepoints.push(Safepoint {
                offset: cg.offset(),
                position,
                pointers: map.pointer_operands().clone(),
            });
        }
    }

    log::debug!(
        "generated {} safepoints and {} deoptimization entries",
        tables.safepoints.len(),
        tables.deopt_entries.len()
    );
    tables
}
