use std::fmt::Display;

use crate::{
    hir::{BinaryOp, BlockId, CallTarget, Literal, Representation},
    lir::{Chunk, Gap, InnerPosition, Instruction, Label, Operand, OsrEntry},
    target::Target,
};

use super::{CodeGen, GapResolver};

/// A `CodeGen` that writes pseudo assembly, one line per emitted
/// instruction. Offsets are line numbers.
pub struct Listing<'a> {
    chunk: &'a Chunk,
    target: Target,
    resolver: GapResolver,
    current_block: BlockId,
    lines: Vec<String>,
}

impl<'a> Display for Listing<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in self.lines.iter() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

impl<'a> Listing<'a> {
    pub fn new(chunk: &'a Chunk) -> Listing<'a> {
        let target = chunk.target();
        Listing {
            chunk,
            target,
            resolver: GapResolver::for_target(target),
            current_block: 0,
            lines: vec![],
        }
    }

    #[inline(always)]
    pub fn lines(&self) -> &Vec<String> {
        &self.lines
    }

    fn emit<S: Into<String>>(&mut self, line: S) {
        self.lines.push(format!("  {}", line.into()));
    }

    fn operand(&self, op: &Operand) -> String {
        let ptr = self.target.pointer_size() as i32;
        let slot = |index: i32| {
            let offset = if index >= 0 {
                -(index + 1) * ptr
            } else {
                // skip the saved frame pointer and the return address
                -(index - 1) * ptr
            };
            format!("[{}{:+}]", self.target.frame_pointer(), offset)
        };

        match op {
            Operand::Register(r) => str!(self.target.register_name(*r)),
            Operand::DoubleRegister(r) => str!(self.target.double_register_name(*r)),
            Operand::StackSlot(i) | Operand::DoubleStackSlot(i) => slot(*i),
            Operand::Constant(v) => match self.chunk.constant(*v) {
                Some(lit) => format!("${}", lit),
                None => format!("${}", v),
            },
            Operand::Unallocated { .. } => op.to_string(),
        }
    }

    /// Whether `block` is the next block that will actually be emitted, in
    /// which case jumping to it can be omitted.
    fn is_next_emitted_block(&self, block: BlockId) -> bool {
        for next in self.current_block + 1..self.chunk.block_count() {
            let pos = unless!(self.chunk.label_position(next), else continue);
            let replaced = self
                .chunk
                .instruction(pos)
                .as_label()
                .map_or(false, Label::has_replacement);
            if !replaced {
                return next == block;
            }
        }
        false
    }

    fn emit_moves(&mut self, gap: &Gap) {
        for pos in InnerPosition::ALL.iter() {
            let moves = unless!(gap.get_parallel_move(*pos), else continue);
            for m in self.resolver.resolve(moves) {
                let line = format!("mov {}, {}", self.operand(&m.destination), self.operand(&m.source));
                self.emit(line);
            }
        }
    }

    fn emit_jump(&mut self, mnemonic: &str, block: BlockId) {
        let dest = self.chunk.lookup_destination(block);
        self.emit(format!("{} B{}", mnemonic, dest));
    }
}

impl<'a> CodeGen for Listing<'a> {
    fn offset(&self) -> usize {
        self.lines.len()
    }

    fn do_gap(&mut self, gap: &Gap) {
        self.emit_moves(gap);
    }

    fn do_label(&mut self, label: &Label) {
        self.current_block = label.block_id();
        let header = if label.is_loop_header() { " ; loop" } else { "" };
        self.lines.push(format!("B{}:{}", label.block_id(), header));
        self.emit_moves(label);
    }

    fn do_goto(&mut self, _: &Instruction, block: BlockId, include_stack_check: bool) {
        if include_stack_check {
            self.emit("call stack-guard");
        }
        let dest = self.chunk.lookup_destination(block);
        if !self.is_next_emitted_block(dest) {
            self.emit_jump("jmp", dest);
        }
    }

    fn do_lazy_bailout(&mut self, _: &Instruction, gap_instructions_size: usize) {
        if gap_instructions_size == 0 {
            // leave room to patch in the call to the deoptimizer
            self.emit("nop");
        }
    }

    fn do_deoptimize(&mut self, instr: &Instruction) {
        self.emit(format!("jmp deopt.{}", instr.environment().0));
    }

    fn do_osr_entry(&mut self, _: &Instruction, entry: &OsrEntry) {
        for (i, spill) in entry.register_spills().iter().enumerate() {
            if let Some(spill) = spill {
                let line = format!(
                    "mov {}, {}",
                    self.target.register_name(i as u8),
                    self.operand(spill)
                );
                self.emit(line);
            }
        }
        for (i, spill) in entry.double_register_spills().iter().enumerate() {
            if let Some(spill) = spill {
                let line = format!(
                    "movsd {}, {}",
                    self.target.double_register_name(i as u8),
                    self.operand(spill)
                );
                self.emit(line);
            }
        }
    }

    fn do_constant(&mut self, instr: &Instruction, literal: &Literal) {
        let line = format!("mov {}, ${}", self.operand(instr.result()), literal);
        self.emit(line);
    }

    fn do_parameter(&mut self, _: &Instruction, _: usize) {}

    fn do_arithmetic(
        &mut self,
        instr: &Instruction,
        op: BinaryOp,
        repr: Representation,
        left: &Operand,
        right: &Operand,
    ) {
        let line = match repr {
            Representation::Tagged => format!("call binary-op-stub.{}", op),
            Representation::Double => format!(
                "{}sd {}, {}",
                op,
                self.operand(left),
                self.operand(right)
            ),
            _ => format!("{}l {}, {}", op, self.operand(left), self.operand(right)),
        };
        self.emit(line);
        if instr.has_environment() {
            self.emit(format!("jo deopt.{}", instr.environment().0));
        }
    }

    fn do_push_argument(&mut self, _: &Instruction, value: &Operand) {
        let line = format!("push {}", self.operand(value));
        self.emit(line);
    }

    fn do_call(&mut self, _: &Instruction, target: &CallTarget, argc: usize) {
        self.emit(format!("call {} ; {} arguments", target, argc));
    }

    fn do_allocate(&mut self, instr: &Instruction, size: usize) {
        let line = format!("call allocate({}) ; -> {}", size, self.operand(instr.result()));
        self.emit(line);
    }

    fn do_stack_check(&mut self, _: &Instruction) {
        self.emit("call stack-guard");
    }

    fn do_branch(&mut self, _: &Instruction, cond: &Operand, then: BlockId, els: BlockId) {
        let line = format!("test {0}, {0}", self.operand(cond));
        self.emit(line);

        let then = self.chunk.lookup_destination(then);
        let els = self.chunk.lookup_destination(els);
        if self.is_next_emitted_block(then) {
            self.emit_jump("jz", els);
        } else if self.is_next_emitted_block(els) {
            self.emit_jump("jnz", then);
        } else {
            self.emit_jump("jnz", then);
            self.emit_jump("jmp", els);
        }
    }

    fn do_return(&mut self, _: &Instruction, _: &Operand) {
        let bytes = (self.chunk.parameter_count() + 1) * self.target.pointer_size();
        let fp = self.target.frame_pointer();
        self.emit(format!("mov {}, {}", self.target.stack_pointer(), fp));
        self.emit(format!("pop {}", fp));
        self.emit(format!("ret {}", bytes));
    }
}
