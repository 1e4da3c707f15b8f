use petgraph::stable_graph::NodeIndex;

use super::{
    BinaryOp, BlockId, CallTarget, ClosureId, ControlFlowGraph, Flags, FrameState, HBlock,
    HGraph, HValue, Literal, Opcode, Representation, ValueId,
};

/// Assembles an `HGraph` block by block. Blocks are kept in creation order,
/// which must respect dominance.
pub struct GraphBuilder {
    curr_block: BlockId,
    parameter_count: usize,
    values: Vec<HValue>,
    blocks: Vec<HBlock>,
    position: Option<u32>,
}

impl GraphBuilder {
    pub fn new(parameter_count: usize) -> GraphBuilder {
        GraphBuilder {
            curr_block: 0,
            parameter_count,
            values: vec![],
            blocks: vec![HBlock::new(0)],
            position: None,
        }
    }

    pub fn done(mut self) -> HGraph {
        // ensure that each block has a final control flow instruction
        let num_blocks = self.blocks.len();
        for idx in 0..num_blocks {
            let ends_in_control = self.blocks[idx]
                .values
                .last()
                .map(|v| self.values[v.0].is_control())
                .unwrap_or(false);
            if ends_in_control {
                continue;
            }

            // add a goto to the next block
            if idx + 1 < num_blocks {
                self.curr_block = idx;
                self.goto(idx + 1);
            }
        }

        let mut cfg = ControlFlowGraph::default();
        for block in self.blocks.iter() {
            cfg.add_node(block.id);
        }

        let mut edges = vec![];
        for block in self.blocks.iter() {
            if let Some(last) = block.values.last() {
                for succ in self.values[last.0].opcode.successors() {
                    edges.push((block.id, succ));
                }
            }
        }

        for &(prec, succ) in edges.iter() {
            cfg.add_edge(NodeIndex::new(prec), NodeIndex::new(succ), ());
            let block = &mut self.blocks[succ];
            if !block.predecessors.contains(&prec) {
                block.predecessors.push(prec);
            }
            // an edge coming from a later block is a back edge
            if prec >= succ {
                block.is_loop_header = true;
            }
        }

        HGraph {
            values: self.values,
            blocks: self.blocks,
            cfg,
            parameter_count: self.parameter_count,
        }
    }

    #[inline(always)]
    pub fn block(&mut self) -> &mut HBlock {
        &mut self.blocks[self.curr_block]
    }

    pub fn new_block(&mut self) -> BlockId {
        let label = self.blocks.len();
        self.blocks.push(HBlock::new(label));
        label
    }

    pub fn use_block(&mut self, label: BlockId) -> BlockId {
        let prev = self.curr_block;
        self.curr_block = label;
        prev
    }

    pub fn with_block<F>(&mut self, label: BlockId, f: F)
    where
        F: FnOnce(&mut GraphBuilder),
    {
        let prev_block = self.curr_block;
        self.curr_block = label;
        f(self);
        self.curr_block = prev_block;
    }

    /// Source position attached to every value added from now on.
    pub fn set_position(&mut self, position: Option<u32>) {
        self.position = position;
    }

    pub fn add(&mut self, opcode: Opcode) -> ValueId {
        let repr = match &opcode {
            Opcode::Constant(lit) => lit.representation(),
            Opcode::Arithmetic(..) => Representation::Integer32,
            Opcode::Parameter(_)
            | Opcode::Phi(_)
            | Opcode::Call { .. }
            | Opcode::Allocate { .. } => Representation::Tagged,
            _ => Representation::None,
        };
        self.add_with(opcode, repr)
    }

    pub fn add_with(&mut self, opcode: Opcode, repr: Representation) -> ValueId {
        let id = ValueId(self.values.len());
        let flags = opcode.default_flags();
        self.values.push(HValue {
            id,
            block: self.curr_block,
            opcode,
            repr,
            flags,
            frame: None,
            position: self.position,
        });
        self.block().values.push(id);
        id
    }

    pub fn set_frame(&mut self, value: ValueId, frame: FrameState) {
        self.values[value.0].frame = Some(frame);
    }

    pub fn set_flags(&mut self, value: ValueId, flags: Flags) {
        self.values[value.0].flags = flags;
    }

    pub fn add_flags(&mut self, value: ValueId, flags: Flags) {
        self.values[value.0].flags.insert(flags);
    }

    pub fn constant(&mut self, lit: Literal) -> ValueId {
        self.add(Opcode::Constant(lit))
    }

    pub fn parameter(&mut self, index: usize) -> ValueId {
        self.add(Opcode::Parameter(index))
    }

    pub fn arithmetic(
        &mut self,
        op: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
        repr: Representation,
    ) -> ValueId {
        let id = self.add_with(Opcode::Arithmetic(op, lhs, rhs), repr);
        if repr.is_tagged() {
            // generic arithmetic goes through a stub that may allocate
            self.add_flags(id, Flags::MAY_ALLOCATE | Flags::HAS_SIDE_EFFECTS);
        }
        id
    }

    pub fn phi(&mut self, inputs: Vec<ValueId>, repr: Representation) -> ValueId {
        self.add_with(Opcode::Phi(inputs), repr)
    }

    pub fn push_argument(&mut self, value: ValueId) -> ValueId {
        self.add(Opcode::PushArgument(value))
    }

    pub fn call(&mut self, target: CallTarget, argc: usize) -> ValueId {
        self.add(Opcode::Call { target, argc })
    }

    pub fn allocate(&mut self, size: usize) -> ValueId {
        self.add(Opcode::Allocate { size })
    }

    pub fn stack_check(&mut self, frame: FrameState) -> ValueId {
        let id = self.add(Opcode::StackCheck);
        self.set_frame(id, frame);
        id
    }

    pub fn simulate(&mut self, frame: FrameState) -> ValueId {
        let id = self.add(Opcode::Simulate);
        self.set_frame(id, frame);
        id
    }

    pub fn enter_inlined(&mut self, closure: ClosureId) -> ValueId {
        self.add(Opcode::EnterInlined(closure))
    }

    pub fn leave_inlined(&mut self) -> ValueId {
        self.add(Opcode::LeaveInlined)
    }

    pub fn osr_entry(&mut self, frame: FrameState) -> ValueId {
        let id = self.add(Opcode::OsrEntry);
        self.set_frame(id, frame);
        id
    }

    pub fn deoptimize(&mut self, frame: FrameState) -> ValueId {
        let id = self.add(Opcode::Deoptimize);
        self.set_frame(id, frame);
        id
    }

    pub fn goto(&mut self, target: BlockId) -> ValueId {
        self.add(Opcode::Goto {
            target,
            include_stack_check: false,
        })
    }

    pub fn goto_with_stack_check(&mut self, target: BlockId) -> ValueId {
        self.add(Opcode::Goto {
            target,
            include_stack_check: true,
        })
    }

    pub fn branch(&mut self, cond: ValueId, then: BlockId, els: BlockId) -> ValueId {
        self.add(Opcode::Branch { cond, then, els })
    }

    pub fn ret(&mut self, value: ValueId) -> ValueId {
        self.add(Opcode::Return(value))
    }

    pub fn throw(&mut self, value: ValueId) -> ValueId {
        self.add(Opcode::Throw(value))
    }
}
