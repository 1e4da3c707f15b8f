use fnv::FnvHashMap;

use crate::{
    errors::{LowerError, LowerResult},
    hir::{
        BinaryOp, BlockId, CallTarget, Flags, FrameState, HGraph, HValue, Literal,
        LivenessOracle, Opcode, Representation, ValueId,
    },
    target::Target,
};

use super::{
    Chunk, EnvId, Environment, InstrKind, Instruction, Operand, OsrEntry, Policy, PointerMap,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Unused,
    Building,
    Done,
    Aborted,
}

/// Lowers one `HGraph` into a `Chunk`. A builder runs exactly once.
pub struct ChunkBuilder<'a> {
    graph: &'a HGraph,
    liveness: &'a dyn LivenessOracle,
    target: Target,
    status: Status,
    chunk: Option<Chunk>,
    abort_reason: Option<LowerError>,
    current_block: Option<BlockId>,
    current_value: Option<ValueId>,
    argument_count: usize,
    pending_lazy_deopt: Option<(usize, ValueId)>,
    operands: FnvHashMap<ValueId, Operand>,
}

impl<'a> ChunkBuilder<'a> {
    pub fn new(
        graph: &'a HGraph,
        liveness: &'a dyn LivenessOracle,
        target: Target,
    ) -> ChunkBuilder<'a> {
        ChunkBuilder {
            graph,
            liveness,
            target,
            status: Status::Unused,
            chunk: None,
            abort_reason: None,
            current_block: None,
            current_value: None,
            argument_count: 0,
            pending_lazy_deopt: None,
            operands: FnvHashMap::default(),
        }
    }

    #[inline(always)]
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn abort_reason(&self) -> Option<&LowerError> {
        self.abort_reason.as_ref()
    }

    pub fn build(&mut self) -> LowerResult<Chunk> {
        if self.status != Status::Unused {
            panic!("chunk builder reused after {:?}", self.status);
        }
        self.status = Status::Building;
        self.chunk = Some(Chunk::new(self.target, self.graph.parameter_count()));

        let graph = self.graph;
        for block in graph.blocks() {
            if let Err(err) = self.do_block(block.id) {
                return Err(self.abort(err));
            }
        }

        self.status = Status::Done;
        let chunk = match self.chunk.take() {
            Some(chunk) => chunk,
            None => panic!("chunk vanished while building"),
        };
        log::debug!(
            "lowered {} blocks into {} instructions:\n{}",
            graph.blocks().len(),
            chunk.len(),
            chunk
        );
        Ok(chunk)
    }

    fn abort(&mut self, err: LowerError) -> LowerError {
        let position = self
            .current_value
            .and_then(|v| self.graph.value(v).position);
        let err = err
            .at(self.current_block, self.current_value)
            .with_position(position);
        log::info!("aborting lowering: {}", err);

        self.status = Status::Aborted;
        self.chunk = None;
        self.abort_reason = Some(err.clone());
        err
    }

    fn chunk(&mut self) -> &mut Chunk {
        match self.chunk.as_mut() {
            Some(chunk) => chunk,
            None => panic!("no chunk under construction"),
        }
    }

    fn block_id(&self) -> BlockId {
        match self.current_block {
            Some(block) => block,
            None => panic!("no block is being lowered"),
        }
    }

    fn do_block(&mut self, id: BlockId) -> LowerResult {
        let graph = self.graph;
        let block = graph.block(id);
        self.current_block = Some(id);
        self.current_value = None;
        if self.argument_count != 0 {
            panic!("B{} starts with {} pushed arguments", id, self.argument_count);
        }

        self.chunk()
            .add_label(id, block.is_loop_header, block.predecessors.clone());
        for &value in block.values.iter() {
            self.current_value = Some(value);
            self.visit(graph.value(value))?;
        }
        self.current_value = None;

        if self.argument_count != 0 {
            panic!(
                "B{} ends with {} pushed arguments no call consumed",
                id, self.argument_count
            );
        }
        if let Some((_, call)) = self.pending_lazy_deopt {
            return Err(LowerError::malformed(format!(
                "{} is not followed by a simulate",
                call
            )));
        }
        Ok(())
    }

    fn visit(&mut self, node: &HValue) -> LowerResult {
        if self.pending_lazy_deopt.is_some() && !matches!(node.opcode, Opcode::Simulate) {
            return Err(LowerError::malformed(
                "a call that may deoptimize lazily must be followed by a simulate",
            ));
        }
        for used in node.opcode.uses() {
            self.operand_of(used)?;
        }

        let index = unless!(self.dispatch(node)?, else return Ok(()));

        if node.has(Flags::MAY_ALLOCATE) {
            self.assign_pointer_map(node, index);
        }
        let overflows = node.has(Flags::CAN_OVERFLOW) && node.repr == Representation::Integer32;
        if node.has(Flags::CAN_DEOPTIMIZE) || overflows {
            self.assign_environment(node, index)?;
        }
        if node.has(Flags::HAS_LAZY_DEOPT) {
            self.pending_lazy_deopt = Some((index, node.id));
        }
        Ok(())
    }

    /// Lowers one node. Returns the position of the instruction that carries
    /// the node's metadata, if any instruction was emitted.
    fn dispatch(&mut self, node: &HValue) -> LowerResult<Option<usize>> {
        Ok(match &node.opcode {
            Opcode::Constant(lit) => Some(self.do_constant(node, lit)),
            Opcode::Parameter(index) => Some(self.do_parameter(node, *index)?),
            Opcode::Arithmetic(op, lhs, rhs) => Some(self.do_arithmetic(node, *op, *lhs, *rhs)?),
            Opcode::Phi(_) => {
                self.operands
                    .insert(node.id, Operand::unallocated(node.id, Policy::Any));
                None
            }
            Opcode::PushArgument(value) => Some(self.do_push_argument(node, *value)?),
            Opcode::Call { target, argc } => Some(self.do_call(node, target, *argc)),
            Opcode::Allocate { size } => Some(self.define(
                node,
                InstrKind::Allocate { size: *size },
                Policy::MustHaveRegister,
            )),
            Opcode::StackCheck => Some(self.emit(node, InstrKind::StackCheck)),
            Opcode::Simulate => {
                self.do_simulate(node)?;
                None
            }
            Opcode::EnterInlined(closure) => {
                self.chunk().add_inlined_closure(*closure);
                None
            }
            Opcode::LeaveInlined => None,
            Opcode::OsrEntry => Some(self.do_osr_entry(node)?),
            Opcode::Deoptimize => Some(self.emit_control(node, InstrKind::Deoptimize)),
            Opcode::Goto {
                target,
                include_stack_check,
            } => Some(self.do_goto(node, *target, *include_stack_check)?),
            Opcode::Branch { cond, then, els } => {
                Some(self.do_branch(node, *cond, *then, *els)?)
            }
            Opcode::Return(value) => Some(self.do_return(node, *value)?),
            Opcode::Throw(_) => {
                return Err(LowerError::unsupported(
                    "throw is not supported by this backend",
                ))
            }
        })
    }

    fn emit(&mut self, node: &HValue, kind: InstrKind) -> usize {
        let block = self.block_id();
        self.chunk()
            .add_instruction(Instruction::new(kind, block).with_hydrogen_value(node.id))
    }

    /// Control instructions always follow a gap, which is where edge moves go.
    fn emit_control(&mut self, node: &HValue, kind: InstrKind) -> usize {
        let block = self.block_id();
        self.chunk().ensure_gap(block);
        self.emit(node, kind)
    }

    fn define(&mut self, node: &HValue, kind: InstrKind, policy: Policy) -> usize {
        let index = self.emit(node, kind);
        self.chunk()
            .instruction_mut(index)
            .set_result(Operand::unallocated(node.id, policy));
        self.operands
            .insert(node.id, Operand::unallocated(node.id, Policy::Any));
        index
    }

    /// Operand for reading `value` wherever it lives. Constants stay
    /// constants.
    fn operand_of(&self, value: ValueId) -> LowerResult<Operand> {
        match self.operands.get(&value) {
            Some(Operand::Constant(id)) => Ok(Operand::Constant(*id)),
            Some(_) => Ok(Operand::unallocated(value, Policy::Any)),
            None => Err(LowerError::malformed(format!(
                "{} is used before its definition",
                value
            ))),
        }
    }

    fn use_register(&self, value: ValueId) -> LowerResult<Operand> {
        self.operand_of(value)?;
        Ok(Operand::unallocated(value, Policy::MustHaveRegister))
    }

    fn use_fixed(&self, value: ValueId, reg: u8) -> LowerResult<Operand> {
        self.operand_of(value)?;
        Ok(Operand::unallocated(value, Policy::FixedRegister(reg)))
    }

    fn assign_pointer_map(&mut self, node: &HValue, index: usize) {
        let liveness = self.liveness;
        let mut map = PointerMap::new(index);
        for &live in liveness.live_across(node.id) {
            let value = self.graph.value(live);
            if !value.repr.is_tagged() || value.is_constant() {
                continue;
            }
            if self.operands.contains_key(&live) {
                map.record_pointer(Operand::unallocated(live, Policy::Any));
            }
        }
        self.chunk().add_pointer_map(index, map);
    }

    fn assign_environment(&mut self, node: &HValue, index: usize) -> LowerResult {
        let frame = match &node.frame {
            Some(frame) => frame,
            None => {
                return Err(LowerError::malformed(format!(
                    "{} may deoptimize but has no frame state",
                    node.opcode.name()
                )))
            }
        };
        let env = self.build_environment(frame)?;
        self.chunk().instruction_mut(index).set_environment(env);
        Ok(())
    }

    fn build_environment(&mut self, frame: &FrameState) -> LowerResult<EnvId> {
        let outer = match &frame.outer {
            Some(outer) => Some(self.build_environment(outer)?),
            None => None,
        };
        let values = frame
            .values
            .iter()
            .map(|v| self.operand_of(*v))
            .collect::<LowerResult<Vec<_>>>()?;
        let env = Environment::new(
            frame.closure,
            frame.ast_id,
            frame.parameter_count,
            values,
            outer,
        );
        Ok(self.chunk().add_environment(env))
    }

    fn do_constant(&mut self, node: &HValue, lit: &Literal) -> usize {
        let operand = self.chunk().define_constant_operand(node.id, lit.clone());
        let index = self.define(
            node,
            InstrKind::Constant {
                value: node.id,
                literal: lit.clone(),
            },
            Policy::MustHaveRegister,
        );
        self.operands.insert(node.id, operand);
        index
    }

    fn do_parameter(&mut self, node: &HValue, index: usize) -> LowerResult<usize> {
        let count = self.graph.parameter_count();
        if index > count {
            return Err(LowerError::malformed(format!(
                "parameter {} out of range, the function takes {}",
                index, count
            )));
        }
        let slot = self.chunk().get_parameter_stack_slot(index);
        Ok(self.define(node, InstrKind::Parameter { index }, Policy::FixedSlot(slot)))
    }

    fn do_arithmetic(
        &mut self,
        node: &HValue,
        op: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
    ) -> LowerResult<usize> {
        let repr = node.repr;
        let (left, right, result) = match repr {
            Representation::Integer32 => (
                self.use_register(lhs)?,
                self.operand_of(rhs)?,
                Policy::SameAsFirstInput,
            ),
            Representation::Double => {
                if !matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul) {
                    return Err(LowerError::unsupported(format!("double {}", op)));
                }
                (
                    self.use_register(lhs)?,
                    self.use_register(rhs)?,
                    Policy::SameAsFirstInput,
                )
            }
            Representation::Tagged => {
                let (l, r) = self.target.binary_stub_registers();
                (
                    self.use_fixed(lhs, l)?,
                    self.use_fixed(rhs, r)?,
                    Policy::FixedRegister(self.target.return_register()),
                )
            }
            Representation::None => {
                return Err(LowerError::malformed(
                    "arithmetic without a representation",
                ))
            }
        };

        Ok(self.define(
            node,
            InstrKind::Arithmetic {
                op,
                repr,
                left,
                right,
            },
            result,
        ))
    }

    fn do_push_argument(&mut self, node: &HValue, value: ValueId) -> LowerResult<usize> {
        let value = self.operand_of(value)?;
        self.argument_count += 1;
        Ok(self.emit(node, InstrKind::PushArgument { value }))
    }

    fn do_call(&mut self, node: &HValue, target: &CallTarget, argc: usize) -> usize {
        if argc > self.argument_count {
            panic!(
                "call to {} takes {} arguments but only {} are pushed",
                target, argc, self.argument_count
            );
        }
        self.argument_count -= argc;

        let ret = self.target.return_register();
        self.define(
            node,
            InstrKind::Call {
                target: target.clone(),
                argc,
            },
            Policy::FixedRegister(ret),
        )
    }

    /// Closes a pending lazy deoptimization point: the simulate's state
    /// becomes both the bailout's environment and the call's deoptimization
    /// environment.
    fn do_simulate(&mut self, node: &HValue) -> LowerResult {
        let (call_index, call) = unless!(self.pending_lazy_deopt.take(), else return Ok(()));
        let frame = match &node.frame {
            Some(frame) => frame,
            None => return Err(LowerError::malformed("simulate without a frame state")),
        };
        if let Some(call_frame) = &self.graph.value(call).frame {
            if call_frame.ast_id != frame.ast_id {
                return Err(LowerError::malformed(format!(
                    "simulate @{} does not match {} @{}",
                    frame.ast_id, call, call_frame.ast_id
                )));
            }
        }

        let env = self.build_environment(frame)?;
        let block = self.block_id();
        let chunk = self.chunk();
        let bailout = chunk.add_lazy_bailout(block, env);
        chunk
            .instruction_mut(call_index)
            .set_deoptimization_environment(env);
        log::debug!("lazy bailout for {} at {}", call, bailout);
        Ok(())
    }

    fn do_osr_entry(&mut self, node: &HValue) -> LowerResult<usize> {
        if self.chunk().osr_entry_mut().is_some() {
            return Err(LowerError::malformed("more than one osr entry"));
        }
        let entry = OsrEntry::new(self.target);
        Ok(self.emit(node, entry.into()))
    }

    fn do_goto(
        &mut self,
        node: &HValue,
        target: BlockId,
        include_stack_check: bool,
    ) -> LowerResult<usize> {
        let graph = self.graph;
        let block = self.block_id();
        let mut phis = graph.phis(target).peekable();
        if phis.peek().is_some() {
            let pred_index = match graph.block(target).predecessor_index(block) {
                Some(idx) => idx,
                None => {
                    return Err(LowerError::malformed(format!(
                        "B{} is not a predecessor of B{}",
                        block, target
                    )))
                }
            };

            let gap = self.chunk().ensure_gap(block);
            for phi in phis {
                let input = match &phi.opcode {
                    Opcode::Phi(inputs) => inputs.get(pred_index).copied(),
                    _ => None,
                };
                let input = match input {
                    Some(input) => input,
                    None => {
                        return Err(LowerError::malformed(format!(
                            "{} has no input for B{}",
                            phi.id, block
                        )))
                    }
                };
                let from = self.operand_of(input)?;
                self.chunk()
                    .add_gap_move(gap, from, Operand::unallocated(phi.id, Policy::Any));
            }
        }

        Ok(self.emit_control(
            node,
            InstrKind::Goto {
                block_id: target,
                include_stack_check,
            },
        ))
    }

    fn do_branch(
        &mut self,
        node: &HValue,
        cond: ValueId,
        then: BlockId,
        els: BlockId,
    ) -> LowerResult<usize> {
        let graph = self.graph;
        for &succ in [then, els].iter() {
            if graph.phis(succ).next().is_some() {
                return Err(LowerError::unsupported(format!(
                    "critical edge into B{}, which has phis",
                    succ
                )));
            }
        }

        let cond = self.use_register(cond)?;
        Ok(self.emit_control(node, InstrKind::Branch { cond, then, els }))
    }

    fn do_return(&mut self, node: &HValue, value: ValueId) -> LowerResult<usize> {
        let value = self.use_fixed(value, self.target.return_register())?;
        Ok(self.emit_control(node, InstrKind::Return { value }))
    }
}
