use std::fmt::Display;

use fnv::FnvHashMap;

use crate::{
    hir::{BlockId, ClosureId, Literal, ValueId},
    target::Target,
};

use super::{
    AssignOperands, EnvId, Environment, Gap, GetOperandsMut, InnerPosition, InstrKind,
    Instruction, Label, Operand, OsrEntry, ParallelMove, PointerMap, PointerMapId,
};

/// The lowered form of one graph: an ordered instruction stream plus the side
/// tables its instructions refer to by handle.
#[derive(Debug)]
pub struct Chunk {
    target: Target,
    parameter_count: usize,
    instructions: Vec<Instruction>,
    pointer_maps: Vec<PointerMap>,
    environments: Vec<Environment>,
    constants: FnvHashMap<ValueId, Literal>,
    inlined_closures: Vec<ClosureId>,
    labels: Vec<Option<usize>>,
    predecessors: Vec<Vec<BlockId>>,
    spill_slot_count: usize,
    double_slot_count: usize,
    free_single_slot: Option<usize>,
}

impl Display for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, instr) in self.instructions.iter().enumerate() {
            write!(f, "{:>4}: {}", i, instr)?;
            if instr.has_pointer_map() {
                write!(f, " pointers={}", self.pointer_map(instr.pointer_map()))?;
            }
            if instr.has_environment() {
                write!(f, " env={}", self.environment(instr.environment()))?;
            }
            if instr.has_deoptimization_environment() {
                write!(
                    f,
                    " lazy-env={}",
                    self.environment(instr.deoptimization_environment())
                )?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl Chunk {
    pub fn new(target: Target, parameter_count: usize) -> Chunk {
        Chunk {
            target,
            parameter_count,
            instructions: vec![],
            pointer_maps: vec![],
            environments: vec![],
            constants: FnvHashMap::default(),
            inlined_closures: vec![],
            labels: vec![],
            predecessors: vec![],
            spill_slot_count: 0,
            double_slot_count: 0,
            free_single_slot: None,
        }
    }

    #[inline(always)]
    pub fn target(&self) -> Target {
        self.target
    }

    #[inline(always)]
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    #[inline(always)]
    pub fn instructions(&self) -> &Vec<Instruction> {
        &self.instructions
    }

    #[inline(always)]
    pub fn instruction(&self, index: usize) -> &Instruction {
        &self.instructions[index]
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Pointer maps, ordered by position.
    #[inline(always)]
    pub fn pointer_maps(&self) -> &Vec<PointerMap> {
        &self.pointer_maps
    }

    #[inline(always)]
    pub fn pointer_map(&self, id: PointerMapId) -> &PointerMap {
        &self.pointer_maps[id.0]
    }

    #[inline(always)]
    pub fn environments(&self) -> &Vec<Environment> {
        &self.environments
    }

    #[inline(always)]
    pub fn environment(&self, id: EnvId) -> &Environment {
        &self.environments[id.0]
    }

    #[inline(always)]
    pub fn inlined_closures(&self) -> &Vec<ClosureId> {
        &self.inlined_closures
    }

    #[inline(always)]
    pub fn constant(&self, value: ValueId) -> Option<&Literal> {
        self.constants.get(&value)
    }

    #[inline(always)]
    pub fn block_count(&self) -> usize {
        self.labels.len()
    }

    #[inline(always)]
    pub fn label_position(&self, block: BlockId) -> Option<usize> {
        self.labels.get(block).copied().flatten()
    }

    #[inline(always)]
    pub fn predecessors(&self, block: BlockId) -> &Vec<BlockId> {
        &self.predecessors[block]
    }

    /// Number of single-width spill units the frame needs.
    #[inline(always)]
    pub fn spill_slot_count(&self) -> usize {
        self.spill_slot_count
    }

    #[inline(always)]
    pub fn double_slot_count(&self) -> usize {
        self.double_slot_count
    }

    /// Hands out a fresh spill slot index. A double-width slot covers two
    /// units starting at an even index; the unit skipped to get there goes to
    /// the next single-width request.
    pub fn get_next_spill_index(&mut self, is_double: bool) -> usize {
        if !is_double {
            if let Some(slot) = self.free_single_slot.take() {
                return slot;
            }
            let slot = self.spill_slot_count;
            self.spill_slot_count += 1;
            return slot;
        }

        if self.spill_slot_count % 2 == 1 {
            self.free_single_slot = Some(self.spill_slot_count);
            self.spill_slot_count += 1;
        }
        let slot = self.spill_slot_count;
        self.spill_slot_count += 2;
        self.double_slot_count += 1;
        slot
    }

    pub fn get_next_spill_slot(&mut self, is_double: bool) -> Operand {
        let index = self.get_next_spill_index(is_double) as i32;
        if is_double {
            Operand::DoubleStackSlot(index)
        } else {
            Operand::StackSlot(index)
        }
    }

    /// Interns the constant defined by `value` and returns an operand naming it.
    pub fn define_constant_operand(&mut self, value: ValueId, literal: Literal) -> Operand {
        self.constants.entry(value).or_insert(literal);
        Operand::Constant(value)
    }

    /// Incoming stack slot of parameter `index`, where index 0 is the
    /// receiver. Parameter slots are negative so they never collide with
    /// spill slots.
    pub fn get_parameter_stack_slot(&self, index: usize) -> i32 {
        index as i32 - self.parameter_count as i32 - 1
    }

    fn label_at(&self, block: BlockId) -> &Label {
        let pos = self
            .label_position(block)
            .unwrap_or_else(|| panic!("B{} has no label", block));
        match self.instructions[pos].as_label() {
            Some(label) => label,
            None => panic!("label of B{} expected at {}", block, pos),
        }
    }

    /// The label control flow into `block` really lands on. Follows a single
    /// replacement; a longer chain is a bug in the elision pass.
    pub fn get_label(&self, block: BlockId) -> &Label {
        let label = self.label_at(block);
        let replacement = unless!(label.replacement(), else return label);
        let next = self.label_at(replacement);
        if let Some(further) = next.replacement() {
            panic!(
                "label B{} is replaced by B{} which is in turn replaced by B{}",
                block, replacement, further
            );
        }
        next
    }

    pub fn lookup_destination(&self, block: BlockId) -> BlockId {
        self.get_label(block).block_id()
    }

    #[inline(always)]
    pub fn is_gap_at(&self, index: usize) -> bool {
        self.instructions[index].is_gap()
    }

    pub fn get_gap_at(&self, index: usize) -> &Gap {
        match self.instructions[index].as_gap() {
            Some(gap) => gap,
            None => panic!("no gap at {}", index),
        }
    }

    pub fn get_gap_at_mut(&mut self, index: usize) -> &mut Gap {
        match self.instructions[index].as_gap_mut() {
            Some(gap) => gap,
            None => panic!("no gap at {}", index),
        }
    }

    /// Closest gap at or before `index`.
    pub fn nearest_gap_pos(&self, index: usize) -> usize {
        let mut index = index;
        while !self.is_gap_at(index) {
            index -= 1;
        }
        index
    }

    /// Adds `from -> to` to the START moves of the gap at `index`. When the
    /// instruction at `index` is not a gap, a new gap is inserted there first
    /// and everything from `index` on moves down by one.
    pub fn add_gap_move(&mut self, index: usize, from: Operand, to: Operand) {
        if index == self.instructions.len() || !self.is_gap_at(index) {
            self.insert_gap(index);
        }
        self.get_gap_at_mut(index)
            .get_or_create_parallel_move(InnerPosition::Start)
            .add_move(from, to);
    }

    fn insert_gap(&mut self, index: usize) {
        if index > self.instructions.len() || index == 0 {
            panic!("cannot insert a gap at {}", index);
        }

        let block = match self.instructions.get(index) {
            Some(instr) => instr.block(),
            None => self.instructions[index - 1].block(),
        };
        self.instructions
            .insert(index, Instruction::new(Gap::new(block), block));

        for pos in self.labels.iter_mut().flatten() {
            if *pos >= index {
                *pos += 1;
            }
        }
        for map in self.pointer_maps.iter_mut() {
            if map.position() >= index {
                map.set_position(map.position() + 1);
            }
        }
        self.update_lazy_bailouts();
        log::debug!("inserted gap at {} in B{}", index, block);
    }

    /// Number of gaps directly in front of `index`.
    fn gaps_before(&self, index: usize) -> usize {
        self.instructions[..index]
            .iter()
            .rev()
            .take_while(|instr| instr.is_gap())
            .count()
    }

    fn update_lazy_bailouts(&mut self) {
        let sizes = self
            .instructions
            .iter()
            .enumerate()
            .filter(|(_, instr)| instr.is_lazy_bailout())
            .map(|(i, _)| (i, self.gaps_before(i)))
            .collect::<Vec<_>>();

        for (i, size) in sizes {
            if let InstrKind::LazyBailout {
                gap_instructions_size,
            } = self.instructions[i].kind_mut()
            {
                *gap_instructions_size = size;
            }
        }
    }

    /// Position of the last instruction of the block whose label sits at
    /// `start`.
    fn block_end(&self, start: usize) -> usize {
        self.instructions[start + 1..]
            .iter()
            .position(Instruction::is_label)
            .map(|offset| start + offset)
            .unwrap_or(self.instructions.len() - 1)
    }

    /// The control instruction ending `block`, if it ends in one.
    fn block_control(&self, block: BlockId) -> Option<usize> {
        let start = self.label_position(block)?;
        let end = self.block_end(start);
        if self.instructions[end].is_control() {
            Some(end)
        } else {
            None
        }
    }

    /// Elides blocks that consist of nothing but gaps and an unconditional
    /// goto. Predecessors jump straight to the destination and the elided
    /// block's moves are carried over into the predecessors' final gaps.
    /// Returns the number of elided blocks.
    pub fn mark_empty_blocks(&mut self) -> usize {
        let mut elided = 0;
        for block in (1..self.labels.len()).rev() {
            let start = unless!(self.label_position(block), else continue);
            let end = self.block_end(start);
            let target = match self.instructions[end].kind() {
                InstrKind::Goto {
                    block_id,
                    include_stack_check: false,
                } => *block_id,
                _ => continue,
            };
            if !self.instructions[start + 1..end].iter().all(Instruction::is_gap) {
                continue;
            }

            let dest = self.lookup_destination(target);
            if dest == block {
                continue;
            }

            let moves = self.instructions[start..end]
                .iter()
                .filter_map(Instruction::as_gap)
                .fold(ParallelMove::new(), |acc, gap| acc.then(&gap.flatten()));

            let preds = self.predecessors[block].clone();
            let mut controls = vec![];
            for &pred in preds.iter() {
                let control = unless!(self.block_control(pred), else break);
                let placeable = match self.instructions[control].kind() {
                    InstrKind::Goto { .. } => true,
                    // a branch edge has no gap of its own to carry moves
                    InstrKind::Branch { .. } => moves.is_empty(),
                    _ => false,
                };
                if !placeable {
                    break;
                }
                controls.push((pred, control));
            }
            if controls.len() != preds.len() {
                log::debug!("keeping B{}: its moves cannot be placed on every edge", block);
                continue;
            }

            for (pred, control) in controls {
                self.instructions[control].kind_mut().retarget(block, dest);
                if !moves.is_empty() {
                    let gap = self.get_gap_at_mut(control - 1);
                    let after = gap
                        .get_parallel_move(InnerPosition::After)
                        .cloned()
                        .unwrap_or_default();
                    gap.set_parallel_move(InnerPosition::After, after.then(&moves));
                }
                if !self.predecessors[dest].contains(&pred) {
                    self.predecessors[dest].push(pred);
                }
            }
            self.predecessors[dest].retain(|&p| p != block);
            let is_loop_header = self.predecessors[dest].iter().any(|&p| p >= dest);
            if let Some(pos) = self.label_position(dest) {
                if let Some(label) = self.instructions[pos].as_label_mut() {
                    label.set_loop_header(is_loop_header);
                }
            }

            for instr in self.instructions[start..end].iter_mut() {
                if let Some(gap) = instr.as_gap_mut() {
                    gap.clear();
                }
            }
            for pos in self.labels.iter().flatten().copied().collect::<Vec<_>>() {
                if let Some(label) = self.instructions[pos].as_label_mut() {
                    if label.replacement() == Some(block) {
                        label.set_replacement(dest);
                    }
                }
            }
            if let Some(label) = self.instructions[start].as_label_mut() {
                label.set_replacement(dest);
            }

            log::debug!("elided empty block B{}, jumping to B{} instead", block, dest);
            elided += 1;
        }
        elided
    }

    /// Mutable operands of the instruction at `index`, inputs first.
    pub fn operands_mut(&mut self, index: usize) -> Vec<&mut Operand> {
        self.instructions[index].get_operands_mut()
    }

    /// Replaces virtual register `vreg` everywhere it appears: instruction
    /// operands, gap moves, environments and pointer maps.
    pub fn assign_vreg(&mut self, vreg: usize, operand: Operand) -> usize {
        self.instructions.assign_vreg(vreg, &operand)
            + self.environments.assign_vreg(vreg, &operand)
            + self.pointer_maps.assign_vreg(vreg, &operand)
    }

    pub fn osr_entry_mut(&mut self) -> Option<&mut OsrEntry> {
        self.instructions
            .iter_mut()
            .find_map(Instruction::as_osr_entry_mut)
    }

    pub(super) fn add_instruction(&mut self, instr: Instruction) -> usize {
        let index = self.instructions.len();
        self.instructions.push(instr);
        index
    }

    pub(super) fn instruction_mut(&mut self, index: usize) -> &mut Instruction {
        &mut self.instructions[index]
    }

    pub(super) fn add_label(
        &mut self,
        block: BlockId,
        is_loop_header: bool,
        predecessors: Vec<BlockId>,
    ) -> usize {
        if self.labels.len() <= block {
            self.labels.resize(block + 1, None);
            self.predecessors.resize(block + 1, vec![]);
        }
        let index = self.add_instruction(Instruction::new(Label::new(block, is_loop_header), block));
        self.labels[block] = Some(index);
        self.predecessors[block] = predecessors;
        index
    }

    /// Makes sure the last instruction is a gap and returns its position.
    pub(super) fn ensure_gap(&mut self, block: BlockId) -> usize {
        if self.instructions.last().map_or(false, Instruction::is_gap) {
            return self.instructions.len() - 1;
        }
        self.add_instruction(Instruction::new(Gap::new(block), block))
    }

    pub(super) fn add_lazy_bailout(&mut self, block: BlockId, env: EnvId) -> usize {
        let size = self.gaps_before(self.instructions.len());
        let mut instr = Instruction::new(
            InstrKind::LazyBailout {
                gap_instructions_size: size,
            },
            block,
        );
        instr.set_environment(env);
        self.add_instruction(instr)
    }

    pub(super) fn add_pointer_map(&mut self, index: usize, map: PointerMap) -> PointerMapId {
        let mut map = map;
        map.set_position(index);
        let id = PointerMapId(self.pointer_maps.len());
        self.pointer_maps.push(map);
        self.instructions[index].set_pointer_map(id);
        id
    }

    pub(super) fn add_environment(&mut self, env: Environment) -> EnvId {
        let id = EnvId(self.environments.len());
        self.environments.push(env);
        id
    }

    pub(super) fn add_inlined_closure(&mut self, closure: ClosureId) {
        if !self.inlined_closures.contains(&closure) {
            self.inlined_closures.push(closure);
        }
    }

    /// Structural self-check. Panics on the first inconsistency.
    pub fn verify(&self) {
        if let Some(first) = self.instructions.first() {
            if !first.is_label() {
                panic!("chunk starts with {} instead of a label", first.mnemonic());
            }
        }

        for (block, pos) in self.labels.iter().enumerate() {
            let pos = unless!(*pos, else continue);
            match self.instructions.get(pos).and_then(Instruction::as_label) {
                Some(label) if label.block_id() == block => {
                    if let Some(r) = label.replacement() {
                        if self.label_at(r).has_replacement() {
                            panic!("replacement of B{} takes more than one hop", block);
                        }
                    }
                }
                _ => panic!("label table entry of B{} points at {}", block, pos),
            }
        }

        let mut prev = None;
        for (id, map) in self.pointer_maps.iter().enumerate() {
            if prev.map_or(false, |p| p >= map.position()) {
                panic!("pointer map {} is out of order", id);
            }
            prev = Some(map.position());

            let instr = match self.instructions.get(map.position()) {
                Some(instr) => instr,
                None => panic!("pointer map {} points past the end", id),
            };
            if !instr.has_pointer_map() || instr.pointer_map() != PointerMapId(id) {
                panic!("pointer map {} is not attached at {}", id, map.position());
            }
        }

        for (i, instr) in self.instructions.iter().enumerate() {
            if instr.has_result() != instr.has_result_operand() {
                panic!("{} at {} has a wrong result presence", instr.mnemonic(), i);
            }
            for target in instr.kind().targets() {
                if self.label_position(target).is_none() {
                    panic!("{} at {} targets unknown block B{}", instr.mnemonic(), i, target);
                }
            }
            if instr.is_control() && (i == 0 || !self.instructions[i - 1].is_gap()) {
                panic!("{} at {} is not preceded by a gap", instr.mnemonic(), i);
            }
            let mut envs = vec![];
            if instr.has_environment() {
                envs.push(instr.environment());
            }
            if instr.has_deoptimization_environment() {
                envs.push(instr.deoptimization_environment());
            }
            for env in envs {
                if env.0 >= self.environments.len() {
                    panic!("{} at {} refers to missing {}", instr.mnemonic(), i, env);
                }
            }
        }
        log::debug!("verified chunk of {} instructions", self.instructions.len());
    }
}
