use fnv::FnvHashMap;

use super::{Environment, Gap, InstrKind, Instruction, Operand, ParallelMove, PointerMap};

pub trait GetOperands<'a> {
    fn get_operands(&'a self) -> Vec<&'a Operand>;

    fn count_vreg_uses(&'a self) -> FnvHashMap<usize, usize> {
        let mut map = FnvHashMap::default();
        for vreg in self.get_operands().into_iter().filter_map(Operand::vreg) {
            let count = map.entry(vreg).or_default();
            *count += 1;
        }
        map
    }
}

impl<'a, T> GetOperands<'a> for Vec<T>
where
    T: GetOperands<'a> + 'a,
{
    fn get_operands(&'a self) -> Vec<&'a Operand> {
        self.iter().flat_map(|t| t.get_operands()).collect()
    }
}

pub trait GetOperandsMut<'a> {
    fn get_operands_mut(&'a mut self) -> Vec<&'a mut Operand>;
}

impl<'a, T> GetOperandsMut<'a> for Vec<T>
where
    T: GetOperandsMut<'a> + 'a,
{
    fn get_operands_mut(&'a mut self) -> Vec<&'a mut Operand> {
        self.iter_mut().flat_map(|t| t.get_operands_mut()).collect()
    }
}

pub trait AssignOperands<'a> {
    /// Replaces every use of `vreg` with `operand`, returning how many were
    /// rewritten.
    fn assign_vreg(&'a mut self, vreg: usize, operand: &Operand) -> usize;
    fn map_vregs(&'a mut self, assignment: &FnvHashMap<usize, Operand>);
}

impl<'a, T> AssignOperands<'a> for T
where
    T: GetOperandsMut<'a>,
{
    fn assign_vreg(&'a mut self, vreg: usize, operand: &Operand) -> usize {
        let mut count = 0;
        for op in self.get_operands_mut() {
            if op.vreg() == Some(vreg) {
                *op = operand.clone();
                count += 1;
            }
        }
        count
    }

    fn map_vregs(&'a mut self, assignment: &FnvHashMap<usize, Operand>) {
        for op in self.get_operands_mut() {
            if let Some(new) = op.vreg().and_then(|v| assignment.get(&v)) {
                *op = new.clone();
            }
        }
    }
}

impl<'a> GetOperands<'a> for ParallelMove {
    fn get_operands(&'a self) -> Vec<&'a Operand> {
        self.moves()
            .iter()
            .flat_map(|m| vec![&m.source, &m.destination])
            .collect()
    }
}

impl<'a> GetOperandsMut<'a> for ParallelMove {
    fn get_operands_mut(&'a mut self) -> Vec<&'a mut Operand> {
        self.moves_mut()
            .iter_mut()
            .flat_map(|m| vec![&mut m.source, &mut m.destination])
            .collect()
    }
}

impl<'a> GetOperands<'a> for Gap {
    fn get_operands(&'a self) -> Vec<&'a Operand> {
        self.parallel_moves().flat_map(|m| m.get_operands()).collect()
    }
}

impl<'a> GetOperandsMut<'a> for Gap {
    fn get_operands_mut(&'a mut self) -> Vec<&'a mut Operand> {
        self.parallel_moves_mut()
            .flat_map(|m| m.get_operands_mut())
            .collect()
    }
}

impl<'a> GetOperands<'a> for InstrKind {
    fn get_operands(&'a self) -> Vec<&'a Operand> {
        match self {
            InstrKind::Gap(gap) => gap.get_operands(),
            InstrKind::Label(label) => (**label).get_operands(),
            InstrKind::Arithmetic { left, right, .. } => vec![left, right],
            InstrKind::PushArgument { value } | InstrKind::Return { value } => vec![value],
            InstrKind::Branch { cond, .. } => vec![cond],
            InstrKind::Goto { .. }
            | InstrKind::LazyBailout { .. }
            | InstrKind::Deoptimize
            | InstrKind::OsrEntry(_)
            | InstrKind::Constant { .. }
            | InstrKind::Parameter { .. }
            | InstrKind::Call { .. }
            | InstrKind::Allocate { .. }
            | InstrKind::StackCheck => vec![],
        }
    }
}

impl<'a> GetOperandsMut<'a> for InstrKind {
    fn get_operands_mut(&'a mut self) -> Vec<&'a mut Operand> {
        match self {
            InstrKind::Gap(gap) => gap.get_operands_mut(),
            InstrKind::Label(label) => (**label).get_operands_mut(),
            InstrKind::Arithmetic { left, right, .. } => vec![left, right],
            InstrKind::PushArgument { value } | InstrKind::Return { value } => vec![value],
            InstrKind::Branch { cond, .. } => vec![cond],
            InstrKind::Goto { .. }
            | InstrKind::LazyBailout { .. }
            | InstrKind::Deoptimize
            | InstrKind::OsrEntry(_)
            | InstrKind::Constant { .. }
            | InstrKind::Parameter { .. }
            | InstrKind::Call { .. }
            | InstrKind::Allocate { .. }
            | InstrKind::StackCheck => vec![],
        }
    }
}

/// Inputs first, then the result.
impl<'a> GetOperands<'a> for Instruction {
    fn get_operands(&'a self) -> Vec<&'a Operand> {
        let mut ops = self.kind().get_operands();
        if self.has_result_operand() {
            ops.push(self.result());
        }
        ops
    }
}

impl<'a> GetOperandsMut<'a> for Instruction {
    fn get_operands_mut(&'a mut self) -> Vec<&'a mut Operand> {
        let (kind, result) = self.split_operands_mut();
        let mut ops = kind.get_operands_mut();
        ops.extend(result);
        ops
    }
}

impl<'a> GetOperands<'a> for Environment {
    fn get_operands(&'a self) -> Vec<&'a Operand> {
        self.values.iter().collect()
    }
}

impl<'a> GetOperandsMut<'a> for Environment {
    fn get_operands_mut(&'a mut self) -> Vec<&'a mut Operand> {
        self.values.iter_mut().collect()
    }
}

impl<'a> GetOperands<'a> for PointerMap {
    fn get_operands(&'a self) -> Vec<&'a Operand> {
        self.pointer_operands().iter().collect()
    }
}

impl<'a> GetOperandsMut<'a> for PointerMap {
    fn get_operands_mut(&'a mut self) -> Vec<&'a mut Operand> {
        self.pointer_operands_mut().iter_mut().collect()
    }
}
