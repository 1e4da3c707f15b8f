use std::fmt::Display;

use crate::{
    hir::{AstId, ClosureId},
    utils::join,
};

use super::Operand;

/// Handle to an environment owned by a `Chunk`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvId(pub usize);

impl Display for EnvId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "env#{}", self.0)
    }
}

/// Handle to a pointer map owned by a `Chunk`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointerMapId(pub usize);

impl Display for PointerMapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pointers#{}", self.0)
    }
}

/// Snapshot of the source-visible state needed to rebuild an unoptimized frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Environment {
    pub closure: ClosureId,
    pub ast_id: AstId,
    pub parameter_count: usize,
    pub values: Vec<Operand>,
    pub outer: Option<EnvId>,
}

impl Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} @{} | {}]",
            self.closure,
            self.ast_id,
            join(&self.values, ", ")
        )?;
        if let Some(outer) = self.outer {
            write!(f, " <- {}", outer)?;
        }
        Ok(())
    }
}

impl Environment {
    pub fn new(
        closure: ClosureId,
        ast_id: AstId,
        parameter_count: usize,
        values: Vec<Operand>,
        outer: Option<EnvId>,
    ) -> Environment {
        Environment {
            closure,
            ast_id,
            parameter_count,
            values,
            outer,
        }
    }
}

/// Locations holding heap references at one instruction.
#[derive(Clone, Debug, PartialEq)]
pub struct PointerMap {
    position: usize,
    pointer_operands: Vec<Operand>,
}

impl Display for PointerMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}} @{}", join(&self.pointer_operands, ";"), self.position)
    }
}

impl PointerMap {
    pub fn new(position: usize) -> PointerMap {
        PointerMap {
            position,
            pointer_operands: vec![],
        }
    }

    #[inline(always)]
    pub fn position(&self) -> usize {
        self.position
    }

    pub(super) fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    pub fn record_pointer(&mut self, op: Operand) {
        if op.is_constant() {
            panic!("constant {} recorded as a live pointer", op);
        }
        if !self.pointer_operands.contains(&op) {
            self.pointer_operands.push(op);
        }
    }

    #[inline(always)]
    pub fn pointer_operands(&self) -> &Vec<Operand> {
        &self.pointer_operands
    }

    #[inline(always)]
    pub fn pointer_operands_mut(&mut self) -> &mut Vec<Operand> {
        &mut self.pointer_operands
    }
}
