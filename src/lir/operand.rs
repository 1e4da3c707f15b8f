use std::fmt::Display;

use crate::hir::ValueId;

/// Constraint the register allocator has to satisfy for an unallocated
/// operand.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Policy {
    Any,
    MustHaveRegister,
    FixedRegister(u8),
    FixedSlot(i32),
    SameAsFirstInput,
}

impl Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Policy::Any => write!(f, "*"),
            Policy::MustHaveRegister => write!(f, "R"),
            Policy::FixedRegister(r) => write!(f, "=r{}", r),
            Policy::FixedSlot(s) => write!(f, "=[{}]", s),
            Policy::SameAsFirstInput => write!(f, "1"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Virtual register waiting for a location. The virtual register number is
    /// the id of the defining HIR value.
    Unallocated { vreg: usize, policy: Policy },
    /// Interned constant, keyed by the constant's HIR value.
    Constant(ValueId),
    StackSlot(i32),
    DoubleStackSlot(i32),
    Register(u8),
    DoubleRegister(u8),
}

impl Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Unallocated { vreg, policy } => write!(f, "v{}({})", vreg, policy),
            Operand::Constant(id) => write!(f, "[constant:{}]", id.0),
            Operand::StackSlot(i) => write!(f, "[stack:{}]", i),
            Operand::DoubleStackSlot(i) => write!(f, "[double_stack:{}]", i),
            Operand::Register(r) => write!(f, "[r{}]", r),
            Operand::DoubleRegister(r) => write!(f, "[d{}]", r),
        }
    }
}

impl Operand {
    pub fn unallocated(value: ValueId, policy: Policy) -> Operand {
        Operand::Unallocated {
            vreg: value.0,
            policy,
        }
    }

    #[inline(always)]
    pub fn vreg(&self) -> Option<usize> {
        if let &Operand::Unallocated { vreg, .. } = self {
            Some(vreg)
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn is_constant(&self) -> bool {
        matches!(self, Operand::Constant(_))
    }
}
