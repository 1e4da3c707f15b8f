use std::fmt::Display;

use crate::{
    codegen::CodeGen,
    hir::{BinaryOp, BlockId, CallTarget, Literal, Representation, ValueId},
    target::Target,
    utils::{map_join, SetOnce},
};

use super::{EnvId, Gap, Label, Operand, PointerMapId};

macro_rules! InstrKindFrom {
    ($src:ident) => {
        impl From<$src> for InstrKind {
            fn from(v: $src) -> InstrKind {
                InstrKind::$src(v)
            }
        }
    };
}

/// Per allocatable register, the spill slot it has to be reloaded from when
/// entering optimized code in the middle of a loop.
#[derive(Clone, Debug, PartialEq)]
pub struct OsrEntry {
    register_spills: Vec<Option<Operand>>,
    double_register_spills: Vec<Option<Operand>>,
}

impl Display for OsrEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |spills: &Vec<Option<Operand>>, prefix: &str| {
            map_join(
                spills
                    .iter()
                    .enumerate()
                    .filter_map(|(i, s)| s.as_ref().map(|s| (i, s))),
                ", ",
                |(i, s)| format!("{}{} <- {}", prefix, i, s),
            )
        };
        write!(
            f,
            "[{}] [{}]",
            show(&self.register_spills, "r"),
            show(&self.double_register_spills, "d")
        )
    }
}

impl OsrEntry {
    pub fn new(target: Target) -> OsrEntry {
        OsrEntry {
            register_spills: vec![None; target.num_allocatable_registers()],
            double_register_spills: vec![None; target.num_allocatable_double_registers()],
        }
    }

    pub fn mark_spilled_register(&mut self, allocation_index: usize, spill: Operand) {
        if allocation_index >= self.register_spills.len() {
            panic!("register index {} out of range", allocation_index);
        }
        if !matches!(spill, Operand::StackSlot(_)) {
            panic!("register spilled to {}, expected a stack slot", spill);
        }
        let slot = &mut self.register_spills[allocation_index];
        if slot.is_some() {
            panic!("register {} is already marked as spilled", allocation_index);
        }
        *slot = Some(spill);
    }

    pub fn mark_spilled_double_register(&mut self, allocation_index: usize, spill: Operand) {
        if allocation_index >= self.double_register_spills.len() {
            panic!("double register index {} out of range", allocation_index);
        }
        if !matches!(spill, Operand::DoubleStackSlot(_)) {
            panic!(
                "double register spilled to {}, expected a double stack slot",
                spill
            );
        }
        let slot = &mut self.double_register_spills[allocation_index];
        if slot.is_some() {
            panic!(
                "double register {} is already marked as spilled",
                allocation_index
            );
        }
        *slot = Some(spill);
    }

    #[inline(always)]
    pub fn register_spills(&self) -> &Vec<Option<Operand>> {
        &self.register_spills
    }

    #[inline(always)]
    pub fn double_register_spills(&self) -> &Vec<Option<Operand>> {
        &self.double_register_spills
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum InstrKind {
    Gap(Gap),
    Label(Label),
    Goto {
        block_id: BlockId,
        include_stack_check: bool,
    },
    LazyBailout {
        gap_instructions_size: usize,
    },
    Deoptimize,
    OsrEntry(OsrEntry),
    Constant {
        value: ValueId,
        literal: Literal,
    },
    Parameter {
        index: usize,
    },
    Arithmetic {
        op: BinaryOp,
        repr: Representation,
        left: Operand,
        right: Operand,
    },
    PushArgument {
        value: Operand,
    },
    Call {
        target: CallTarget,
        argc: usize,
    },
    Allocate {
        size: usize,
    },
    StackCheck,
    Branch {
        cond: Operand,
        then: BlockId,
        els: BlockId,
    },
    Return {
        value: Operand,
    },
}

InstrKindFrom!(Gap);
InstrKindFrom!(Label);
InstrKindFrom!(OsrEntry);

impl Display for InstrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstrKind::Gap(gap) => write!(f, "{}", gap),
            InstrKind::Label(label) => write!(f, "{}", label),
            InstrKind::Goto {
                block_id,
                include_stack_check,
            } => {
                write!(f, "B{}", block_id)?;
                if *include_stack_check {
                    write!(f, " (stack-check)")?;
                }
                Ok(())
            }
            InstrKind::LazyBailout {
                gap_instructions_size,
            } => write!(f, "gaps={}", gap_instructions_size),
            InstrKind::Deoptimize | InstrKind::StackCheck => Ok(()),
            InstrKind::OsrEntry(entry) => write!(f, "{}", entry),
            InstrKind::Constant { literal, .. } => write!(f, "{}", literal),
            InstrKind::Parameter { index } => write!(f, "{}", index),
            InstrKind::Arithmetic {
                op, left, right, ..
            } => write!(f, "{} {} {}", left, op, right),
            InstrKind::PushArgument { value } | InstrKind::Return { value } => {
                write!(f, "{}", value)
            }
            InstrKind::Call { target, argc } => write!(f, "{} #{}", target, argc),
            InstrKind::Allocate { size } => write!(f, "{}", size),
            InstrKind::Branch { cond, then, els } => {
                write!(f, "{} then B{} else B{}", cond, then, els)
            }
        }
    }
}

impl InstrKind {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            InstrKind::Gap(_) => "gap",
            InstrKind::Label(_) => "label",
            InstrKind::Goto { .. } => "goto",
            InstrKind::LazyBailout { .. } => "lazy-bailout",
            InstrKind::Deoptimize => "deoptimize",
            InstrKind::OsrEntry(_) => "osr-entry",
            InstrKind::Constant { literal, .. } => match literal.representation() {
                Representation::Integer32 => "constant-i",
                Representation::Double => "constant-d",
                _ => "constant-t",
            },
            InstrKind::Parameter { .. } => "parameter",
            InstrKind::Arithmetic { repr, .. } => match repr {
                Representation::Integer32 => "arithmetic-i",
                Representation::Double => "arithmetic-d",
                _ => "arithmetic-t",
            },
            InstrKind::PushArgument { .. } => "push-argument",
            InstrKind::Call { .. } => "call",
            InstrKind::Allocate { .. } => "allocate",
            InstrKind::StackCheck => "stack-check",
            InstrKind::Branch { .. } => "branch",
            InstrKind::Return { .. } => "return",
        }
    }

    /// Whether instructions of this variant define a value.
    pub fn has_result(&self) -> bool {
        matches!(
            self,
            InstrKind::Constant { .. }
                | InstrKind::Parameter { .. }
                | InstrKind::Arithmetic { .. }
                | InstrKind::Call { .. }
                | InstrKind::Allocate { .. }
        )
    }

    pub fn is_control(&self) -> bool {
        matches!(
            self,
            InstrKind::Goto { .. }
                | InstrKind::Branch { .. }
                | InstrKind::Return { .. }
                | InstrKind::Deoptimize
        )
    }

    /// Blocks this instruction may transfer control to.
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            InstrKind::Goto { block_id, .. } => vec![*block_id],
            InstrKind::Branch { then, els, .. } => vec![*then, *els],
            _ => vec![],
        }
    }

    /// Rewrites every control target equal to `from`.
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        match self {
            InstrKind::Goto { block_id, .. } if *block_id == from => *block_id = to,
            InstrKind::Branch { then, els, .. } => {
                if *then == from {
                    *then = to;
                }
                if *els == from {
                    *els = to;
                }
            }
            _ => {}
        }
    }
}

/// One low-level instruction. Its position in the chunk is its index.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    kind: InstrKind,
    block: BlockId,
    result: SetOnce<Operand>,
    environment: SetOnce<EnvId>,
    deoptimization_environment: SetOnce<EnvId>,
    pointer_map: SetOnce<PointerMapId>,
    hydrogen_value: Option<ValueId>,
}

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(result) = self.result.try_get() {
            write!(f, "{} = ", result)?;
        }
        write!(f, "{}", self.mnemonic())?;
        let payload = self.kind.to_string();
        if !payload.is_empty() {
            write!(f, " {}", payload)?;
        }
        Ok(())
    }
}

impl Instruction {
    pub fn new<K: Into<InstrKind>>(kind: K, block: BlockId) -> Instruction {
        Instruction {
            kind: kind.into(),
            block,
            result: SetOnce::new(),
            environment: SetOnce::new(),
            deoptimization_environment: SetOnce::new(),
            pointer_map: SetOnce::new(),
            hydrogen_value: None,
        }
    }

    pub fn with_hydrogen_value(mut self, value: ValueId) -> Instruction {
        self.hydrogen_value = Some(value);
        self
    }

    #[inline(always)]
    pub fn kind(&self) -> &InstrKind {
        &self.kind
    }

    #[inline(always)]
    pub fn kind_mut(&mut self) -> &mut InstrKind {
        &mut self.kind
    }

    #[inline(always)]
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Diagnostic link back to the value this instruction was lowered from.
    #[inline(always)]
    pub fn hydrogen_value(&self) -> Option<ValueId> {
        self.hydrogen_value
    }

    #[inline(always)]
    pub fn mnemonic(&self) -> &'static str {
        self.kind.mnemonic()
    }

    #[inline(always)]
    pub fn is_gap(&self) -> bool {
        matches!(self.kind, InstrKind::Gap(_) | InstrKind::Label(_))
    }

    #[inline(always)]
    pub fn is_label(&self) -> bool {
        matches!(self.kind, InstrKind::Label(_))
    }

    #[inline(always)]
    pub fn is_goto(&self) -> bool {
        matches!(self.kind, InstrKind::Goto { .. })
    }

    #[inline(always)]
    pub fn is_lazy_bailout(&self) -> bool {
        matches!(self.kind, InstrKind::LazyBailout { .. })
    }

    #[inline(always)]
    pub fn is_deoptimize(&self) -> bool {
        matches!(self.kind, InstrKind::Deoptimize)
    }

    #[inline(always)]
    pub fn is_osr_entry(&self) -> bool {
        matches!(self.kind, InstrKind::OsrEntry(_))
    }

    #[inline(always)]
    pub fn is_control(&self) -> bool {
        self.kind.is_control()
    }

    #[inline(always)]
    pub fn has_result(&self) -> bool {
        self.kind.has_result()
    }

    pub fn as_gap(&self) -> Option<&Gap> {
        match &self.kind {
            InstrKind::Gap(gap) => Some(gap),
            InstrKind::Label(label) => Some(&**label),
            _ => None,
        }
    }

    pub fn as_gap_mut(&mut self) -> Option<&mut Gap> {
        match &mut self.kind {
            InstrKind::Gap(gap) => Some(gap),
            InstrKind::Label(label) => Some(&mut **label),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<&Label> {
        match &self.kind {
            InstrKind::Label(label) => Some(label),
            _ => None,
        }
    }

    pub fn as_label_mut(&mut self) -> Option<&mut Label> {
        match &mut self.kind {
            InstrKind::Label(label) => Some(label),
            _ => None,
        }
    }

    pub fn as_osr_entry_mut(&mut self) -> Option<&mut OsrEntry> {
        match &mut self.kind {
            InstrKind::OsrEntry(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn set_result(&mut self, operand: Operand) {
        if !self.has_result() {
            panic!("{} does not define a result", self.mnemonic());
        }
        self.result.set(operand)
    }

    #[inline(always)]
    pub fn result(&self) -> &Operand {
        self.result.get()
    }

    pub(super) fn split_operands_mut(&mut self) -> (&mut InstrKind, Option<&mut Operand>) {
        (&mut self.kind, self.result.try_get_mut())
    }

    #[inline(always)]
    pub fn has_result_operand(&self) -> bool {
        self.result.is_set()
    }

    pub fn set_environment(&mut self, env: EnvId) {
        self.environment.set(env)
    }

    #[inline(always)]
    pub fn environment(&self) -> EnvId {
        *self.environment.get()
    }

    #[inline(always)]
    pub fn has_environment(&self) -> bool {
        self.environment.is_set()
    }

    pub fn set_deoptimization_environment(&mut self, env: EnvId) {
        self.deoptimization_environment.set(env)
    }

    #[inline(always)]
    pub fn deoptimization_environment(&self) -> EnvId {
        *self.deoptimization_environment.get()
    }

    #[inline(always)]
    pub fn has_deoptimization_environment(&self) -> bool {
        self.deoptimization_environment.is_set()
    }

    pub fn set_pointer_map(&mut self, map: PointerMapId) {
        self.pointer_map.set(map)
    }

    #[inline(always)]
    pub fn pointer_map(&self) -> PointerMapId {
        *self.pointer_map.get()
    }

    #[inline(always)]
    pub fn has_pointer_map(&self) -> bool {
        self.pointer_map.is_set()
    }

    pub fn compile_to_native(&self, cg: &mut dyn CodeGen) {
        match &self.kind {
            InstrKind::Gap(gap) => cg.do_gap(gap),
            InstrKind::Label(label) => cg.do_label(label),
            InstrKind::Goto {
                block_id,
                include_stack_check,
            } => cg.do_goto(self, *block_id, *include_stack_check),
            InstrKind::LazyBailout {
                gap_instructions_size,
            } => cg.do_lazy_bailout(self, *gap_instructions_size),
            InstrKind::Deoptimize => cg.do_deoptimize(self),
            InstrKind::OsrEntry(entry) => cg.do_osr_entry(self, entry),
            InstrKind::Constant { literal, .. } => cg.do_constant(self, literal),
            InstrKind::Parameter { index } => cg.do_parameter(self, *index),
            InstrKind::Arithmetic {
                op,
                repr,
                left,
                right,
            } => cg.do_arithmetic(self, *op, *repr, left, right),
            InstrKind::PushArgument { value } => cg.do_push_argument(self, value),
            InstrKind::Call { target, argc } => cg.do_call(self, target, *argc),
            InstrKind::Allocate { size } => cg.do_allocate(self, *size),
            InstrKind::StackCheck => cg.do_stack_check(self),
            InstrKind::Branch { cond, then, els } => cg.do_branch(self, cond, *then, *els),
            InstrKind::Return { value } => cg.do_return(self, value),
        }
    }
}

#[cfg(test)]
mod types_test {
    use super::{InstrKind, Instruction, OsrEntry};
    use crate::{
        hir::{BinaryOp, Literal, Representation, ValueId},
        lir::{EnvId, Gap, InnerPosition, Label, Operand, Policy, PointerMapId},
        target::Target,
    };

    fn constant() -> Instruction {
        Instruction::new(
            InstrKind::Constant {
                value: ValueId(0),
                literal: Literal::Integer(1),
            },
            0,
        )
    }

    #[test]
    fn test_label_is_a_gap() {
        let label = Instruction::new(Label::new(0, false), 0);
        assert!(label.is_gap());
        assert!(label.is_label());
        assert!(!label.is_control());

        let gap = Instruction::new(Gap::new(0), 0);
        assert!(gap.is_gap());
        assert!(!gap.is_label());
    }

    #[test]
    fn test_membership() {
        let goto = Instruction::new(
            InstrKind::Goto {
                block_id: 2,
                include_stack_check: false,
            },
            1,
        );
        assert!(goto.is_goto());
        assert!(goto.is_control());
        assert!(!goto.has_result());
        assert_eq!(goto.mnemonic(), "goto");

        let bailout = Instruction::new(
            InstrKind::LazyBailout {
                gap_instructions_size: 0,
            },
            0,
        );
        assert!(bailout.is_lazy_bailout());
        assert!(Instruction::new(InstrKind::Deoptimize, 0).is_deoptimize());
        assert!(Instruction::new(OsrEntry::new(Target::X64), 0).is_osr_entry());
        assert!(constant().has_result());
    }

    #[test]
    fn test_display() {
        let mut add = Instruction::new(
            InstrKind::Arithmetic {
                op: BinaryOp::Add,
                repr: Representation::Integer32,
                left: Operand::unallocated(ValueId(1), Policy::MustHaveRegister),
                right: Operand::Constant(ValueId(2)),
            },
            0,
        );
        add.set_result(Operand::unallocated(ValueId(3), Policy::SameAsFirstInput));
        assert_eq!(
            add.to_string(),
            "v3(1) = arithmetic-i v1(R) add [constant:2]"
        );

        let mut gap = Gap::new(0);
        gap.get_or_create_parallel_move(InnerPosition::Start)
            .add_move(Operand::Register(0), Operand::StackSlot(1));
        assert_eq!(
            Instruction::new(gap, 0).to_string(),
            "gap () ([stack:1] = [r0];) () ()"
        );
    }

    #[test]
    #[should_panic(expected = "does not define a result")]
    fn test_result_on_resultless_variant_panics() {
        let mut goto = Instruction::new(
            InstrKind::Goto {
                block_id: 0,
                include_stack_check: false,
            },
            0,
        );
        goto.set_result(Operand::Register(0));
    }

    #[test]
    #[should_panic(expected = "second time")]
    fn test_result_is_write_once() {
        let mut instr = constant();
        instr.set_result(Operand::Register(0));
        instr.set_result(Operand::Register(0));
    }

    #[test]
    #[should_panic(expected = "second time")]
    fn test_environment_is_write_once() {
        let mut instr = constant();
        instr.set_environment(EnvId(0));
        instr.set_environment(EnvId(0));
    }

    #[test]
    #[should_panic(expected = "second time")]
    fn test_deoptimization_environment_is_write_once() {
        let mut instr = constant();
        instr.set_deoptimization_environment(EnvId(1));
        instr.set_deoptimization_environment(EnvId(1));
    }

    #[test]
    #[should_panic(expected = "second time")]
    fn test_pointer_map_is_write_once() {
        let mut instr = constant();
        instr.set_pointer_map(PointerMapId(0));
        instr.set_pointer_map(PointerMapId(0));
    }

    #[test]
    #[should_panic(expected = "unset")]
    fn test_unset_environment_read_panics() {
        constant().environment();
    }

    #[test]
    fn test_metadata_slots_are_independent() {
        let mut instr = constant();
        instr.set_environment(EnvId(0));
        instr.set_deoptimization_environment(EnvId(1));
        instr.set_pointer_map(PointerMapId(0));
        assert_eq!(instr.environment(), EnvId(0));
        assert_eq!(instr.deoptimization_environment(), EnvId(1));
        assert!(instr.has_pointer_map());
        assert!(!instr.has_result_operand());
    }

    #[test]
    fn test_osr_entry_marks() {
        let mut entry = OsrEntry::new(Target::Ia32);
        entry.mark_spilled_register(4, Operand::StackSlot(0));
        entry.mark_spilled_double_register(0, Operand::DoubleStackSlot(2));
        assert_eq!(entry.register_spills()[4], Some(Operand::StackSlot(0)));
        assert_eq!(entry.register_spills().len(), 5);
        assert_eq!(entry.to_string(), "[r4 <- [stack:0]] [d0 <- [double_stack:2]]");
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_osr_entry_index_out_of_range() {
        let mut entry = OsrEntry::new(Target::Ia32);
        entry.mark_spilled_register(5, Operand::StackSlot(0));
    }

    #[test]
    #[should_panic(expected = "expected a double stack slot")]
    fn test_osr_entry_double_needs_double_slot() {
        let mut entry = OsrEntry::new(Target::X64);
        entry.mark_spilled_double_register(0, Operand::StackSlot(0));
    }

    #[test]
    fn test_retarget() {
        let mut branch = InstrKind::Branch {
            cond: Operand::Register(0),
            then: 3,
            els: 3,
        };
        branch.retarget(3, 5);
        assert_eq!(branch.targets(), vec![5, 5]);
    }
}
