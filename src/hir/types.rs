use std::fmt::Display;

use crate::utils::{indent, join, map_join};

use super::ControlFlowGraph;

pub type BlockId = usize;
pub type AstId = u32;

/// Index of a value in its graph. Non-owning: only meaningful together with
/// the graph that produced it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub usize);

impl Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClosureId(pub u32);

impl Display for ClosureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "closure#{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Representation {
    None,
    Tagged,
    Integer32,
    Double,
}

impl Representation {
    #[inline(always)]
    pub fn is_tagged(&self) -> bool {
        matches!(self, Representation::Tagged)
    }

    #[inline(always)]
    pub fn is_double(&self) -> bool {
        matches!(self, Representation::Double)
    }
}

bitflags::bitflags! {
    pub struct Flags: u8 {
        /// May trigger a garbage collection.
        const MAY_ALLOCATE     = 1 << 0;
        /// May bail out eagerly, before the node's effect happens.
        const CAN_DEOPTIMIZE   = 1 << 1;
        /// May bail out after returning; the following simulate describes the
        /// state to resume in.
        const HAS_LAZY_DEOPT   = 1 << 2;
        const HAS_SIDE_EFFECTS = 1 << 3;
        const CAN_OVERFLOW     = 1 << 4;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Integer(i32),
    Double(f64),
    /// Handle to a heap object owned by the embedder.
    Object(u32),
    Undefined,
}

impl Literal {
    pub fn representation(&self) -> Representation {
        match self {
            Literal::Integer(_) => Representation::Integer32,
            Literal::Double(_) => Representation::Double,
            Literal::Object(_) | Literal::Undefined => Representation::Tagged,
        }
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Double(d) => write!(f, "{:?}", d),
            Literal::Object(h) => write!(f, "obj#{}", h),
            Literal::Undefined => write!(f, "undefined"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Sar,
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "add"),
            BinaryOp::Sub => write!(f, "sub"),
            BinaryOp::Mul => write!(f, "mul"),
            BinaryOp::BitAnd => write!(f, "bitand"),
            BinaryOp::BitOr => write!(f, "bitor"),
            BinaryOp::BitXor => write!(f, "xor"),
            BinaryOp::Shl => write!(f, "shl"),
            BinaryOp::Sar => write!(f, "sar"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallTarget {
    Function(ClosureId),
    Runtime(u32),
    Named(String),
}

impl Display for CallTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallTarget::Function(c) => write!(f, "{}", c),
            CallTarget::Runtime(id) => write!(f, "runtime#{}", id),
            CallTarget::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Source-level state at a program point, used to rebuild an unoptimized
/// frame on bailout.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameState {
    pub ast_id: AstId,
    pub closure: ClosureId,
    pub parameter_count: usize,
    pub values: Vec<ValueId>,
    pub outer: Option<Box<FrameState>>,
}

impl Display for FrameState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{} [{}]", self.ast_id, join(&self.values, ", "))?;
        if let Some(outer) = &self.outer {
            write!(f, " <- {}", outer)?;
        }
        Ok(())
    }
}

impl FrameState {
    pub fn new(ast_id: AstId, closure: ClosureId, values: Vec<ValueId>) -> FrameState {
        FrameState {
            ast_id,
            closure,
            parameter_count: 0,
            values,
            outer: None,
        }
    }

    pub fn with_outer(mut self, outer: FrameState) -> FrameState {
        self.outer = Some(Box::new(outer));
        self
    }

    /// Every value referenced by this frame and its outer frames.
    pub fn all_values(&self) -> Vec<ValueId> {
        let mut values = self.values.clone();
        if let Some(outer) = &self.outer {
            values.extend(outer.all_values());
        }
        values
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Opcode {
    Constant(Literal),
    Parameter(usize),
    Arithmetic(BinaryOp, ValueId, ValueId),
    /// Inputs are ordered like the block's predecessors.
    Phi(Vec<ValueId>),
    PushArgument(ValueId),
    Call { target: CallTarget, argc: usize },
    Allocate { size: usize },
    StackCheck,
    Simulate,
    EnterInlined(ClosureId),
    LeaveInlined,
    OsrEntry,
    Deoptimize,
    Goto { target: BlockId, include_stack_check: bool },
    Branch { cond: ValueId, then: BlockId, els: BlockId },
    Return(ValueId),
    Throw(ValueId),
}

impl Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Opcode::Constant(lit) => write!(f, "constant {}", lit),
            Opcode::Parameter(i) => write!(f, "parameter {}", i),
            Opcode::Arithmetic(op, l, r) => write!(f, "{} {}, {}", op, l, r),
            Opcode::Phi(inputs) => write!(f, "phi({})", join(inputs, ", ")),
            Opcode::PushArgument(v) => write!(f, "push {}", v),
            Opcode::Call { target, argc } => write!(f, "call {} #{}", target, argc),
            Opcode::Allocate { size } => write!(f, "allocate {}", size),
            Opcode::StackCheck => write!(f, "stack-check"),
            Opcode::Simulate => write!(f, "simulate"),
            Opcode::EnterInlined(c) => write!(f, "enter-inlined {}", c),
            Opcode::LeaveInlined => write!(f, "leave-inlined"),
            Opcode::OsrEntry => write!(f, "osr-entry"),
            Opcode::Deoptimize => write!(f, "deoptimize"),
            Opcode::Goto {
                target,
                include_stack_check,
            } => write!(
                f,
                "goto B{}{}",
                target,
                if *include_stack_check { " (stack-check)" } else { "" }
            ),
            Opcode::Branch { cond, then, els } => write!(f, "branch {} B{} B{}", cond, then, els),
            Opcode::Return(v) => write!(f, "ret {}", v),
            Opcode::Throw(v) => write!(f, "throw {}", v),
        }
    }
}

impl Opcode {
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Constant(_) => "constant",
            Opcode::Parameter(_) => "parameter",
            Opcode::Arithmetic(..) => "arithmetic",
            Opcode::Phi(_) => "phi",
            Opcode::PushArgument(_) => "push-argument",
            Opcode::Call { .. } => "call",
            Opcode::Allocate { .. } => "allocate",
            Opcode::StackCheck => "stack-check",
            Opcode::Simulate => "simulate",
            Opcode::EnterInlined(_) => "enter-inlined",
            Opcode::LeaveInlined => "leave-inlined",
            Opcode::OsrEntry => "osr-entry",
            Opcode::Deoptimize => "deoptimize",
            Opcode::Goto { .. } => "goto",
            Opcode::Branch { .. } => "branch",
            Opcode::Return(_) => "return",
            Opcode::Throw(_) => "throw",
        }
    }

    #[inline(always)]
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Opcode::Goto { .. }
                | Opcode::Branch { .. }
                | Opcode::Return(_)
                | Opcode::Deoptimize
                | Opcode::Throw(_)
        )
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Opcode::Goto { target, .. } => vec![*target],
            Opcode::Branch { then, els, .. } => vec![*then, *els],
            _ => vec![],
        }
    }

    /// Values read by this node. Phi inputs are excluded: they are read on
    /// the incoming edges, not at the phi.
    pub fn uses(&self) -> Vec<ValueId> {
        match self {
            Opcode::Arithmetic(_, l, r) => vec![*l, *r],
            Opcode::PushArgument(v)
            | Opcode::Return(v)
            | Opcode::Throw(v)
            | Opcode::Branch { cond: v, .. } => vec![*v],
            Opcode::Constant(_)
            | Opcode::Parameter(_)
            | Opcode::Phi(_)
            | Opcode::Call { .. }
            | Opcode::Allocate { .. }
            | Opcode::StackCheck
            | Opcode::Simulate
            | Opcode::EnterInlined(_)
            | Opcode::LeaveInlined
            | Opcode::OsrEntry
            | Opcode::Deoptimize
            | Opcode::Goto { .. } => vec![],
        }
    }

    pub fn default_flags(&self) -> Flags {
        match self {
            Opcode::Call { .. } => {
                Flags::MAY_ALLOCATE | Flags::HAS_LAZY_DEOPT | Flags::HAS_SIDE_EFFECTS
            }
            Opcode::Allocate { .. } => Flags::MAY_ALLOCATE,
            Opcode::StackCheck => Flags::MAY_ALLOCATE | Flags::CAN_DEOPTIMIZE,
            Opcode::Goto {
                include_stack_check: true,
                ..
            } => Flags::MAY_ALLOCATE,
            Opcode::Deoptimize | Opcode::OsrEntry => Flags::CAN_DEOPTIMIZE,
            Opcode::Throw(_) => Flags::HAS_SIDE_EFFECTS,
            _ => Flags::empty(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HValue {
    pub id: ValueId,
    pub block: BlockId,
    pub opcode: Opcode,
    pub repr: Representation,
    pub flags: Flags,
    pub frame: Option<FrameState>,
    pub position: Option<u32>,
}

impl Display for HValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}", self.id, self.opcode)?;
        if let Some(frame) = &self.frame {
            write!(f, " {}", frame)?;
        }
        Ok(())
    }
}

impl HValue {
    #[inline(always)]
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    #[inline(always)]
    pub fn is_phi(&self) -> bool {
        matches!(self.opcode, Opcode::Phi(_))
    }

    #[inline(always)]
    pub fn is_constant(&self) -> bool {
        matches!(self.opcode, Opcode::Constant(_))
    }

    pub fn has(&self, flags: Flags) -> bool {
        self.flags.contains(flags)
    }
}

#[derive(Clone, Debug)]
pub struct HBlock {
    pub id: BlockId,
    pub values: Vec<ValueId>,
    pub predecessors: Vec<BlockId>,
    pub is_loop_header: bool,
}

impl HBlock {
    pub(super) fn new(id: BlockId) -> HBlock {
        HBlock {
            id,
            values: vec![],
            predecessors: vec![],
            is_loop_header: false,
        }
    }

    pub fn predecessor_index(&self, pred: BlockId) -> Option<usize> {
        self.predecessors.iter().position(|&p| p == pred)
    }
}

/// A typed block graph. `blocks` is in an order where every definition is
/// visited before its uses.
#[derive(Clone, Debug)]
pub struct HGraph {
    pub(super) values: Vec<HValue>,
    pub(super) blocks: Vec<HBlock>,
    pub(super) cfg: ControlFlowGraph,
    pub(super) parameter_count: usize,
}

impl Display for HGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for block in self.blocks.iter() {
            writeln!(
                f,
                "B{}{} (preds: {}):",
                block.id,
                if block.is_loop_header { " loop" } else { "" },
                map_join(&block.predecessors, ", ", |p| format!("B{}", p))
            )?;
            if !block.values.is_empty() {
                let body = map_join(&block.values, "\n", |v| self.value(*v).to_string());
                writeln!(f, "{}", indent(body, 1))?;
            }
        }
        Ok(())
    }
}

impl HGraph {
    #[inline(always)]
    pub fn value(&self, id: ValueId) -> &HValue {
        &self.values[id.0]
    }

    #[inline(always)]
    pub fn values(&self) -> &Vec<HValue> {
        &self.values
    }

    #[inline(always)]
    pub fn block(&self, id: BlockId) -> &HBlock {
        &self.blocks[id]
    }

    #[inline(always)]
    pub fn blocks(&self) -> &Vec<HBlock> {
        &self.blocks
    }

    #[inline(always)]
    pub fn cfg(&self) -> &ControlFlowGraph {
        &self.cfg
    }

    #[inline(always)]
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    pub fn phis(&self, block: BlockId) -> impl Iterator<Item = &HValue> {
        self.blocks[block]
            .values
            .iter()
            .map(move |v| &self.values[v.0])
            .filter(|v| v.is_phi())
    }
}
