use std::{cell::Cell, fmt::Display};

use crate::{hir::BlockId, utils::join};

use super::Operand;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveOperands {
    pub source: Operand,
    pub destination: Operand,
}

impl Display for MoveOperands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {};", self.destination, self.source)
    }
}

impl MoveOperands {
    pub fn new(source: Operand, destination: Operand) -> MoveOperands {
        MoveOperands {
            source,
            destination,
        }
    }

    #[inline(always)]
    pub fn is_redundant(&self) -> bool {
        self.source == self.destination
    }
}

/// A set of moves that happen simultaneously: every source is read before any
/// destination is written.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParallelMove {
    moves: Vec<MoveOperands>,
}

impl Display for ParallelMove {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", join(&self.moves, " "))
    }
}

impl ParallelMove {
    pub fn new() -> ParallelMove {
        ParallelMove { moves: vec![] }
    }

    /// Adds `from -> to`. A destination may only be written once per set.
    pub fn add_move(&mut self, from: Operand, to: Operand) {
        if self.moves.iter().any(|m| m.destination == to) {
            panic!("parallel move writes {} twice", to);
        }
        self.moves.push(MoveOperands::new(from, to));
    }

    #[inline(always)]
    pub fn moves(&self) -> &Vec<MoveOperands> {
        &self.moves
    }

    #[inline(always)]
    pub fn moves_mut(&mut self) -> &mut Vec<MoveOperands> {
        &mut self.moves
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn is_redundant(&self) -> bool {
        self.moves.iter().all(MoveOperands::is_redundant)
    }

    /// The single parallel move equivalent to running `self` and then
    /// `later`. Identity moves are dropped from the result.
    pub fn then(&self, later: &ParallelMove) -> ParallelMove {
        let mut result = ParallelMove::new();
        for m in later.moves.iter() {
            let source = self
                .moves
                .iter()
                .find(|earlier| earlier.destination == m.source)
                .map(|earlier| earlier.source.clone())
                .unwrap_or_else(|| m.source.clone());
            result.moves.push(MoveOperands::new(source, m.destination.clone()));
        }

        for m in self.moves.iter() {
            if !later.moves.iter().any(|l| l.destination == m.destination) {
                result.moves.push(m.clone());
            }
        }

        result.moves.retain(|m| !m.is_redundant());
        result
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InnerPosition {
    Before,
    Start,
    End,
    After,
}

impl InnerPosition {
    pub const ALL: [InnerPosition; 4] = [
        InnerPosition::Before,
        InnerPosition::Start,
        InnerPosition::End,
        InnerPosition::After,
    ];

    #[inline(always)]
    fn index(self) -> usize {
        self as usize
    }
}

/// A program point reserved for moves between computations.
#[derive(Clone, Debug, PartialEq)]
pub struct Gap {
    block: BlockId,
    parallel_moves: [Option<ParallelMove>; 4],
}

impl Display for Gap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, pos) in InnerPosition::ALL.iter().enumerate() {
            if i != 0 {
                write!(f, " ")?;
            }
            match self.get_parallel_move(*pos) {
                Some(moves) => write!(f, "{}", moves)?,
                None => write!(f, "()")?,
            }
        }
        Ok(())
    }
}

impl Gap {
    pub fn new(block: BlockId) -> Gap {
        Gap {
            block,
            parallel_moves: [None, None, None, None],
        }
    }

    #[inline(always)]
    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn get_or_create_parallel_move(&mut self, pos: InnerPosition) -> &mut ParallelMove {
        self.parallel_moves[pos.index()].get_or_insert_with(ParallelMove::new)
    }

    #[inline(always)]
    pub fn get_parallel_move(&self, pos: InnerPosition) -> Option<&ParallelMove> {
        self.parallel_moves[pos.index()].as_ref()
    }

    pub fn set_parallel_move(&mut self, pos: InnerPosition, moves: ParallelMove) {
        self.parallel_moves[pos.index()] = Some(moves);
    }

    pub fn is_redundant(&self) -> bool {
        self.parallel_moves
            .iter()
            .all(|m| m.as_ref().map_or(true, ParallelMove::is_redundant))
    }

    /// All four positions composed, in order, into one parallel move.
    pub fn flatten(&self) -> ParallelMove {
        self.parallel_moves
            .iter()
            .flatten()
            .fold(ParallelMove::new(), |acc, m| acc.then(m))
    }

    /// Drops every move set, leaving a redundant gap.
    pub fn clear(&mut self) {
        self.parallel_moves = [None, None, None, None];
    }

    pub(super) fn parallel_moves_mut(&mut self) -> impl Iterator<Item = &mut ParallelMove> {
        self.parallel_moves.iter_mut().flatten()
    }

    pub(super) fn parallel_moves(&self) -> impl Iterator<Item = &ParallelMove> {
        self.parallel_moves.iter().flatten()
    }
}

/// Code offset a label is bound to by the code generator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BindTarget {
    offset: Cell<Option<usize>>,
}

impl BindTarget {
    pub fn bind(&self, offset: usize) {
        if let Some(prev) = self.offset.get() {
            panic!("label already bound at {}", prev);
        }
        self.offset.set(Some(offset));
    }

    #[inline(always)]
    pub fn is_bound(&self) -> bool {
        self.offset.get().is_some()
    }

    #[inline(always)]
    pub fn offset(&self) -> Option<usize> {
        self.offset.get()
    }
}

/// The gap that starts a block.
#[derive(Clone, Debug, PartialEq)]
pub struct Label {
    gap: Gap,
    is_loop_header: bool,
    bind_target: BindTarget,
    replacement: Option<BlockId>,
}

impl std::ops::Deref for Label {
    type Target = Gap;

    fn deref(&self) -> &Self::Target {
        &self.gap
    }
}

impl std::ops::DerefMut for Label {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.gap
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "B{}", self.block_id())?;
        if self.is_loop_header {
            write!(f, " (loop header)")?;
        }
        if let Some(r) = self.replacement {
            write!(f, " (replaced by B{})", r)?;
        }
        write!(f, " {}", self.gap)
    }
}

impl Label {
    pub fn new(block: BlockId, is_loop_header: bool) -> Label {
        Label {
            gap: Gap::new(block),
            is_loop_header,
            bind_target: BindTarget::default(),
            replacement: None,
        }
    }

    #[inline(always)]
    pub fn block_id(&self) -> BlockId {
        self.gap.block()
    }

    #[inline(always)]
    pub fn is_loop_header(&self) -> bool {
        self.is_loop_header
    }

    pub(super) fn set_loop_header(&mut self, is_loop_header: bool) {
        self.is_loop_header = is_loop_header;
    }

    #[inline(always)]
    pub fn bind_target(&self) -> &BindTarget {
        &self.bind_target
    }

    #[inline(always)]
    pub fn replacement(&self) -> Option<BlockId> {
        self.replacement
    }

    #[inline(always)]
    pub fn has_replacement(&self) -> bool {
        self.replacement.is_some()
    }

    pub fn set_replacement(&mut self, block: BlockId) {
        if block == self.block_id() {
            panic!("label B{} cannot replace itself", block);
        }
        self.replacement = Some(block);
    }
}
