use crate::{
    lir::{MoveOperands, Operand, ParallelMove},
    target::Target,
};

/// Turns a parallel move into an equivalent sequence of single moves.
/// Cycles are broken by parking one value in a scratch register.
#[derive(Clone, Debug)]
pub struct GapResolver {
    scratch: Operand,
    double_scratch: Operand,
}

impl GapResolver {
    pub fn new(scratch: Operand, double_scratch: Operand) -> GapResolver {
        GapResolver {
            scratch,
            double_scratch,
        }
    }

    pub fn for_target(target: Target) -> GapResolver {
        GapResolver::new(
            Operand::Register(target.scratch_register()),
            Operand::DoubleRegister(target.double_scratch_register()),
        )
    }

    fn scratch_for(&self, op: &Operand) -> Operand {
        match op {
            Operand::DoubleRegister(_) | Operand::DoubleStackSlot(_) => self.double_scratch.clone(),
            _ => self.scratch.clone(),
        }
    }

    pub fn resolve(&self, moves: &ParallelMove) -> Vec<MoveOperands> {
        let mut pending = moves
            .moves()
            .iter()
            .filter(|m| !m.is_redundant())
            .cloned()
            .collect::<Vec<_>>();

        let mut sequence = vec![];
        while !pending.is_empty() {
            let ready = pending
                .iter()
                .position(|m| !pending.iter().any(|other| other.source == m.destination));
            match ready {
                Some(i) => sequence.push(pending.remove(i)),
                None => {
                    // every remaining move sits on a cycle
                    let saved = pending[0].destination.clone();
                    let scratch = self.scratch_for(&saved);
                    log::debug!("breaking move cycle through {} with {}", saved, scratch);
                    sequence.push(MoveOperands::new(saved.clone(), scratch.clone()));
                    for m in pending.iter_mut() {
                        if m.source == saved {
                            m.source = scratch.clone();
                        }
                    }
                }
            }
        }
        sequence
    }
}

#[cfg(test)]
mod resolver_test {
    use fnv::FnvHashMap;

    use super::GapResolver;
    use crate::{
        hir::ValueId,
        lir::{MoveOperands, Operand, ParallelMove},
        target::Target,
    };

    fn reg(r: u8) -> Operand {
        Operand::Register(r)
    }

    /// Runs `moves` one after another over a machine where every location
    /// initially holds its own name.
    fn run(moves: &[MoveOperands]) -> FnvHashMap<Operand, Operand> {
        let mut state: FnvHashMap<Operand, Operand> = FnvHashMap::default();
        for m in moves {
            let value = state
                .get(&m.source)
                .cloned()
                .unwrap_or_else(|| m.source.clone());
            state.insert(m.destination.clone(), value);
        }
        state
    }

    fn check(parallel: &ParallelMove) {
        let resolver = GapResolver::for_target(Target::X64);
        let state = run(&resolver.resolve(parallel));
        for m in parallel.moves() {
            let got = state
                .get(&m.destination)
                .cloned()
                .unwrap_or_else(|| m.destination.clone());
            assert_eq!(got, m.source, "wrong value in {}", m.destination);
        }
    }

    #[test]
    fn test_chain_is_ordered() {
        let mut moves = ParallelMove::new();
        moves.add_move(reg(0), reg(1));
        moves.add_move(reg(1), reg(2));
        moves.add_move(reg(2), reg(3));
        check(&moves);

        let seq = GapResolver::for_target(Target::X64).resolve(&moves);
        assert_eq!(seq.len(), 3);
        assert_eq!(seq[0].destination, reg(3));
    }

    #[test]
    fn test_swap_uses_scratch() {
        let mut moves = ParallelMove::new();
        moves.add_move(reg(0), reg(1));
        moves.add_move(reg(1), reg(0));
        check(&moves);

        let seq = GapResolver::for_target(Target::X64).resolve(&moves);
        assert_eq!(seq.len(), 3);
        assert_eq!(seq[0].destination, reg(Target::X64.scratch_register()));
    }

    #[test]
    fn test_rotation_and_fanout() {
        let mut moves = ParallelMove::new();
        moves.add_move(reg(0), reg(1));
        moves.add_move(reg(1), reg(2));
        moves.add_move(reg(2), reg(0));
        moves.add_move(reg(0), Operand::StackSlot(4));
        moves.add_move(Operand::Constant(ValueId(9)), reg(5));
        check(&moves);
    }

    #[test]
    fn test_double_cycle_uses_double_scratch() {
        let mut moves = ParallelMove::new();
        moves.add_move(Operand::DoubleRegister(0), Operand::DoubleStackSlot(2));
        moves.add_move(Operand::DoubleStackSlot(2), Operand::DoubleRegister(0));
        check(&moves);

        let seq = GapResolver::for_target(Target::Ia32).resolve(&moves);
        assert_eq!(seq[0].destination, Operand::DoubleRegister(7));
    }

    #[test]
    fn test_identity_moves_vanish() {
        let mut moves = ParallelMove::new();
        moves.add_move(reg(3), reg(3));
        assert!(GapResolver::for_target(Target::X64).resolve(&moves).is_empty());
    }
}
