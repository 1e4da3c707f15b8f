use fnv::{FnvHashMap, FnvHashSet};
use itertools::Itertools;
use petgraph::{stable_graph::NodeIndex, Direction};

use super::{BlockId, HGraph, HValue, Opcode, ValueId};

/// Liveness as seen by the register allocator.
pub trait LivenessOracle {
    /// Values that stay live across `value`: defined before it and read after
    /// it. Sorted, never contains `value` itself.
    fn live_across(&self, value: ValueId) -> &[ValueId];

    fn is_live_across(&self, value: ValueId, candidate: ValueId) -> bool {
        self.live_across(value).binary_search(&candidate).is_ok()
    }
}

/// Backward dataflow liveness over the block graph. Frame-state values count
/// as uses; phi inputs are live out of the matching predecessor.
#[derive(Clone, Debug)]
pub struct Liveness {
    live_in: Vec<FnvHashSet<ValueId>>,
    live_out: Vec<FnvHashSet<ValueId>>,
    live_across: FnvHashMap<ValueId, Vec<ValueId>>,
}

impl LivenessOracle for Liveness {
    fn live_across(&self, value: ValueId) -> &[ValueId] {
        self.live_across
            .get(&value)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

impl Liveness {
    pub fn compute(graph: &HGraph) -> Liveness {
        let num_blocks = graph.blocks().len();
        let mut live_in = vec![FnvHashSet::default(); num_blocks];
        let mut live_out = vec![FnvHashSet::default(); num_blocks];

        let mut changed = true;
        let mut rounds = 0;
        while changed {
            changed = false;
            rounds += 1;
            for block in graph.blocks().iter().rev() {
                let out = Liveness::block_live_out(graph, block.id, &live_in);
                let mut live = out.clone();
                for v in block.values.iter().rev() {
                    Liveness::step(graph.value(*v), &mut live);
                }

                if live != live_in[block.id] {
                    live_in[block.id] = live;
                    changed = true;
                }
                live_out[block.id] = out;
            }
        }
        log::debug!("liveness converged after {} rounds", rounds);

        let mut live_across = FnvHashMap::default();
        for block in graph.blocks() {
            let mut live = live_out[block.id].clone();
            for v in block.values.iter().rev() {
                let node = graph.value(*v);
                let across = live
                    .iter()
                    .copied()
                    .filter(|l| *l != node.id)
                    .sorted()
                    .collect::<Vec<_>>();
                live_across.insert(node.id, across);
                Liveness::step(node, &mut live);
            }
        }

        Liveness {
            live_in,
            live_out,
            live_across,
        }
    }

    #[inline(always)]
    pub fn live_in(&self, block: BlockId) -> &FnvHashSet<ValueId> {
        &self.live_in[block]
    }

    #[inline(always)]
    pub fn live_out(&self, block: BlockId) -> &FnvHashSet<ValueId> {
        &self.live_out[block]
    }

    fn block_live_out(
        graph: &HGraph,
        block: BlockId,
        live_in: &[FnvHashSet<ValueId>],
    ) -> FnvHashSet<ValueId> {
        let mut out = FnvHashSet::default();
        for succ in graph
            .cfg()
            .neighbors_directed(NodeIndex::new(block), Direction::Outgoing)
        {
            let succ = succ.index();
            out.extend(live_in[succ].iter().copied());

            let pred_idx = unless!(graph.block(succ).predecessor_index(block), else continue);
            for phi in graph.phis(succ) {
                if let Opcode::Phi(inputs) = &phi.opcode {
                    if let Some(input) = inputs.get(pred_idx) {
                        out.insert(*input);
                    }
                }
            }
        }
        out
    }

    fn step(node: &HValue, live: &mut FnvHashSet<ValueId>) {
        live.remove(&node.id);
        if node.is_phi() {
            return;
        }

        live.extend(node.opcode.uses());
        if let Some(frame) = &node.frame {
            live.extend(frame.all_values());
        }
    }
}

#[cfg(test)]
mod liveness_test {
    use super::{Liveness, LivenessOracle};
    use crate::hir::{
        BinaryOp, CallTarget, ClosureId, FrameState, GraphBuilder, Literal, Representation,
    };

    #[test]
    fn test_value_used_after_call_is_live_across_it() {
        let mut b = GraphBuilder::new(1);
        let p = b.parameter(1);
        let k = b.constant(Literal::Integer(3));
        let call = b.call(CallTarget::Runtime(7), 0);
        b.simulate(FrameState::new(4, ClosureId(0), vec![p, call]));
        let sum = b.arithmetic(BinaryOp::Add, k, k, Representation::Integer32);
        b.ret(sum);
        let graph = b.done();
        let liveness = Liveness::compute(&graph);

        assert_eq!(liveness.live_across(call), &[p, k]);
        assert!(liveness.is_live_across(call, p));
        assert!(!liveness.is_live_across(call, call));
        // nothing survives the return
        assert!(liveness.live_across(graph.block(0).values[5]).is_empty());
    }

    #[test]
    fn test_phi_inputs_live_out_of_their_predecessor() {
        let mut b = GraphBuilder::new(0);
        let left = b.new_block();
        let right = b.new_block();
        let join = b.new_block();
        let c = b.constant(Literal::Integer(1));
        b.branch(c, left, right);

        let mut x = None;
        b.with_block(left, |b| {
            x = Some(b.constant(Literal::Integer(2)));
            b.goto(join);
        });
        let mut y = None;
        b.with_block(right, |b| {
            y = Some(b.constant(Literal::Integer(3)));
            b.goto(join);
        });
        let (x, y) = (x.unwrap(), y.unwrap());
        let mut phi = None;
        b.with_block(join, |b| {
            let p = b.phi(vec![x, y], Representation::Integer32);
            phi = Some(p);
            b.ret(p);
        });
        let graph = b.done();
        let liveness = Liveness::compute(&graph);

        assert!(liveness.live_out(left).contains(&x));
        assert!(!liveness.live_out(left).contains(&y));
        assert!(liveness.live_out(right).contains(&y));
        assert!(!liveness.live_in(join).contains(&phi.unwrap()));
    }
}
