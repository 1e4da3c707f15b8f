mod utils;

use lowir::{
    hir::{GraphBuilder, Literal, Representation},
    lir::{InnerPosition, InstrKind},
};

use utils::*;

#[test]
fn test_empty_block_with_phi_moves_is_elided() {
    // B0 -> B1 -> B2, the phi move out of B1 ends up in B0
    let mut b = GraphBuilder::new(1);
    let pass = b.new_block();
    let join = b.new_block();
    let p = b.parameter(1);
    b.goto(pass);
    b.with_block(pass, |b| {
        b.goto(join);
    });
    b.use_block(join);
    let phi = b.phi(vec![p], Representation::Tagged);
    b.ret(phi);
    let graph = b.done();

    let mut chunk = lower(&graph);
    assert_eq!(
        mnemonics(&chunk),
        vec!["label", "parameter", "gap", "goto", "label", "goto", "label", "return"]
    );

    assert_eq!(chunk.mark_empty_blocks(), 1);
    assert_eq!(
        chunk.instruction(3).kind(),
        &InstrKind::Goto {
            block_id: join,
            include_stack_check: false
        }
    );
    let after = moves_at(&chunk, 2, InnerPosition::After);
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].source, vreg(p));
    assert_eq!(after[0].destination, vreg(phi));

    assert!(chunk.get_gap_at(4).is_redundant());
    assert_eq!(chunk.lookup_destination(pass), join);
    assert_eq!(chunk.predecessors(join), &vec![0]);
    chunk.verify();
}

#[test]
fn test_chain_of_empty_blocks_resolves_in_one_hop() {
    let mut b = GraphBuilder::new(0);
    let first = b.new_block();
    let second = b.new_block();
    let last = b.new_block();
    b.goto(first);
    b.with_block(first, |b| {
        b.goto(second);
    });
    b.with_block(second, |b| {
        b.goto(last);
    });
    b.use_block(last);
    let c = b.constant(Literal::Integer(0));
    b.ret(c);
    let graph = b.done();

    let mut chunk = lower(&graph);
    assert_eq!(chunk.mark_empty_blocks(), 2);
    assert_eq!(chunk.lookup_destination(first), last);
    assert_eq!(chunk.lookup_destination(second), last);
    assert_eq!(chunk.get_label(first).block_id(), last);

    let entry_goto = chunk.instruction(1);
    assert_eq!(entry_goto.kind().targets(), vec![last]);
    assert_eq!(chunk.predecessors(last), &vec![0]);
    chunk.verify();
}

#[test]
fn test_branch_edge_without_moves_is_elided() {
    let mut b = GraphBuilder::new(0);
    let then = b.new_block();
    let els = b.new_block();
    let exit = b.new_block();
    let c = b.constant(Literal::Integer(1));
    b.branch(c, then, els);
    b.with_block(then, |b| {
        b.goto(exit);
    });
    b.with_block(els, |b| {
        b.ret(c);
    });
    b.use_block(exit);
    b.ret(c);
    let graph = b.done();

    let mut chunk = lower(&graph);
    assert_eq!(chunk.mark_empty_blocks(), 1);
    let branch = chunk
        .instructions()
        .iter()
        .find(|i| matches!(i.kind(), InstrKind::Branch { .. }))
        .unwrap();
    assert_eq!(branch.kind().targets(), vec![exit, els]);
    chunk.verify();
}

#[test]
fn test_branch_edge_with_moves_is_kept() {
    let mut b = GraphBuilder::new(1);
    let left = b.new_block();
    let right = b.new_block();
    let join = b.new_block();
    let p = b.parameter(1);
    let c = b.constant(Literal::Integer(1));
    b.branch(c, left, right);
    b.with_block(left, |b| {
        b.goto(join);
    });
    b.with_block(right, |b| {
        b.goto(join);
    });
    b.use_block(join);
    let phi = b.phi(vec![p, c], Representation::Tagged);
    b.ret(phi);
    let graph = b.done();

    let mut chunk = lower(&graph);
    assert_eq!(chunk.mark_empty_blocks(), 0);
    assert_eq!(chunk.lookup_destination(left), left);
    assert_eq!(chunk.lookup_destination(right), right);
    assert_eq!(chunk.predecessors(join), &vec![left, right]);
}

#[test]
fn test_loop_back_edge_keeps_header() {
    // B0 -> B1 (header) -> B2 -> B1
    let mut b = GraphBuilder::new(0);
    let header = b.new_block();
    let body = b.new_block();
    b.goto(header);
    b.with_block(header, |b| {
        b.goto(body);
    });
    b.use_block(body);
    b.goto_with_stack_check(header);
    let graph = b.done();

    let mut chunk = lower(&graph);
    assert!(chunk.get_label(header).is_loop_header());
    assert!(!chunk.get_label(body).is_loop_header());
    // the header forwards to the body, the body's goto checks the stack
    assert_eq!(chunk.mark_empty_blocks(), 1);
    assert_eq!(chunk.lookup_destination(header), body);
    assert_eq!(chunk.lookup_destination(body), body);
    // the body now closes the loop on itself
    assert!(chunk.get_label(body).is_loop_header());
    chunk.verify();
}
