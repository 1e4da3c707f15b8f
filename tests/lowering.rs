mod utils;

use lowir::{
    errors::LowerErrorKind,
    hir::{
        BinaryOp, CallTarget, ClosureId, FrameState, GraphBuilder, Literal, Representation,
    },
    lir::{self, InnerPosition, InstrKind, Operand, Policy},
};

use utils::*;

#[test]
fn test_goto_then_value() {
    let mut b = GraphBuilder::new(0);
    let next = b.new_block();
    b.goto(next);
    b.use_block(next);
    b.constant(Literal::Integer(7));
    let graph = b.done();

    let chunk = lower(&graph);
    assert_eq!(mnemonics(&chunk), vec!["label", "goto", "label", "constant-i"]);
    assert!(!chunk.instruction(3).has_pointer_map());
    assert!(!chunk.instruction(3).has_environment());
    assert!(chunk.pointer_maps().is_empty());
    assert_eq!(chunk.label_position(1), Some(2));
}

#[test]
fn test_allocating_deopt_point_carries_both_tables() {
    let mut b = GraphBuilder::new(1);
    let p = b.parameter(1);
    let obj = b.allocate(16);
    let check = b.stack_check(FrameState::new(3, ClosureId(0), vec![p, obj]));
    b.ret(obj);
    let graph = b.done();

    let chunk = lower(&graph);
    let pos = position_of(&chunk, check);
    let instr = chunk.instruction(pos);
    assert!(instr.has_pointer_map());
    assert!(instr.has_environment());
    assert!(!instr.has_deoptimization_environment());

    let map = chunk.pointer_map(instr.pointer_map());
    assert_eq!(vregs(map.pointer_operands()), vec![obj.0]);
    assert_eq!(map.position(), pos);

    let env = chunk.environment(instr.environment());
    assert_eq!(env.ast_id, 3);
    assert_eq!(env.values, vec![vreg(p), vreg(obj)]);
    assert_pointer_maps_live(&graph, &chunk);
}

#[test]
fn test_call_gets_lazy_bailout() {
    let mut b = GraphBuilder::new(2);
    let p1 = b.parameter(1);
    let p2 = b.parameter(2);
    b.push_argument(p1);
    let call = b.call(CallTarget::Function(ClosureId(4)), 1);
    b.simulate(FrameState::new(9, ClosureId(0), vec![p2, call]));
    let sum = b.arithmetic(BinaryOp::Add, p2, call, Representation::Tagged);
    b.ret(sum);
    let graph = b.done();

    let chunk = lower(&graph);
    assert_eq!(
        mnemonics(&chunk),
        vec![
            "label",
            "parameter",
            "parameter",
            "push-argument",
            "call",
            "lazy-bailout",
            "arithmetic-t",
            "gap",
            "return"
        ]
    );

    let call_instr = chunk.instruction(4);
    let bailout = chunk.instruction(5);
    assert!(!call_instr.has_environment());
    assert_eq!(
        call_instr.deoptimization_environment(),
        bailout.environment()
    );
    assert!(matches!(
        bailout.kind(),
        InstrKind::LazyBailout {
            gap_instructions_size: 0
        }
    ));
    assert_eq!(
        call_instr.result(),
        &Operand::unallocated(call, Policy::FixedRegister(0))
    );

    // p1 was consumed by the call, p2 is still needed afterwards
    let map = chunk.pointer_map(call_instr.pointer_map());
    assert_eq!(vregs(map.pointer_operands()), vec![p2.0]);
    assert_pointer_maps_live(&graph, &chunk);

    assert_eq!(
        chunk.instruction(1).result(),
        &Operand::unallocated(p1, Policy::FixedSlot(-2))
    );
}

#[test]
fn test_phi_moves_land_in_predecessor_gaps() {
    let mut b = GraphBuilder::new(1);
    let left = b.new_block();
    let right = b.new_block();
    let join = b.new_block();
    let p = b.parameter(1);
    let c = b.constant(Literal::Integer(1));
    b.branch(c, left, right);

    let mut x = None;
    b.with_block(left, |b| {
        x = Some(b.arithmetic(BinaryOp::Add, p, p, Representation::Integer32));
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
        let v = b.phi(vec![x, y], Representation::Integer32);
        phi = Some(v);
        b.ret(v);
    });
    let phi = phi.unwrap();
    let graph = b.done();

    let chunk = lower(&graph);

    // left: label, add, gap, goto
    let left_label = chunk.label_position(left).unwrap();
    assert!(chunk.instruction(left_label + 2).is_gap());
    let moves = moves_at(&chunk, left_label + 2, InnerPosition::Start);
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].source, vreg(x));
    assert_eq!(moves[0].destination, vreg(phi));

    // right: the constant is defined in the block, so its goto gets a gap too
    let right_label = chunk.label_position(right).unwrap();
    let goto = chunk.instructions()[right_label..]
        .iter()
        .position(|i| i.is_goto())
        .map(|i| right_label + i)
        .unwrap();
    let moves = moves_at(&chunk, goto - 1, InnerPosition::Start);
    assert_eq!(moves[0].source, Operand::Constant(y));
    assert_eq!(moves[0].destination, vreg(phi));
}

#[test]
fn test_phi_moves_use_label_when_block_is_empty() {
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

    let chunk = lower(&graph);
    let label = chunk.label_position(pass).unwrap();
    assert!(chunk.instruction(label + 1).is_goto());
    let moves = moves_at(&chunk, label, InnerPosition::Start);
    assert_eq!(moves[0].source, vreg(p));
    assert_eq!(moves[0].destination, vreg(phi));
}

#[test]
fn test_branch_into_phi_block_aborts() {
    let mut b = GraphBuilder::new(0);
    let other = b.new_block();
    let join = b.new_block();
    let c = b.constant(Literal::Integer(0));
    let branch = b.branch(c, other, join);
    b.with_block(other, |b| {
        b.goto(join);
    });
    b.use_block(join);
    let phi = b.phi(vec![c, c], Representation::Integer32);
    b.ret(phi);
    let graph = b.done();

    let err = lir::lower(&graph, &options()).unwrap_err();
    assert_eq!(err.kind, LowerErrorKind::Unsupported);
    assert_eq!(err.value, Some(branch));
    assert!(err.msg.contains("critical edge"));
}

#[test]
fn test_use_before_definition_aborts() {
    let mut b = GraphBuilder::new(0);
    let later = b.new_block();
    let mut x = None;
    b.with_block(later, |b| {
        x = Some(b.constant(Literal::Integer(1)));
    });
    b.ret(x.unwrap());
    let graph = b.done();

    let err = lir::lower(&graph, &options()).unwrap_err();
    assert_eq!(err.kind, LowerErrorKind::Malformed);
    assert!(err.msg.contains("before its definition"));
    assert_eq!(err.block, Some(0));
}

#[test]
fn test_source_position_is_reported() {
    let mut b = GraphBuilder::new(0);
    let c = b.constant(Literal::Undefined);
    b.set_position(Some(42));
    b.throw(c);
    let graph = b.done();

    let err = lir::lower(&graph, &options()).unwrap_err();
    assert_eq!(err.position, Some(42));
}

#[test]
fn test_inlined_frames_nest_environments() {
    let mut b = GraphBuilder::new(1);
    let p = b.parameter(1);
    b.enter_inlined(ClosureId(7));
    let outer = FrameState::new(1, ClosureId(0), vec![p]);
    let inner = FrameState::new(5, ClosureId(7), vec![]).with_outer(outer);
    let deopt = b.deoptimize(inner);
    let graph = b.done();

    let chunk = lower(&graph);
    assert_eq!(chunk.inlined_closures(), &vec![ClosureId(7)]);

    let instr = chunk.instruction(position_of(&chunk, deopt));
    assert!(instr.is_deoptimize());
    assert!(chunk.instruction(position_of(&chunk, deopt) - 1).is_gap());
    let env = chunk.environment(instr.environment());
    assert_eq!(env.closure, ClosureId(7));
    let outer = chunk.environment(env.outer.unwrap());
    assert_eq!(outer.closure, ClosureId(0));
    assert_eq!(outer.values, vec![vreg(p)]);
}

#[test]
fn test_overflowing_integer_add_gets_environment() {
    let mut b = GraphBuilder::new(1);
    let p = b.parameter(1);
    let k = b.constant(Literal::Integer(1));
    let add = b.arithmetic(BinaryOp::Add, p, k, Representation::Integer32);
    b.add_flags(add, lowir::hir::Flags::CAN_OVERFLOW);
    b.set_frame(add, FrameState::new(2, ClosureId(0), vec![p]));
    b.ret(add);
    let graph = b.done();

    let chunk = lower(&graph);
    let instr = chunk.instruction(position_of(&chunk, add));
    assert!(instr.has_environment());
    assert!(!instr.has_pointer_map());
    match instr.kind() {
        InstrKind::Arithmetic { left, right, .. } => {
            assert_eq!(left, &Operand::unallocated(p, Policy::MustHaveRegister));
            assert_eq!(right, &Operand::Constant(k));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_osr_entry() {
    let mut b = GraphBuilder::new(0);
    b.osr_entry(FrameState::new(0, ClosureId(0), vec![]));
    let graph = b.done();

    let mut chunk = lower(&graph);
    let entry = chunk.osr_entry_mut().unwrap();
    entry.mark_spilled_register(1, Operand::StackSlot(0));
    assert_eq!(entry.register_spills()[1], Some(Operand::StackSlot(0)));
    assert!(chunk.instruction(1).has_environment());

    let mut b = GraphBuilder::new(0);
    b.osr_entry(FrameState::new(0, ClosureId(0), vec![]));
    b.osr_entry(FrameState::new(0, ClosureId(0), vec![]));
    let err = lir::lower(&b.done(), &options()).unwrap_err();
    assert_eq!(err.kind, LowerErrorKind::Malformed);
}

#[test]
fn test_parameter_out_of_range_aborts() {
    let mut b = GraphBuilder::new(1);
    b.parameter(2);
    let err = lir::lower(&b.done(), &options()).unwrap_err();
    assert_eq!(err.kind, LowerErrorKind::Malformed);
}

#[test]
fn test_gap_insertion_keeps_tables_consistent() {
    let mut b = GraphBuilder::new(1);
    let p = b.parameter(1);
    let obj = b.allocate(16);
    let check = b.stack_check(FrameState::new(3, ClosureId(0), vec![p, obj]));
    b.ret(obj);
    let graph = b.done();

    let mut chunk = lower(&graph);
    let before = position_of(&chunk, check);
    let spill = chunk.get_next_spill_slot(false);
    chunk.add_gap_move(before, vreg(obj), spill.clone());

    let after = position_of(&chunk, check);
    assert_eq!(after, before + 1);
    assert!(chunk.is_gap_at(before));
    let map = chunk.pointer_map(chunk.instruction(after).pointer_map());
    assert_eq!(map.position(), after);
    assert_eq!(chunk.nearest_gap_pos(after), before);
    chunk.verify();

    // the allocator then rewrites the value everywhere at once
    assert_eq!(chunk.assign_vreg(obj.0, spill.clone()), 5);
    let map = chunk.pointer_map(chunk.instruction(after).pointer_map());
    assert_eq!(map.pointer_operands(), &vec![spill]);
}
