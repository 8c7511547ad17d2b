// IR core tests: forwarding, continuations, edge arguments, validation.

use pretty_assertions::assert_eq;

use super::*;
use crate::middle_end::ssa::{Abstract, Op};

fn one_block() -> (Procedure<Abstract>, BlockId) {
    let mut proc = Procedure::<Abstract>::new("t");
    let b = proc.add_block("fentry");
    (proc, b)
}

#[test]
fn forwarding_resolves_through_chains() {
    let (mut proc, b) = one_block();
    let c1 = proc.emit(b, Op::Const(1), vec![]);
    let c2 = proc.emit(b, Op::Const(2), vec![]);
    let add = proc.emit(b, Op::Add, vec![c1, c2]);
    let c3 = proc.emit(b, Op::Const(3), vec![]);

    assert_eq!(proc.find(add), add);
    proc.replace(add, c3);
    assert_eq!(proc.find(add), c3);
    // a second hop: chains collapse through find.
    let c4 = proc.emit(b, Op::Const(4), vec![]);
    proc.replace(c3, c4);
    assert_eq!(proc.find(add), c4);

    // consumers read operands through find.
    let use_add = proc.emit(b, Op::Neg, vec![add]);
    assert_eq!(proc.arg(use_add, 0), c4);
}

#[test]
#[should_panic(expected = "itself")]
fn forwarding_into_a_cycle_asserts() {
    let (mut proc, b) = one_block();
    let c1 = proc.emit(b, Op::Const(1), vec![]);
    let c2 = proc.emit(b, Op::Const(2), vec![]);
    proc.replace(c1, c2);
    // c1's representative is now c2; forwarding it back would form a cycle.
    proc.replace(c2, c1);
}

#[test]
fn edge_args_attach_to_matching_edges_only() {
    let mut proc = Procedure::<Abstract>::new("t");
    let entry = proc.add_block("fentry");
    let then = proc.add_block("ithen");
    let exit = proc.add_block("iexit");
    let cond = proc.emit(entry, Op::Const(1), vec![]);
    proc.set_branch(entry, cond, then, exit);
    proc.set_jump(then, exit);

    let p = proc.param(exit);
    let v = proc.emit(entry, Op::Const(7), vec![]);
    proc.add_edge_arg(entry, p, v);
    let w = proc.emit(then, Op::Const(8), vec![]);
    proc.add_edge_arg(then, p, w);

    let Some(Cont::Branch(_, t, a)) = &proc.block(entry).cont else {
        panic!("expected a branch")
    };
    // only the edge targeting the param's block carries the argument.
    assert_eq!(t.args.len(), 0);
    assert_eq!(a.args[&p], v);
    let Some(Cont::Jump(e)) = &proc.block(then).cont else {
        panic!("expected a jump")
    };
    assert_eq!(e.args[&p], w);

    proc.set_ret(exit);
    proc.validate().unwrap();
}

#[test]
fn preds_and_succs_track_continuations() {
    let mut proc = Procedure::<Abstract>::new("t");
    let entry = proc.add_block("fentry");
    let header = proc.add_block("wheader");
    let body = proc.add_block("wbody");
    let exit = proc.add_block("wexit");
    proc.set_jump(entry, header);
    let cond = proc.emit(header, Op::Const(0), vec![]);
    proc.set_branch(header, cond, body, exit);
    proc.set_jump(body, header);
    proc.set_ret(exit);

    assert_eq!(proc.block(header).preds, vec![entry, body]);
    assert_eq!(proc.block(header).succs, vec![body, exit]);
    assert_eq!(proc.reachable(), vec![entry, header, body, exit]);
    proc.validate().unwrap();
}

#[test]
fn validate_catches_missing_edge_args() {
    let mut proc = Procedure::<Abstract>::new("t");
    let entry = proc.add_block("fentry");
    let exit = proc.add_block("fexit");
    proc.set_jump(entry, exit);
    let _p = proc.param(exit);
    proc.set_ret(exit);
    assert!(proc.validate().is_err());
}

#[test]
fn call_then_first_param_is_exempt_from_edge_args() {
    let mut proc = Procedure::<Abstract>::new("t");
    let entry = proc.add_block("fentry");
    let then = proc.add_block("cthen");
    proc.set_call(entry, "p", vec![], then);
    let _ret = proc.param(then);
    proc.set_ret(then);
    assert!(proc.is_call_then(then));
    proc.validate().unwrap();
}

#[test]
fn printer_formats_blocks_params_and_continuations() {
    let mut proc = Procedure::<Abstract>::new("main");
    let entry = proc.add_block("fentry");
    let exit = proc.add_block("fexit");
    let c = proc.emit(entry, Op::Const(7), vec![]);
    let s = proc.emit(entry, Op::Store("x".to_string()), vec![c]);
    let _ = s;
    let p = proc.param(exit);
    proc.set_jump(entry, exit);
    proc.add_edge_arg(entry, p, c);
    proc.set_ret(exit);

    let text = format!("{proc}");
    assert_eq!(
        text,
        "main:\n\
         b1_fentry:\n\
         \tv1 = CONST 7\n\
         \tSTORE v1 %x\n\
         \tjump b2_fexit(p1=v1)\n\
         b2_fexit(p1):\n\
         \treturn\n"
    );
}

#[test]
fn dump_cfg_mentions_every_reachable_block() {
    let mut proc = Procedure::<Abstract>::new("main");
    let entry = proc.add_block("fentry");
    let exit = proc.add_block("fexit");
    proc.set_jump(entry, exit);
    proc.set_ret(exit);
    let dot = dump_cfg(&proc, "digraph main");
    assert!(dot.contains("main__b1_fentry"));
    assert!(dot.contains("main__b1_fentry -> main__b2_fexit"));
}
