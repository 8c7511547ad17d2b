// SSA construction tests.

use pretty_assertions::assert_eq;

use super::*;
use crate::front_end::parser::parse;
use crate::front_end::sema::analyze;
use crate::middle_end::ir::{Cont, ValueKind};

pub fn build_source(src: &str) -> Procedure<Abstract> {
    let prog = parse(src).unwrap();
    let symbols = analyze(&prog).unwrap();
    build(&prog, &symbols).unwrap()
}

fn block_by_suffix(proc: &Procedure<Abstract>, suffix: &str) -> BlockId {
    proc.blocks()
        .find(|&b| proc.block(b).label.ends_with(suffix))
        .unwrap_or_else(|| panic!("no block labelled *{suffix}"))
}

fn ops_of(proc: &Procedure<Abstract>, b: BlockId) -> Vec<Op> {
    proc.block(b)
        .insts
        .iter()
        .map(|&v| match &proc.value(v).kind {
            ValueKind::Inst { op, .. } => op.clone(),
            ValueKind::Param { .. } => unreachable!(),
        })
        .collect()
}

fn has_memory_ops(proc: &Procedure<Abstract>) -> bool {
    proc.blocks()
        .any(|b| ops_of(proc, b).iter().any(|op| matches!(op, Op::Load(_) | Op::Store(_))))
}

#[test]
fn while_and_if_build_the_expected_cfg() {
    let proc = build_source(crate::front_end::tests::PROG_WHILE_IF);
    proc.validate().unwrap();

    // a pure local never touches memory.
    assert!(!has_memory_ops(&proc));

    // entry jumps to the while header, which carries x as its parameter and
    // branches to the body and the exit.
    let entry = proc.entry();
    let header = block_by_suffix(&proc, "wheader");
    let body = block_by_suffix(&proc, "wbody");
    let wexit = block_by_suffix(&proc, "wexit");
    assert_eq!(proc.block(entry).succs, vec![header]);
    assert_eq!(proc.block(header).params.len(), 1);
    assert_eq!(proc.block(header).succs, vec![body, wexit]);

    // the if inside the body: its exit merges the then-value and the header
    // parameter, so it has one parameter fed on both incoming edges.
    let iexit = block_by_suffix(&proc, "iexit");
    assert_eq!(proc.block(iexit).params.len(), 1);
    assert_eq!(proc.block(iexit).preds.len(), 2);
    let p = proc.block(iexit).params[0];
    for &pred in &proc.block(iexit).preds {
        let cont = proc.block(pred).cont.as_ref().unwrap();
        assert!(cont
            .edges()
            .iter()
            .any(|e| e.target == iexit && e.args.contains_key(&p)));
    }

    // the body ends by jumping back to the header.
    assert_eq!(proc.block(iexit).succs, vec![header]);
}

#[test]
fn escaped_variable_reads_and_writes_memory() {
    let proc = build_source(
        "var x ;
         procedure p ;
           x := 1 ;
         call p .",
    );
    proc.validate().unwrap();

    // the inner procedure stores to x.
    assert_eq!(proc.procedures.len(), 1);
    let inner = &proc.procedures[0];
    inner.validate().unwrap();
    let entry_ops = ops_of(inner, inner.entry());
    assert!(entry_ops.contains(&Op::Store("x".to_string())));

    // the outer program closes its entry with a call continuation whose
    // then-block holds the return-value parameter.
    let entry = proc.entry();
    let Some(Cont::Call { proc: callee, then, .. }) = &proc.block(entry).cont else {
        panic!("expected a call continuation")
    };
    assert_eq!(callee, "p");
    assert_eq!(proc.block(then.target).params.len(), 1);
    assert!(proc.is_call_then(then.target));
}

#[test]
fn escaped_variable_loads_in_the_reader() {
    let proc = build_source(
        "var x , y ;
         procedure p ;
           y := x ;
         begin x := 3 ; call p end .",
    );
    let inner = &proc.procedures[0];
    let entry_ops = ops_of(inner, inner.entry());
    assert!(entry_ops.contains(&Op::Load("x".to_string())));
    assert!(entry_ops.contains(&Op::Store("y".to_string())));
    // the outer program stores x before the call.
    let outer_ops = ops_of(&proc, proc.entry());
    assert!(outer_ops.contains(&Op::Store("x".to_string())));
}

#[test]
fn unbound_local_is_an_error() {
    let prog = parse("var x , y ; y := x .").unwrap();
    let symbols = analyze(&prog).unwrap();
    let err = build(&prog, &symbols).unwrap_err();
    assert!(err.0.contains("unbound variable `x`"));
}

#[test]
fn if_else_merges_both_arms() {
    let proc = build_source(
        "var x , y ;
         begin
           x := 1 ;
           if x < 2 then y := 10 else y := 20 ;
           x := y
         end .",
    );
    proc.validate().unwrap();
    let eexit = block_by_suffix(&proc, "eexit");
    // y is live into the merge, so the merge block carries it as a parameter
    // fed from both arms.
    assert_eq!(proc.block(eexit).preds.len(), 2);
    assert_eq!(proc.block(eexit).params.len(), 1);
}

#[test]
fn sequential_if_else_merges_build_valid_cfgs() {
    // two if-elses in a row: each merge has two predecessors and carries the
    // variable assigned in its arms as a single parameter.
    let proc = build_source(
        "var x , y ;
         begin
           x := 1 ;
           if x < 2 then y := 10 else y := 20 ;
           if y < 15 then x := 1 else x := 2 ;
           y := x
         end .",
    );
    proc.validate().unwrap();
    let merges: Vec<BlockId> = proc
        .blocks()
        .filter(|&b| proc.block(b).label.ends_with("eexit"))
        .collect();
    assert_eq!(merges.len(), 2);
    for &m in &merges {
        assert_eq!(proc.block(m).preds.len(), 2);
        assert_eq!(proc.block(m).params.len(), 1);
    }
    // the first merge evaluates the second condition and branches again.
    assert_eq!(proc.block(merges[0]).succs.len(), 2);
}

#[test]
fn nested_if_else_joins_through_the_inner_merge() {
    let proc = build_source(
        "var x , y ;
         begin
           x := 1 ;
           if x < 2 then
             if x < 1 then y := 1 else y := 2
           else
             y := 3 ;
           x := y
         end .",
    );
    proc.validate().unwrap();
    // creation order puts the outer merge before the inner one.
    let merges: Vec<BlockId> = proc
        .blocks()
        .filter(|&b| proc.block(b).label.ends_with("eexit"))
        .collect();
    assert_eq!(merges.len(), 2);
    let (outer, inner) = (merges[0], merges[1]);
    // the inner merge joins y from the inner arms, then feeds the outer one.
    assert_eq!(proc.block(inner).params.len(), 1);
    assert_eq!(proc.block(inner).preds.len(), 2);
    assert_eq!(proc.block(inner).succs, vec![outer]);
    assert_eq!(proc.block(outer).params.len(), 1);
    assert_eq!(proc.block(outer).preds.len(), 2);
}

#[test]
fn assignment_expression_yields_its_value() {
    let proc = build_source("var x , y ; y := ( x := 3 ) + 1 .");
    proc.validate().unwrap();
    let ops = ops_of(&proc, proc.entry());
    // one const for 3, one for 1, one add; x and y stay in SSA.
    assert_eq!(
        ops,
        vec![Op::Const(3), Op::Const(1), Op::Add]
    );
}

#[test]
fn call_arguments_are_lowered_before_the_call() {
    let proc = build_source(
        "var r ;
         procedure add ( a , b ) ;
           add := a + b ;
         r := add ( 1 , 2 ) .",
    );
    proc.validate().unwrap();
    let Some(Cont::Call { args, .. }) = &proc.block(proc.entry()).cont else {
        panic!("expected a call continuation")
    };
    assert_eq!(args.len(), 2);

    // the callee's entry holds its two parameters plus the return slot.
    let inner = &proc.procedures[0];
    assert_eq!(inner.block(inner.entry()).params.len(), 2);
}

#[test]
fn return_variable_reaches_the_exit_block() {
    let proc = build_source(
        "procedure f ;
           f := 42 ;
         call f .",
    );
    let inner = &proc.procedures[0];
    inner.validate().unwrap();
    let exit = block_by_suffix(inner, "fexit");
    // the return value flows into the exit block as a parameter whose edge
    // argument is the 42 constant.
    assert_eq!(inner.block(exit).params.len(), 1);
    let p = inner.block(exit).params[0];
    let pred = inner.block(exit).preds[0];
    let cont = inner.block(pred).cont.as_ref().unwrap();
    let edge = cont.edges().into_iter().find(|e| e.target == exit).unwrap();
    assert_eq!(crate::middle_end::ssa::as_const(inner, edge.args[&p]), Some(42));
}

#[test]
fn loop_exit_is_unreachable_without_break() {
    let proc = build_source("var x ; begin x := 0 ; loop x := x + 1 end .");
    proc.validate().unwrap();
    let lexit = block_by_suffix(&proc, "lexit");
    assert!(proc.block(lexit).preds.is_empty());
    assert!(!proc.reachable().contains(&lexit));
    // the loop header keeps x flowing around the back edge as a parameter.
    let header = block_by_suffix(&proc, "lheader");
    assert_eq!(proc.block(header).params.len(), 1);
    assert!(proc.block(header).preds.len() == 2);
}

#[test]
fn constants_materialise_at_use_sites() {
    let proc = build_source("const c = 9 ; var x ; x := c + c .");
    let ops = ops_of(&proc, proc.entry());
    assert_eq!(ops, vec![Op::Const(9), Op::Const(9), Op::Add]);
}

#[test]
fn sealed_params_have_args_on_every_edge() {
    // the while header is sealed last; its deferred parameter must end up
    // with arguments on both the entry edge and the back edge.
    let proc = build_source(
        "var i ;
         begin
           i := 0 ;
           while i < 3 do i := i + 1
         end .",
    );
    proc.validate().unwrap();
    let header = block_by_suffix(&proc, "wheader");
    let p = proc.block(header).params[0];
    assert_eq!(proc.block(header).preds.len(), 2);
    for &pred in &proc.block(header).preds {
        let cont = proc.block(pred).cont.as_ref().unwrap();
        let edge = cont.edges().into_iter().find(|e| e.target == header).unwrap();
        assert!(edge.args.contains_key(&p));
    }
}
