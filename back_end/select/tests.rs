// Instruction selection tests: individual tiles on hand-built blocks, then
// whole-procedure properties.

use pretty_assertions::assert_eq;

use super::*;
use crate::middle_end::build::tests::build_source;
use crate::middle_end::opt::optimise;
use crate::middle_end::ssa::Op as A;

// a one-block procedure with one parameter, for tiling expressions of a
// non-constant operand; the expression is rooted by a store.
fn tile(build: impl FnOnce(&mut Procedure<Abstract>, BlockId, ValueId) -> ValueId) -> String {
    let mut proc = Procedure::<Abstract>::new("t");
    let b = proc.add_block("");
    let p = proc.param(b);
    let root = build(&mut proc, b, p);
    proc.emit(b, A::Store("x".to_string()), vec![root]);
    proc.set_ret(b);
    let out = select(&proc).unwrap();
    out.body_text()
}

#[test]
fn tile_const_becomes_li() {
    let text = tile(|proc, b, _| proc.emit(b, A::Const(7), vec![]));
    assert_eq!(
        text,
        "t:\n\
         b1(p1):\n\
         \tv1 = li 7\n\
         \tv2 = la x\n\
         \tsd v1, 0(v2)\n\
         \treturn\n"
    );
}

#[test]
fn tile_add_with_small_constant_folds_into_addi() {
    let text = tile(|proc, b, p| {
        let c = proc.emit(b, A::Const(3), vec![]);
        proc.emit(b, A::Add, vec![p, c])
    });
    assert!(text.contains("addi p1, 3"), "{text}");
    assert!(!text.contains("li"), "{text}");
}

#[test]
fn tile_add_with_wide_constant_materialises() {
    let text = tile(|proc, b, p| {
        let c = proc.emit(b, A::Const(5000), vec![]);
        proc.emit(b, A::Add, vec![p, c])
    });
    assert!(text.contains("li 5000"), "{text}");
    assert!(text.contains("add p1, v"), "{text}");
}

#[test]
fn tile_sub_constant_negates_into_addi() {
    let text = tile(|proc, b, p| {
        let c = proc.emit(b, A::Const(3), vec![]);
        proc.emit(b, A::Sub, vec![p, c])
    });
    assert!(text.contains("addi p1, -3"), "{text}");
}

#[test]
fn tile_neg_subtracts_from_zero() {
    let text = tile(|proc, b, p| proc.emit(b, A::Neg, vec![p]));
    assert!(text.contains("sub x0, p1"), "{text}");
}

#[test]
fn tile_comparisons_use_zero_forms() {
    let text = tile(|proc, b, p| {
        let c = proc.emit(b, A::Const(0), vec![]);
        proc.emit(b, A::Seq, vec![p, c])
    });
    assert!(text.contains("seqz p1"), "{text}");

    let text = tile(|proc, b, p| {
        let c = proc.emit(b, A::Const(5), vec![]);
        proc.emit(b, A::Slt, vec![p, c])
    });
    assert!(text.contains("li 5"), "{text}");
    assert!(text.contains("slt p1, v"), "{text}");
}

#[test]
fn tile_odd_is_andi_then_snez() {
    let text = tile(|proc, b, p| proc.emit(b, A::Odd, vec![p]));
    assert!(text.contains("andi p1, 1"), "{text}");
    assert!(text.contains("snez v"), "{text}");
}

#[test]
fn tile_shift_immediates() {
    let text = tile(|proc, b, p| {
        let c = proc.emit(b, A::Const(2), vec![]);
        proc.emit(b, A::Sra, vec![p, c])
    });
    assert!(text.contains("srai p1, 2"), "{text}");

    // an out-of-range amount falls back to the register form.
    let text = tile(|proc, b, p| {
        let c = proc.emit(b, A::Const(64), vec![]);
        proc.emit(b, A::Sra, vec![p, c])
    });
    assert!(text.contains("li 64"), "{text}");
    assert!(text.contains("sra p1, v"), "{text}");
}

#[test]
fn tile_load_and_store_address_through_la() {
    let text = tile(|proc, b, _| proc.emit(b, A::Load("g".to_string()), vec![]));
    assert_eq!(
        text,
        "t:\n\
         b1(p1):\n\
         \tv1 = la g\n\
         \tv2 = ld 0(v1)\n\
         \tv3 = la x\n\
         \tsd v2, 0(v3)\n\
         \treturn\n"
    );
}

#[test]
fn pure_values_are_selected_once() {
    let mut proc = Procedure::<Abstract>::new("t");
    let b = proc.add_block("");
    let p = proc.param(b);
    let c = proc.emit(b, A::Const(3), vec![]);
    let add = proc.emit(b, A::Add, vec![p, c]);
    proc.emit(b, A::Store("x".to_string()), vec![add]);
    proc.emit(b, A::Store("y".to_string()), vec![add]);
    proc.set_ret(b);
    let out = select(&proc).unwrap();
    let text = out.body_text();
    assert_eq!(text.matches("addi").count(), 1, "{text}");
    assert_eq!(text.matches("sd ").count(), 2, "{text}");
}

#[test]
fn dead_pure_code_is_dropped() {
    // after peephole, only the roots' demand survives selection: a fully
    // folded main program has no instructions left at all.
    let mut proc = build_source("var x ; begin x := 1 + 2 * 3 end .");
    optimise(&mut proc);
    let out = select(&proc).unwrap();
    assert_eq!(
        out.body_text(),
        "main:\n\
         b1_fentry:\n\
         \tjump b2_fexit\n\
         b2_fexit:\n\
         \treturn\n"
    );
}

#[test]
fn call_continuation_lowers_with_arguments_and_return_param() {
    let mut proc = build_source(
        "var r ;
         procedure add ( a , b ) ;
           add := a + b ;
         r := add ( 1 , 2 ) .",
    );
    optimise(&mut proc);
    let out = select(&proc).unwrap();
    out.validate().unwrap();
    let entry = out.entry();
    let Some(Cont::Call { proc: callee, args, then }) = &out.block(entry).cont else {
        panic!("expected a call continuation")
    };
    assert_eq!(callee, "add");
    assert_eq!(args.len(), 2);
    assert!(args.iter().all(|a| matches!(a, Operand::Value(_))));
    assert_eq!(out.block(then.target).params.len(), 1);
}

#[test]
fn selected_procedure_mirrors_blocks_and_params() {
    let mut proc = build_source(crate::front_end::tests::PROG_WHILE_IF);
    optimise(&mut proc);
    let out = select(&proc).unwrap();
    out.validate().unwrap();
    assert_eq!(out.num_blocks(), proc.num_blocks());
    for (b, nb) in proc.blocks().zip(out.blocks()) {
        assert_eq!(proc.block(b).label, out.block(nb).label);
        assert_eq!(proc.block(b).params.len(), out.block(nb).params.len());
        assert_eq!(
            proc.block(b).cont.is_some(),
            out.block(nb).cont.is_some()
        );
    }
    // every edge argument is a selected value.
    for b in out.blocks() {
        if let Some(cont) = &out.block(b).cont {
            for e in cont.edges() {
                for (_, a) in &e.args {
                    assert!(matches!(a, Operand::Value(_)));
                }
            }
        }
    }
}

#[test]
fn branch_value_is_selected_last_in_its_block() {
    let mut proc = build_source(
        "var x ;
         begin
           x := 0 ;
           while x < 10 do x := x + 1
         end .",
    );
    optimise(&mut proc);
    let out = select(&proc).unwrap();
    let header = out
        .blocks()
        .find(|&b| out.block(b).label.ends_with("wheader"))
        .unwrap();
    let Some(Cont::Branch(value, _, _)) = &out.block(header).cont else {
        panic!("expected a branch")
    };
    // the comparison feeding the branch is the last instruction.
    let &last = out.block(header).insts.last().unwrap();
    assert_eq!(value, &Operand::Value(last));
}

#[test]
fn values_without_a_tile_are_reported() {
    let mut proc = Procedure::<Abstract>::new("t");
    let b = proc.add_block("");
    let nop = proc.emit(b, A::Nop, vec![]);
    let exit = proc.add_block("");
    let p = proc.param(exit);
    proc.set_jump(b, exit);
    proc.add_edge_arg(b, p, nop);
    proc.set_ret(exit);
    let err = select(&proc).unwrap_err();
    assert!(err.0.contains("NOP"), "{err}");
}
