// Register allocation tests: parallel-move serialisation, colouring
// properties, and simulation of the inserted move sequences.

use pretty_assertions::assert_eq;

use super::*;
use crate::back_end::rv64::Register;
use crate::back_end::select::select;
use crate::middle_end::build::tests::build_source;
use crate::middle_end::dom;
use crate::middle_end::opt::optimise;

// run the whole back end on a source program.
fn alloc_source(src: &str) -> (Procedure<Rv64>, DominationResult, Colouring) {
    let mut abs = build_source(src);
    optimise(&mut abs);
    let mut proc = select(&abs).unwrap();
    let analysis = dom::analyze(&mut proc);
    let colours = allocate(&mut proc, &analysis.result).unwrap();
    (proc, analysis.result, colours)
}

fn block_by_suffix(proc: &Procedure<Rv64>, suffix: &str) -> BlockId {
    proc.blocks()
        .find(|&b| proc.block(b).label.ends_with(suffix))
        .unwrap_or_else(|| panic!("no block labelled *{suffix}"))
}

// SECTION: parallel-move serialisation

#[test]
fn s6_swap_cycle_takes_three_moves() {
    // {R1,R2} onto {R2,R1}: save R1 to tmp, R2 -> R1, tmp -> R2.
    let moves = vec![(1, 2), (2, 1)];
    assert_eq!(parallel_moves(moves, 3), vec![(1, 3), (2, 1), (3, 2)]);
}

#[test]
fn move_chains_are_ordered_without_a_scratch() {
    // 1 -> 2 -> 3: the 2 -> 3 move must go first; no scratch involved.
    let moves = vec![(1, 2), (2, 3)];
    assert_eq!(parallel_moves(moves, 9), vec![(2, 3), (1, 2)]);
}

#[test]
fn three_cycle_uses_one_scratch() {
    let moves = vec![(1, 2), (2, 3), (3, 1)];
    let seq = parallel_moves(moves, 7);
    // simulate: registers start holding their own index.
    let mut regs: Map<usize, usize> = (0..8).map(|r| (r, r)).collect();
    for (src, dst) in seq {
        let x = regs[&src];
        regs.insert(dst, x);
    }
    assert_eq!(regs[&2], 1);
    assert_eq!(regs[&3], 2);
    assert_eq!(regs[&1], 3);
}

// SECTION: colouring

#[test]
fn parameters_are_preassigned_argument_registers() {
    let (proc, _, colours) = alloc_source(
        "var i ;
         begin
           i := 0 ;
           while i < 3 do i := i + 1
         end .",
    );
    let header = block_by_suffix(&proc, "wheader");
    let p = proc.block(header).params[0];
    assert_eq!(colours[&header][&p], Register::A0);
}

#[test]
fn call_return_value_is_preassigned_a0() {
    let (proc, _, colours) = alloc_source(
        "var r ;
         procedure f ;
           f := 1 ;
         r := f ( ) .",
    );
    let cthen = block_by_suffix(&proc, "cthen");
    assert!(proc.is_call_then(cthen));
    let ret = proc.block(cthen).params[0];
    assert_eq!(colours[&cthen][&ret], Register::A0);
}

#[test]
fn results_take_the_lowest_free_pool_register() {
    // three simultaneously live temporaries get t0, t1, t2; the greedy
    // first-fit never leaves a gap.
    let mut proc = Procedure::<Rv64>::new("t");
    let b = proc.add_block("");
    let a = proc.emit(b, Op::Li, vec![Operand::Imm(1)]);
    let c = proc.emit(b, Op::Li, vec![Operand::Imm(2)]);
    let d = proc.emit(b, Op::Li, vec![Operand::Imm(3)]);
    let e = proc.emit(
        b,
        Op::Add,
        vec![Operand::Value(a), Operand::Value(c)],
    );
    let f = proc.emit(
        b,
        Op::Add,
        vec![Operand::Value(e), Operand::Value(d)],
    );
    let exit = proc.add_block("");
    let p = proc.param(exit);
    proc.set_jump(b, exit);
    proc.add_edge_arg(b, p, Operand::Value(f));
    proc.set_ret(exit);

    let analysis = dom::analyze(&mut proc);
    let colours = allocate(&mut proc, &analysis.result).unwrap();
    assert_eq!(colours[&b][&a], Register::T0);
    assert_eq!(colours[&b][&c], Register::T1);
    assert_eq!(colours[&b][&d], Register::T2);
    // a and c die at the first add, which reuses the lowest freed colour.
    assert_eq!(colours[&b][&e], Register::T0);
    assert_eq!(colours[&b][&f], Register::T0);
}

#[test]
fn running_out_of_registers_is_reported() {
    let mut proc = Procedure::<Rv64>::new("t");
    let b = proc.add_block("");
    let mut live = vec![];
    for i in 0..19 {
        live.push(Operand::Value(proc.emit(b, Op::Li, vec![Operand::Imm(i)])));
    }
    // one instruction keeping all nineteen alive at once; the pool holds
    // eighteen.
    let sink = proc.emit(b, Op::Add, live);
    let exit = proc.add_block("");
    let p = proc.param(exit);
    proc.set_jump(b, exit);
    proc.add_edge_arg(b, p, Operand::Value(sink));
    proc.set_ret(exit);

    let analysis = dom::analyze(&mut proc);
    let err = allocate(&mut proc, &analysis.result).unwrap_err();
    assert!(err.0.contains("ran out of registers"), "{err}");
}

#[test]
fn too_many_block_parameters_is_reported() {
    let mut proc = Procedure::<Rv64>::new("t");
    let b = proc.add_block("");
    for _ in 0..9 {
        proc.param(b);
    }
    proc.set_ret(b);
    let analysis = dom::analyze(&mut proc);
    let err = allocate(&mut proc, &analysis.result).unwrap_err();
    assert!(err.0.contains("parameters"), "{err}");
}

// SECTION: move insertion and simulation (property 7)

// simulate every edge's move sequence and check it maps the source argument
// colours onto the target parameter colours with no lost values. The number
// of instructions each edge contributed is recovered by re-serialising its
// raw colour pairs; the simulation itself runs on the emitted instructions.
fn check_edge_moves(proc: &Procedure<Rv64>, colours: &Colouring) {
    let index = |r: Register| REGALLOC.iter().position(|&x| x == r).unwrap();
    for v in proc.blocks() {
        if !colours.contains_key(&v) {
            continue;
        }
        let Some(cont) = &proc.block(v).cont else {
            continue;
        };
        let multi = cont.edges().len() > 1;
        for edge in cont.edges() {
            let u = edge.target;
            let mut raw = vec![];
            for (p, a) in &edge.args {
                let val = Rv64::operand_value(a).unwrap();
                let cv = index(colours[&v][&val]);
                let cu = index(colours[&u][p]);
                if cv != cu {
                    raw.push((cv, cu));
                }
            }
            if raw.is_empty() {
                continue;
            }
            let k = parallel_moves(raw, 999).len();

            // the moves live at the end of v (single successor) or at the
            // start of u (v branches; u is the split-created block).
            let insts = &proc.block(if multi { u } else { v }).insts;
            assert!(insts.len() >= k);
            let slice = if multi {
                &insts[..k]
            } else {
                &insts[insts.len() - k..]
            };
            let mut moves = vec![];
            for &i in slice {
                assert!(is_mv(proc, i), "expected a parallel-move instruction");
                if let ValueKind::Inst { args, .. } = &proc.value(i).kind {
                    let Operand::Reg(dst) = &args[0] else { panic!() };
                    let Operand::Reg(src) = &args[1] else { panic!() };
                    moves.push((*src, *dst));
                }
            }

            // registers start out holding themselves, then the moves run.
            let mut regs: Map<Register, Register> =
                REGALLOC.iter().map(|&r| (r, r)).collect();
            for (src, dst) in moves {
                let x = regs[&src];
                regs.insert(dst, x);
            }
            for (p, a) in &edge.args {
                let val = Rv64::operand_value(a).unwrap();
                let want = colours[&v][&val];
                let got = regs[&colours[&u][p]];
                assert_eq!(
                    got, want,
                    "edge {} -> {} loses a value",
                    proc.block(v).label,
                    proc.block(u).label
                );
            }
        }
    }
}

fn is_mv(proc: &Procedure<Rv64>, v: ValueId) -> bool {
    matches!(
        &proc.value(v).kind,
        ValueKind::Inst { op: Op::Mv, .. }
    )
}

#[test]
fn loop_carried_swap_resolves_with_a_scratch() {
    // the loop body permutes two locals, forcing a move cycle on the back
    // edge.
    let (proc, _, colours) = alloc_source(
        "var a , b , t ;
         begin
           a := 0 ;
           b := 1 ;
           while a < 10 do
           begin
             t := a ;
             a := b ;
             b := t
           end
         end .",
    );
    let body = block_by_suffix(&proc, "wbody");
    // the body's trailing moves realise the swap: three mv instructions.
    let mvs: Vec<ValueId> = proc
        .block(body)
        .insts
        .iter()
        .copied()
        .filter(|&i| is_mv(&proc, i))
        .collect();
    assert_eq!(mvs.len(), 3);
    check_edge_moves(&proc, &colours);
}

#[test]
fn diamond_merge_moves_flow_through_the_split_block() {
    let (proc, _, colours) = alloc_source(
        "var x ;
         begin
           x := 0 ;
           if x < 5 then x := 5 ;
           x := x + 1
         end .",
    );
    // the critical edge got its own block; any moves for the branch edge sit
    // there, at the front.
    let _split = block_by_suffix(&proc, "_split");
    check_edge_moves(&proc, &colours);
}

#[test]
fn whole_program_edges_transfer_correctly() {
    let (proc, _, colours) = alloc_source(crate::front_end::tests::PROG_WHILE_IF);
    check_edge_moves(&proc, &colours);
}
