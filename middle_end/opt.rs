//! Fixed-point peephole optimisation on abstract SSA.
//!
//! Rewrites match the `find` of each instruction and install replacements
//! with `replace`, so every consumer (including effectful ones and edge
//! arguments) picks the new value up on its next read. Helper instructions
//! are inserted before the rewritten one, keeping definitions ahead of uses.
//! Forwarded instructions stay in the block; the selector only emits what
//! the effect positions demand, so they disappear there.

use tracing::{debug, warn};

use crate::middle_end::ir::{BlockId, Procedure, ValueId};
use crate::middle_end::ssa::{as_inst, Abstract, Op};


/// Multiplier for division by three: ceil((2^64 + 2) / 3).
const DIV3_MAGIC: i64 = 0x5555_5555_5555_5556;

pub fn optimise(proc: &mut Procedure<Abstract>) {
    for i in 0..proc.procedures.len() {
        optimise(&mut proc.procedures[i]);
    }
    peephole(proc);
}

fn peephole(proc: &mut Procedure<Abstract>) {
    for b in proc.blocks().collect::<Vec<_>>() {
        let mut i = 0;
        while i < proc.block(b).insts.len() {
            if !peep_at(proc, b, i) {
                i += 1;
            }
        }
    }
}

// Try to rewrite the instruction at position `i`; returns whether anything
// changed. Instructions this inserts land at `i`, so the caller re-examines
// the same position until the dust settles.
fn peep_at(proc: &mut Procedure<Abstract>, b: BlockId, i: usize) -> bool {
    let v = proc.find(proc.block(b).insts[i]);
    let Some((op, args)) = as_inst(proc, v) else {
        return false;
    };
    let konst = |proc: &Procedure<Abstract>, x: ValueId| crate::middle_end::ssa::as_const(proc, x);

    match op {
        Op::Add => match (konst(proc, args[0]), konst(proc, args[1])) {
            (Some(a), Some(b_)) => fold(proc, b, i, v, a.wrapping_add(b_)),
            (Some(_), None) => commute(proc, b, i, v, Op::Add, args[1], args[0]),
            (None, Some(0)) => forward(proc, v, args[0]),
            _ => false,
        },
        Op::Sub => match (konst(proc, args[0]), konst(proc, args[1])) {
            (Some(a), Some(b_)) => fold(proc, b, i, v, a.wrapping_sub(b_)),
            (None, Some(0)) => forward(proc, v, args[0]),
            (Some(0), None) => {
                let neg = proc.emit_before(b, i, Op::Neg, vec![args[1]]);
                replace(proc, v, neg, "0-x to neg")
            }
            _ => false,
        },
        Op::Neg => match konst(proc, args[0]) {
            Some(a) => fold(proc, b, i, v, a.wrapping_neg()),
            None => false,
        },
        Op::Odd => match konst(proc, args[0]) {
            Some(a) => fold(proc, b, i, v, a & 1),
            None => false,
        },
        Op::Mul => match (konst(proc, args[0]), konst(proc, args[1])) {
            (Some(a), Some(b_)) => fold(proc, b, i, v, a.wrapping_mul(b_)),
            (Some(_), None) => commute(proc, b, i, v, Op::Mul, args[1], args[0]),
            (None, Some(0)) => forward(proc, v, args[1]),
            (None, Some(1)) => forward(proc, v, args[0]),
            (None, Some(2)) => {
                let c1 = proc.emit_before(b, i, Op::Const(1), vec![]);
                let sll = proc.emit_before(b, i + 1, Op::Sll, vec![args[0], c1]);
                replace(proc, v, sll, "x*2 to shift")
            }
            _ => false,
        },
        Op::Mulh => match (konst(proc, args[0]), konst(proc, args[1])) {
            (Some(a), Some(b_)) => {
                let high = ((a as i128 * b_ as i128) >> 64) as i64;
                fold(proc, b, i, v, high)
            }
            _ => false,
        },
        Op::Div => match (konst(proc, args[0]), konst(proc, args[1])) {
            (Some(a), Some(b_)) if b_ != 0 => fold(proc, b, i, v, a.wrapping_div(b_)),
            (_, Some(0)) => {
                warn!(
                    block = %proc.block(b).label,
                    "division by constant zero folded to 0"
                );
                fold(proc, b, i, v, 0)
            }
            (None, Some(1)) => forward(proc, v, args[0]),
            (None, Some(2)) => {
                // x/2 = (x + (x >>u 63)) >>s 1
                let e = args[0];
                let c63 = proc.emit_before(b, i, Op::Const(63), vec![]);
                let sign = proc.emit_before(b, i + 1, Op::Srl, vec![e, c63]);
                let sum = proc.emit_before(b, i + 2, Op::Add, vec![e, sign]);
                let c1 = proc.emit_before(b, i + 3, Op::Const(1), vec![]);
                let sra = proc.emit_before(b, i + 4, Op::Sra, vec![sum, c1]);
                replace(proc, v, sra, "x/2")
            }
            (None, Some(3)) => {
                // x/3 = mulh(x, ceil((2^64+2)/3)) + (x >>u 63)
                let e = args[0];
                let magic = proc.emit_before(b, i, Op::Const(DIV3_MAGIC), vec![]);
                let high = proc.emit_before(b, i + 1, Op::Mulh, vec![e, magic]);
                let c63 = proc.emit_before(b, i + 2, Op::Const(63), vec![]);
                let sign = proc.emit_before(b, i + 3, Op::Srl, vec![e, c63]);
                let sum = proc.emit_before(b, i + 4, Op::Add, vec![high, sign]);
                replace(proc, v, sum, "x/3")
            }
            (None, Some(n)) if n > 0 && (n & (n - 1)) == 0 => {
                // x/2^k: t0 = x >>s k-1; t1 = t0 >>u 64-k; t2 = x + t1;
                //        result = t2 >>s k
                let k = n.trailing_zeros() as i64;
                let e = args[0];
                let ck1 = proc.emit_before(b, i, Op::Const(k - 1), vec![]);
                let t0 = proc.emit_before(b, i + 1, Op::Sra, vec![e, ck1]);
                let c64k = proc.emit_before(b, i + 2, Op::Const(64 - k), vec![]);
                let t1 = proc.emit_before(b, i + 3, Op::Srl, vec![t0, c64k]);
                let t2 = proc.emit_before(b, i + 4, Op::Add, vec![e, t1]);
                let ck = proc.emit_before(b, i + 5, Op::Const(k), vec![]);
                let sra = proc.emit_before(b, i + 6, Op::Sra, vec![t2, ck]);
                replace(proc, v, sra, "x/2^k")
            }
            _ => false,
        },
        Op::Sll | Op::Srl | Op::Sra => match (konst(proc, args[0]), konst(proc, args[1])) {
            (Some(a), Some(b_)) => {
                let sh = (b_ & 63) as u32;
                let r = match op {
                    Op::Sll => a.wrapping_shl(sh),
                    Op::Srl => ((a as u64) >> sh) as i64,
                    _ => a >> sh,
                };
                fold(proc, b, i, v, r)
            }
            _ => false,
        },
        ref cmp if cmp.is_cmp() => match (konst(proc, args[0]), konst(proc, args[1])) {
            (Some(a), Some(b_)) => fold(proc, b, i, v, cmp.eval_cmp(a, b_)),
            _ => false,
        },
        _ => false,
    }
}

// SECTION: rewrite helpers

fn fold(proc: &mut Procedure<Abstract>, b: BlockId, i: usize, v: ValueId, c: i64) -> bool {
    let konst = proc.emit_before(b, i, Op::Const(c), vec![]);
    replace(proc, v, konst, "constant fold")
}

fn forward(proc: &mut Procedure<Abstract>, v: ValueId, to: ValueId) -> bool {
    if proc.find(to) == v {
        return false;
    }
    debug!(proc = %proc.label, "peephole: forwarding to an operand");
    proc.replace(v, to);
    true
}

// Swap a constant left operand to the right, so the selectors' immediate
// tiles see it.
fn commute(
    proc: &mut Procedure<Abstract>,
    b: BlockId,
    i: usize,
    v: ValueId,
    op: Op,
    lhs: ValueId,
    rhs: ValueId,
) -> bool {
    let swapped = proc.emit_before(b, i, op, vec![lhs, rhs]);
    replace(proc, v, swapped, "commute constant to the right")
}

fn replace(proc: &mut Procedure<Abstract>, v: ValueId, with: ValueId, rule: &str) -> bool {
    debug!(proc = %proc.label, rule, "peephole rewrite");
    proc.replace(v, with);
    true
}
