//! Instruction selection: greedy maximal-munch tree tiling from abstract SSA
//! to RV64 SSA.
//!
//! Each block is lowered from its roots: effectful instructions in program
//! order, then the continuation's edge arguments, then the branch value or
//! call arguments. Pure values are selected on demand and cached, so shared
//! subtrees are emitted once and values no root demands (dead code and
//! forwarded instructions) are dropped here.

use tracing::debug;

use crate::commons::{Map, SelectorUnsupported};
use crate::middle_end::ir::{BlockId, Cont, ContEdge, Ir, Procedure, ValueId, ValueKind};
use crate::middle_end::ssa::{self, Abstract};
use crate::back_end::rv64::{fits_imm12, Op, Operand, Rv64};

#[cfg(test)]
mod tests;

// SECTION: public interface

pub fn select(proc: &Procedure<Abstract>) -> Result<Procedure<Rv64>, SelectorUnsupported> {
    let mut procedures = vec![];
    for sub in &proc.procedures {
        procedures.push(select(sub)?);
    }

    let mut sel = Selector::new(proc);
    for b in proc.blocks() {
        sel.munch_block(b)?;
    }

    let mut out = sel.dst;
    out.procedures = procedures;
    debug!(proc = %out.label, "instruction selection done");
    Ok(out)
}

// SECTION: the selector

struct Selector<'a> {
    src: &'a Procedure<Abstract>,
    dst: Procedure<Rv64>,
    // abstract block -> rv64 block
    block_map: Map<BlockId, BlockId>,
    // abstract parameter -> rv64 parameter
    param_map: Map<ValueId, ValueId>,
    // cache: abstract value -> selected rv64 operand (pure values only)
    selected: Map<ValueId, Operand>,
    // the rv64 block currently being filled
    out: BlockId,
}

impl<'a> Selector<'a> {
    // create every target block up front, parameters included, so edges can
    // be built in terms of rv64 ids while their target is still unfilled.
    fn new(src: &'a Procedure<Abstract>) -> Self {
        let mut dst = Procedure::new(&src.label);
        let mut block_map = Map::new();
        let mut param_map = Map::new();
        for b in src.blocks() {
            let nb = dst.add_block_labeled(src.block(b).label.clone());
            block_map.insert(b, nb);
            for &p in &src.block(b).params {
                let np = dst.param(nb);
                param_map.insert(p, np);
            }
        }
        let out = dst.entry();
        Selector {
            src,
            dst,
            block_map,
            param_map,
            selected: Map::new(),
            out,
        }
    }

    fn munch_block(&mut self, b: BlockId) -> Result<(), SelectorUnsupported> {
        self.out = self.block_map[&b];

        // effect positions first, in program order.
        for &inst in &self.src.block(b).insts {
            let v = self.src.find(inst);
            if let ValueKind::Inst { op, .. } = &self.src.value(v).kind {
                if Abstract::is_effectful(op) {
                    self.munch_value(v)?;
                }
            }
        }

        // then the continuation: edge arguments, call arguments, the branch
        // value, and finally the lowered continuation itself.
        let cont = self
            .src
            .block(b)
            .cont
            .as_ref()
            .expect("selection needs complete blocks")
            .clone();
        let new_cont = match cont {
            Cont::Return => Cont::Return,
            Cont::Jump(edge) => Cont::Jump(self.munch_edge(&edge)?),
            Cont::Branch(value, then, alt) => {
                let then = self.munch_edge(&then)?;
                let alt = self.munch_edge(&alt)?;
                let value = self.munch_value(self.src.find(value))?;
                Cont::Branch(value, then, alt)
            }
            Cont::Call { proc, args, then } => {
                let then = self.munch_edge(&then)?;
                let mut new_args = vec![];
                for a in args {
                    new_args.push(self.munch_value(self.src.find(a))?);
                }
                Cont::Call {
                    proc,
                    args: new_args,
                    then,
                }
            }
        };
        self.dst.set_cont(self.out, new_cont);
        Ok(())
    }

    fn munch_edge(
        &mut self,
        edge: &ContEdge<Abstract>,
    ) -> Result<ContEdge<Rv64>, SelectorUnsupported> {
        let mut new = ContEdge::new(self.block_map[&edge.target]);
        for (p, v) in &edge.args {
            let operand = self.munch_value(self.src.find(*v))?;
            new.args.insert(self.param_map[p], operand);
        }
        Ok(new)
    }

    // Select one abstract value (already resolved through find); pure
    // results are cached so later demands reuse the first emission.
    fn munch_value(&mut self, v: ValueId) -> Result<Operand, SelectorUnsupported> {
        if let ValueKind::Param { .. } = &self.src.value(v).kind {
            return Ok(Operand::Value(self.param_map[&v]));
        }
        if let Some(cached) = self.selected.get(&v) {
            return Ok(cached.clone());
        }
        let result = self.do_munch(v)?;
        let ValueKind::Inst { op, .. } = &self.src.value(v).kind else {
            unreachable!()
        };
        if !Abstract::is_effectful(op) {
            self.selected.insert(v, result.clone());
        }
        Ok(result)
    }

    fn emit(&mut self, op: Op, args: Vec<Operand>) -> Operand {
        Operand::Value(self.dst.emit(self.out, op, args))
    }

    // The tiles. Operand shapes are matched through `find`, so peephole
    // replacements are what gets tiled.
    fn do_munch(&mut self, v: ValueId) -> Result<Operand, SelectorUnsupported> {
        use ssa::Op as A;
        let src = self.src;
        let Some((op, args)) = ssa::as_inst(src, v) else {
            unreachable!("parameters are handled by munch_value")
        };
        let konst = |i: usize| ssa::as_const(src, args[i]);

        let result = match op {
            A::Const(c) => self.emit(Op::Li, vec![Operand::Imm(c)]),

            A::Add => match konst(1) {
                Some(c) if fits_imm12(c) => {
                    let e = self.munch_value(args[0])?;
                    self.emit(Op::Addi, vec![e, Operand::Imm(c)])
                }
                _ => {
                    let e0 = self.munch_value(args[0])?;
                    let e1 = self.munch_value(args[1])?;
                    self.emit(Op::Add, vec![e0, e1])
                }
            },

            A::Sub => match konst(1).and_then(i64::checked_neg) {
                Some(c) if fits_imm12(c) => {
                    let e = self.munch_value(args[0])?;
                    self.emit(Op::Addi, vec![e, Operand::Imm(c)])
                }
                _ => {
                    let e0 = self.munch_value(args[0])?;
                    let e1 = self.munch_value(args[1])?;
                    self.emit(Op::Sub, vec![e0, e1])
                }
            },

            A::Neg => {
                let e = self.munch_value(args[0])?;
                self.emit(Op::Sub, vec![Operand::Zero, e])
            }

            A::Mul => self.binary(Op::Mul, &args)?,
            A::Mulh => self.binary(Op::Mulh, &args)?,
            A::Div => self.binary(Op::Div, &args)?,

            A::Sll => self.shift(Op::Slli, Op::Sll, &args)?,
            A::Srl => self.shift(Op::Srli, Op::Srl, &args)?,
            A::Sra => self.shift(Op::Srai, Op::Sra, &args)?,

            ref cmp if cmp.is_cmp() => {
                let (reg_op, zero_op) = cmp_ops(cmp);
                if konst(1) == Some(0) {
                    let e = self.munch_value(args[0])?;
                    self.emit(zero_op, vec![e])
                } else {
                    let e0 = self.munch_value(args[0])?;
                    let e1 = self.munch_value(args[1])?;
                    self.emit(reg_op, vec![e0, e1])
                }
            }

            A::Odd => {
                let e = self.munch_value(args[0])?;
                let low = self.emit(Op::Andi, vec![e, Operand::Imm(1)]);
                self.emit(Op::Snez, vec![low])
            }

            A::Load(var) => {
                let addr = self.emit(Op::La, vec![Operand::Sym(var)]);
                let Operand::Value(addr) = addr else { unreachable!() };
                self.emit(Op::Ld, vec![Operand::Off(addr, 0)])
            }

            A::Store(var) => {
                let value = self.munch_value(args[0])?;
                let addr = self.emit(Op::La, vec![Operand::Sym(var)]);
                let Operand::Value(addr) = addr else { unreachable!() };
                self.emit(Op::Sd, vec![value, Operand::Off(addr, 0)])
            }

            other => {
                return Err(SelectorUnsupported(format!(
                    "no tile for opcode {other} in `{}`",
                    self.src.label
                )))
            }
        };
        Ok(result)
    }

    fn binary(&mut self, op: Op, args: &[ValueId]) -> Result<Operand, SelectorUnsupported> {
        let e0 = self.munch_value(args[0])?;
        let e1 = self.munch_value(args[1])?;
        Ok(self.emit(op, vec![e0, e1]))
    }

    // Shifts take the immediate form when the amount is a constant in 0..64.
    fn shift(
        &mut self,
        imm_op: Op,
        reg_op: Op,
        args: &[ValueId],
    ) -> Result<Operand, SelectorUnsupported> {
        match ssa::as_const(self.src, args[1]) {
            Some(c) if (0..64).contains(&c) => {
                let e = self.munch_value(args[0])?;
                Ok(self.emit(imm_op, vec![e, Operand::Imm(c)]))
            }
            _ => self.binary(reg_op, args),
        }
    }
}

fn cmp_ops(op: &ssa::Op) -> (Op, Op) {
    use ssa::Op as A;
    match op {
        A::Seq => (Op::Seq, Op::Seqz),
        A::Sne => (Op::Sne, Op::Snez),
        A::Slt => (Op::Slt, Op::Sltz),
        A::Sgt => (Op::Sgt, Op::Sgtz),
        A::Sle => (Op::Sle, Op::Slez),
        A::Sge => (Op::Sge, Op::Sgez),
        _ => unreachable!("not a comparison"),
    }
}
