//! The abstract SSA layer: target-independent opcodes over the IR core.
//!
//! Calls are continuations, not instructions, so the opcode sum only covers
//! in-block computation plus the two memory operations for escaped
//! variables.

use std::fmt;
use std::fmt::Write as _;

use derive_more::Display;

use super::ir::{Ir, Procedure, ValueId, ValueKind};
use crate::front_end::ast::BinaryOp;

/// Abstract opcodes. `STORE` carries the variable it writes and takes the
/// stored value as its only operand; `LOAD` carries the variable it reads.
/// `MULH` exists for the division-by-three strength reduction.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum Op {
    #[display(fmt = "NOP")]
    Nop,
    #[display(fmt = "CONST")]
    Const(i64),
    #[display(fmt = "STORE")]
    Store(String),
    #[display(fmt = "LOAD")]
    Load(String),
    #[display(fmt = "ODD")]
    Odd,
    #[display(fmt = "NEG")]
    Neg,
    #[display(fmt = "ADD")]
    Add,
    #[display(fmt = "SUB")]
    Sub,
    #[display(fmt = "MUL")]
    Mul,
    #[display(fmt = "DIV")]
    Div,
    #[display(fmt = "MULH")]
    Mulh,
    #[display(fmt = "SLL")]
    Sll,
    #[display(fmt = "SRL")]
    Srl,
    #[display(fmt = "SRA")]
    Sra,
    #[display(fmt = "SLT")]
    Slt,
    #[display(fmt = "SGT")]
    Sgt,
    #[display(fmt = "SLE")]
    Sle,
    #[display(fmt = "SGE")]
    Sge,
    #[display(fmt = "SEQ")]
    Seq,
    #[display(fmt = "SNE")]
    Sne,
}

impl Op {
    pub fn is_cmp(&self) -> bool {
        matches!(
            self,
            Op::Slt | Op::Sgt | Op::Sle | Op::Sge | Op::Seq | Op::Sne
        )
    }

    /// Evaluate a comparison on constants (1 for true, 0 for false).
    pub fn eval_cmp(&self, a: i64, b: i64) -> i64 {
        let r = match self {
            Op::Slt => a < b,
            Op::Sgt => a > b,
            Op::Sle => a <= b,
            Op::Sge => a >= b,
            Op::Seq => a == b,
            Op::Sne => a != b,
            _ => panic!("not a comparison"),
        };
        r as i64
    }
}

pub fn binop_opcode(op: BinaryOp) -> Op {
    match op {
        BinaryOp::Add => Op::Add,
        BinaryOp::Sub => Op::Sub,
        BinaryOp::Mul => Op::Mul,
        BinaryOp::Div => Op::Div,
        BinaryOp::Lt => Op::Slt,
        BinaryOp::Gt => Op::Sgt,
        BinaryOp::Le => Op::Sle,
        BinaryOp::Ge => Op::Sge,
        BinaryOp::Eq => Op::Seq,
        BinaryOp::Ne => Op::Sne,
    }
}

/// Marker type for the abstract layer; operands are bare value ids.
#[derive(Clone, Debug, PartialEq)]
pub enum Abstract {}

impl Ir for Abstract {
    type Op = Op;
    type Operand = ValueId;

    fn operand_value(operand: &ValueId) -> Option<ValueId> {
        Some(*operand)
    }

    fn value_operand(value: ValueId) -> ValueId {
        value
    }

    fn map_operand(operand: &ValueId, f: &mut dyn FnMut(ValueId) -> ValueId) -> ValueId {
        f(*operand)
    }

    fn has_output(op: &Op) -> bool {
        !matches!(op, Op::Nop | Op::Store(_))
    }

    fn is_effectful(op: &Op) -> bool {
        matches!(op, Op::Store(_))
    }

    fn fmt_op(
        op: &Op,
        args: &[ValueId],
        names: &super::ir::Names,
        f: &mut dyn fmt::Write,
    ) -> fmt::Result {
        match op {
            Op::Const(c) => write!(f, "CONST {c}"),
            Op::Store(var) => {
                write!(f, "STORE ")?;
                Self::fmt_operand(&args[0], names, f)?;
                write!(f, " %{var}")
            }
            Op::Load(var) => write!(f, "LOAD %{var}"),
            _ => {
                write!(f, "{op}")?;
                for a in args {
                    write!(f, " ")?;
                    Self::fmt_operand(a, names, f)?;
                }
                Ok(())
            }
        }
    }

    fn fmt_operand(
        operand: &ValueId,
        names: &super::ir::Names,
        f: &mut dyn fmt::Write,
    ) -> fmt::Result {
        write!(f, "{}", names.name(*operand))
    }
}

/// The constant payload of a value, looking through forwarding.
pub fn as_const(proc: &Procedure<Abstract>, v: ValueId) -> Option<i64> {
    match &proc.value(proc.find(v)).kind {
        ValueKind::Inst {
            op: Op::Const(c), ..
        } => Some(*c),
        _ => None,
    }
}

/// The resolved opcode and operands of a value, if it is an instruction.
pub fn as_inst(proc: &Procedure<Abstract>, v: ValueId) -> Option<(Op, Vec<ValueId>)> {
    match &proc.value(proc.find(v)).kind {
        ValueKind::Inst { op, args } => {
            Some((op.clone(), args.iter().map(|&a| proc.find(a)).collect()))
        }
        ValueKind::Param { .. } => None,
    }
}
