//! The RISC-V 64 SSA layer: opcodes, operand shapes and the register file.
//!
//! Operands go beyond bare values here: immediates, symbol addresses,
//! reg+offset memory operands, and (after allocation) physical registers for
//! the parallel-move sequences.

use std::fmt;
use std::fmt::Write as _;

use derive_more::Display;
use serde::Serialize;

use crate::middle_end::ir::{Ir, Names, ValueId};

/// RV64 opcodes used by the selector and the allocator. `SEQ`/`SNE`/`SLE`/
/// `SGT`/`SGE` and the `*Z` forms are the usual assembler pseudo spellings.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Op {
    #[display(fmt = "nop")]
    Nop,
    #[display(fmt = "li")]
    Li,
    #[display(fmt = "la")]
    La,
    #[display(fmt = "ld")]
    Ld,
    #[display(fmt = "sd")]
    Sd,
    #[display(fmt = "mv")]
    Mv,
    #[display(fmt = "add")]
    Add,
    #[display(fmt = "addi")]
    Addi,
    #[display(fmt = "sub")]
    Sub,
    #[display(fmt = "mul")]
    Mul,
    #[display(fmt = "mulh")]
    Mulh,
    #[display(fmt = "div")]
    Div,
    #[display(fmt = "sll")]
    Sll,
    #[display(fmt = "slli")]
    Slli,
    #[display(fmt = "srl")]
    Srl,
    #[display(fmt = "srli")]
    Srli,
    #[display(fmt = "sra")]
    Sra,
    #[display(fmt = "srai")]
    Srai,
    #[display(fmt = "and")]
    And,
    #[display(fmt = "andi")]
    Andi,
    #[display(fmt = "seq")]
    Seq,
    #[display(fmt = "sne")]
    Sne,
    #[display(fmt = "slt")]
    Slt,
    #[display(fmt = "sgt")]
    Sgt,
    #[display(fmt = "sle")]
    Sle,
    #[display(fmt = "sge")]
    Sge,
    #[display(fmt = "seqz")]
    Seqz,
    #[display(fmt = "snez")]
    Snez,
    #[display(fmt = "sltz")]
    Sltz,
    #[display(fmt = "sgtz")]
    Sgtz,
    #[display(fmt = "slez")]
    Slez,
    #[display(fmt = "sgez")]
    Sgez,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// An instruction result or block parameter.
    Value(ValueId),
    Imm(i64),
    /// The address of a symbol (an escaped variable or a procedure label).
    Sym(String),
    /// A reg+offset memory operand, `imm(value)`.
    Off(ValueId, i64),
    /// A physical register; only the parallel-move sequences use these.
    Reg(Register),
    /// The hardwired zero register.
    Zero,
}

/// Marker type for the RV64 layer.
#[derive(Clone, Debug, PartialEq)]
pub enum Rv64 {}

impl Ir for Rv64 {
    type Op = Op;
    type Operand = Operand;

    fn operand_value(operand: &Operand) -> Option<ValueId> {
        match operand {
            Operand::Value(v) => Some(*v),
            Operand::Off(v, _) => Some(*v),
            _ => None,
        }
    }

    fn value_operand(value: ValueId) -> Operand {
        Operand::Value(value)
    }

    fn map_operand(operand: &Operand, f: &mut dyn FnMut(ValueId) -> ValueId) -> Operand {
        match operand {
            Operand::Value(v) => Operand::Value(f(*v)),
            Operand::Off(v, off) => Operand::Off(f(*v), *off),
            other => other.clone(),
        }
    }

    fn has_output(op: &Op) -> bool {
        !matches!(op, Op::Nop | Op::Sd | Op::Mv)
    }

    fn is_effectful(op: &Op) -> bool {
        matches!(op, Op::Sd | Op::Mv)
    }

    fn fmt_op(op: &Op, args: &[Operand], names: &Names, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "{op}")?;
        for (i, a) in args.iter().enumerate() {
            write!(f, "{}", if i == 0 { " " } else { ", " })?;
            Self::fmt_operand(a, names, f)?;
        }
        Ok(())
    }

    fn fmt_operand(operand: &Operand, names: &Names, f: &mut dyn fmt::Write) -> fmt::Result {
        match operand {
            Operand::Value(v) => write!(f, "{}", names.name(*v)),
            Operand::Imm(imm) => write!(f, "{imm}"),
            Operand::Sym(sym) => write!(f, "{sym}"),
            Operand::Off(v, off) => write!(f, "{off}({})", names.name(*v)),
            Operand::Reg(reg) => write!(f, "{reg}"),
            Operand::Zero => write!(f, "x0"),
        }
    }
}

/// Whether an immediate fits the 12-bit signed field of the I-type formats.
pub fn fits_imm12(imm: i64) -> bool {
    (-2048..=2047).contains(&imm)
}

// SECTION: registers

/// The integer registers available to the allocator. `A0..A7` are reserved
/// for block parameters and call returns; instruction results come from the
/// caller-saved temporaries first, then the saved registers.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Register {
    #[display(fmt = "a0")]
    A0,
    #[display(fmt = "a1")]
    A1,
    #[display(fmt = "a2")]
    A2,
    #[display(fmt = "a3")]
    A3,
    #[display(fmt = "a4")]
    A4,
    #[display(fmt = "a5")]
    A5,
    #[display(fmt = "a6")]
    A6,
    #[display(fmt = "a7")]
    A7,
    #[display(fmt = "t0")]
    T0,
    #[display(fmt = "t1")]
    T1,
    #[display(fmt = "t2")]
    T2,
    #[display(fmt = "t3")]
    T3,
    #[display(fmt = "t4")]
    T4,
    #[display(fmt = "t5")]
    T5,
    #[display(fmt = "t6")]
    T6,
    #[display(fmt = "s1")]
    S1,
    #[display(fmt = "s2")]
    S2,
    #[display(fmt = "s3")]
    S3,
    #[display(fmt = "s4")]
    S4,
    #[display(fmt = "s5")]
    S5,
    #[display(fmt = "s6")]
    S6,
    #[display(fmt = "s7")]
    S7,
    #[display(fmt = "s8")]
    S8,
    #[display(fmt = "s9")]
    S9,
    #[display(fmt = "s10")]
    S10,
    #[display(fmt = "s11")]
    S11,
}

use Register::*;

/// Colour order: a colour is an index into this table.
pub const REGALLOC: [Register; 26] = [
    A0, A1, A2, A3, A4, A5, A6, A7, // argument/return registers, reserved
    T0, T1, T2, T3, T4, T5, T6, // caller-saved pool
    S1, S2, S3, S4, S5, S6, S7, S8, S9, S10, S11, // callee-saved pool
];

/// Number of reserved argument registers (`A0..A7`).
pub const ARG_REGS: usize = 8;

/// First colour of the general pool the allocator hands to instruction
/// results.
pub const POOL_START: usize = ARG_REGS;
