//! Shared aliases and error plumbing for the whole pipeline.

use derive_more::Display;

pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

// A syntax error from the tokeniser or the parser, with explanatory message.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub struct SyntaxError(pub String);
impl std::error::Error for SyntaxError {}

// A name-resolution or binding error from semantic analysis.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub struct SemanticError(pub String);
impl std::error::Error for SemanticError {}

// Reading a local in a sealed block with no predecessors (dead code after an
// unbroken `loop`, or an uninitialised local in the entry block).
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub struct SsaConstructionError(pub String);
impl std::error::Error for SsaConstructionError {}

// No tile matches an operator shape; names the offending opcode.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub struct SelectorUnsupported(pub String);
impl std::error::Error for SelectorUnsupported {}

// Ran out of colours. Spilling is future work, so this is fatal.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub struct RegisterAllocationFailure(pub String);
impl std::error::Error for RegisterAllocationFailure {}

/// Any error the pipeline can stop with, tagged by the component that raised
/// it so the driver can exit with a message naming it.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum CompileError {
    #[display(fmt = "syntax error: {}", _0)]
    Syntax(SyntaxError),
    #[display(fmt = "semantic error: {}", _0)]
    Semantic(SemanticError),
    #[display(fmt = "ssa construction: {}", _0)]
    Ssa(SsaConstructionError),
    #[display(fmt = "instruction selection: {}", _0)]
    Selector(SelectorUnsupported),
    #[display(fmt = "register allocation: {}", _0)]
    RegAlloc(RegisterAllocationFailure),
}
impl std::error::Error for CompileError {}

impl From<SyntaxError> for CompileError {
    fn from(e: SyntaxError) -> Self {
        CompileError::Syntax(e)
    }
}

impl From<SemanticError> for CompileError {
    fn from(e: SemanticError) -> Self {
        CompileError::Semantic(e)
    }
}

impl From<SsaConstructionError> for CompileError {
    fn from(e: SsaConstructionError) -> Self {
        CompileError::Ssa(e)
    }
}

impl From<SelectorUnsupported> for CompileError {
    fn from(e: SelectorUnsupported) -> Self {
        CompileError::Selector(e)
    }
}

impl From<RegisterAllocationFailure> for CompileError {
    fn from(e: RegisterAllocationFailure) -> Self {
        CompileError::RegAlloc(e)
    }
}
