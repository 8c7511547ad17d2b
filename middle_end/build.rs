//! AST to abstract SSA, using incremental block-parameter insertion (the
//! variant of Braun et al.'s algorithm that uses block parameters instead of
//! phi functions).

use crate::commons::{Map, Set, SsaConstructionError};
use crate::front_end::ast::{Decl, Expr, Stmt, UnaryOp};
use crate::front_end::sema::{Symbols, VarClass};
use crate::middle_end::ir::{BlockId, Procedure, ValueId};
use crate::middle_end::ssa::{binop_opcode, Abstract, Op};

#[cfg(test)]
pub mod tests;

// SECTION: public interface

/// Translate a checked program into one abstract SSA procedure per `Decl`,
/// nested procedures first. Each procedure is compiled independently.
pub fn build(prog: &Decl, symbols: &Symbols) -> Result<Procedure<Abstract>, SsaConstructionError> {
    build_decl(prog, &[], symbols)
}

fn build_decl(
    decl: &Decl,
    params: &[String],
    symbols: &Symbols,
) -> Result<Procedure<Abstract>, SsaConstructionError> {
    let mut b = Builder::new(&decl.name, symbols);

    let entry = b.proc.add_block("fentry");
    b.seal(entry)?;

    // procedure parameters arrive as entry-block parameters, in declaration
    // order (the allocator preassigns them to the argument registers).
    for name in params {
        let p = b.proc.param(entry);
        b.write(name, entry, p);
    }

    // the return variable is threaded through the entry block so the exit
    // block naturally carries it.
    let returns = symbols.declared.get(&decl.name) == Some(&VarClass::ReturnVar);
    if returns {
        let zero = b.proc.emit(entry, Op::Const(0), vec![]);
        b.write(&decl.name, entry, zero);
    }

    for pdecl in &decl.proc_decls {
        let sub = build_decl(&pdecl.body, &pdecl.params, &symbols.procs[&pdecl.name])?;
        b.proc.procedures.push(sub);
    }

    let end = b.stmt(&decl.stmt, entry)?;
    let exit = b.proc.add_block("fexit");
    b.proc.set_jump(end, exit);
    b.seal(exit)?;
    if returns {
        b.read(&decl.name, exit)?;
    }
    b.proc.set_ret(exit);

    Ok(b.proc)
}

// SECTION: builder state

struct Builder<'a> {
    symbols: &'a Symbols,
    proc: Procedure<Abstract>,
    // the most recent definition of each variable visible at the end of each
    // block.
    current_def: Map<String, Map<BlockId, ValueId>>,
    // parameters awaiting operand back-patching until their block is sealed.
    incomplete_params: Map<BlockId, Map<String, ValueId>>,
    // blocks whose predecessor set is final.
    sealed_blocks: Set<BlockId>,
    // where a `break` would jump; reserved until the language grows one.
    #[allow(dead_code)]
    current_break: Option<BlockId>,
}

impl<'a> Builder<'a> {
    fn new(label: &str, symbols: &'a Symbols) -> Self {
        Builder {
            symbols,
            proc: Procedure::new(label),
            current_def: Map::new(),
            incomplete_params: Map::new(),
            sealed_blocks: Set::new(),
            current_break: None,
        }
    }

    // SECTION: the SSA construction core

    fn write(&mut self, var: &str, block: BlockId, value: ValueId) {
        self.current_def
            .entry(var.to_string())
            .or_default()
            .insert(block, value);
    }

    fn read(&mut self, var: &str, block: BlockId) -> Result<ValueId, SsaConstructionError> {
        if let Some(&value) = self.current_def.get(var).and_then(|defs| defs.get(&block)) {
            return Ok(value);
        }
        self.read_recursive(var, block)
    }

    fn read_recursive(&mut self, var: &str, block: BlockId) -> Result<ValueId, SsaConstructionError> {
        if !self.sealed_blocks.contains(&block) {
            // the predecessor set isn't final yet: defer back-patching until
            // the block is sealed.
            let param = self.proc.param(block);
            self.incomplete_params
                .entry(block)
                .or_default()
                .insert(var.to_string(), param);
            self.write(var, block, param);
            Ok(param)
        } else if self.proc.block(block).preds.is_empty() {
            if block == self.proc.entry() {
                return Err(SsaConstructionError(format!(
                    "unbound variable `{var}` in `{}`",
                    self.proc.label
                )));
            }
            // a read in unreachable code (after an unbroken `loop`): a
            // dangling parameter, skipped by every later pass.
            let param = self.proc.param(block);
            self.write(var, block, param);
            Ok(param)
        } else {
            // one predecessor or several: a fresh parameter fed from every
            // predecessor. Writing the definition first terminates the
            // recursion on loop back-edges.
            let param = self.proc.param(block);
            self.write(var, block, param);
            self.add_edge_args(var, param)?;
            Ok(param)
        }
    }

    // Fill in `param`'s argument on every predecessor edge of its block.
    fn add_edge_args(&mut self, var: &str, param: ValueId) -> Result<(), SsaConstructionError> {
        let block = match &self.proc.value(param).kind {
            crate::middle_end::ir::ValueKind::Param { block, .. } => *block,
            _ => unreachable!("add_edge_args on a non-parameter"),
        };
        let preds = self.proc.block(block).preds.clone();
        for pred in preds {
            let value = self.read(var, pred)?;
            self.proc.add_edge_arg(pred, param, value);
        }
        Ok(())
    }

    fn seal(&mut self, block: BlockId) -> Result<(), SsaConstructionError> {
        if let Some(params) = self.incomplete_params.remove(&block) {
            for (var, param) in params {
                self.add_edge_args(&var, param)?;
            }
        }
        self.sealed_blocks.insert(block);
        Ok(())
    }

    // SECTION: variable classification

    fn get_variable(
        &mut self,
        ident: &str,
        block: BlockId,
    ) -> Result<ValueId, SsaConstructionError> {
        match self.symbols.used.get(ident) {
            Some(VarClass::ConstVar(n)) => Ok(self.proc.emit(block, Op::Const(*n), vec![])),
            Some(VarClass::GlobalVar) => {
                Ok(self.proc.emit(block, Op::Load(ident.to_string()), vec![]))
            }
            Some(VarClass::LocalVar | VarClass::ParamVar | VarClass::ReturnVar) => {
                self.read(ident, block)
            }
            class => unreachable!("reading {ident} classified as {class:?}"),
        }
    }

    fn set_variable(&mut self, ident: &str, block: BlockId, value: ValueId) {
        match self.symbols.used.get(ident) {
            Some(VarClass::GlobalVar) => {
                self.proc.emit(block, Op::Store(ident.to_string()), vec![value]);
            }
            Some(VarClass::LocalVar | VarClass::ParamVar | VarClass::ReturnVar) => {
                self.write(ident, block, value);
            }
            class => unreachable!("writing {ident} classified as {class:?}"),
        }
    }

    // SECTION: lowering

    fn stmt(&mut self, stmt: &Stmt, block: BlockId) -> Result<BlockId, SsaConstructionError> {
        match stmt {
            Stmt::Assign(ident, expr) => {
                let (value, block) = self.expr(expr, block)?;
                self.set_variable(ident, block, value);
                Ok(block)
            }
            Stmt::Call(ident) => {
                let (_, block) = self.call(ident, &[], block)?;
                Ok(block)
            }
            Stmt::Expr(expr) => {
                let (_, block) = self.expr(expr, block)?;
                Ok(block)
            }
            Stmt::Statements(stmts) => {
                let mut block = block;
                for s in stmts {
                    block = self.stmt(s, block)?;
                }
                Ok(block)
            }
            Stmt::If(cond, body) => {
                let bthen = self.proc.add_block("ithen");
                let bexit = self.proc.add_block("iexit");
                let (cond, bentry) = self.expr(cond, block)?;
                self.proc.set_branch(bentry, cond, bthen, bexit);
                self.seal(bthen)?;
                let bthenend = self.stmt(body, bthen)?;
                self.proc.set_jump(bthenend, bexit);
                self.seal(bexit)?;
                Ok(bexit)
            }
            Stmt::IfElse(cond, body, alt) => {
                let bthen = self.proc.add_block("ethen");
                let balt = self.proc.add_block("ealt");
                let bexit = self.proc.add_block("eexit");
                let (cond, bentry) = self.expr(cond, block)?;
                self.proc.set_branch(bentry, cond, bthen, balt);
                self.seal(bthen)?;
                let bthenend = self.stmt(body, bthen)?;
                self.proc.set_jump(bthenend, bexit);
                self.seal(balt)?;
                let baltend = self.stmt(alt, balt)?;
                self.proc.set_jump(baltend, bexit);
                self.seal(bexit)?;
                Ok(bexit)
            }
            Stmt::While(cond, body) => {
                let bheader = self.proc.add_block("wheader");
                let bbody = self.proc.add_block("wbody");
                let bexit = self.proc.add_block("wexit");
                self.proc.set_jump(block, bheader);
                let (cond, bheaderend) = self.expr(cond, bheader)?;
                self.proc.set_branch(bheaderend, cond, bbody, bexit);
                self.seal(bbody)?;
                let bbodyend = self.stmt(body, bbody)?;
                self.proc.set_jump(bbodyend, bheader);
                self.seal(bheader)?;
                self.seal(bexit)?;
                Ok(bexit)
            }
            Stmt::Loop(body) => {
                let bheader = self.proc.add_block("lheader");
                let bexit = self.proc.add_block("lexit");
                self.proc.set_jump(block, bheader);
                let saved_break = self.current_break.replace(bexit);
                let bbodyend = self.stmt(body, bheader)?;
                self.proc.set_jump(bbodyend, bheader);
                self.seal(bheader)?;
                self.current_break = saved_break;
                self.seal(bexit)?;
                Ok(bexit)
            }
        }
    }

    fn expr(
        &mut self,
        expr: &Expr,
        block: BlockId,
    ) -> Result<(ValueId, BlockId), SsaConstructionError> {
        match expr {
            Expr::Number(n) => Ok((self.proc.emit(block, Op::Const(*n), vec![]), block)),
            Expr::Ident(ident) => Ok((self.get_variable(ident, block)?, block)),
            Expr::Unary(op, e) => {
                let (value, block) = self.expr(e, block)?;
                match op {
                    // unary plus is the identity; `unopt` is reserved by the
                    // scanner and passes its operand through unchanged.
                    UnaryOp::Plus | UnaryOp::Unopt => Ok((value, block)),
                    UnaryOp::Minus => {
                        Ok((self.proc.emit(block, Op::Neg, vec![value]), block))
                    }
                    UnaryOp::Odd => Ok((self.proc.emit(block, Op::Odd, vec![value]), block)),
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let (lhs, block) = self.expr(lhs, block)?;
                let (rhs, block) = self.expr(rhs, block)?;
                Ok((
                    self.proc.emit(block, binop_opcode(*op), vec![lhs, rhs]),
                    block,
                ))
            }
            Expr::Assign(ident, e) => {
                let (value, block) = self.expr(e, block)?;
                self.set_variable(ident, block, value);
                // the assignment expression evaluates to the assigned value.
                Ok((value, block))
            }
            Expr::Call(ident, args) => self.call(ident, args, block),
        }
    }

    // Close the current block with a call continuation; the return value
    // materialises as the then-block's single parameter.
    fn call(
        &mut self,
        ident: &str,
        args: &[Expr],
        block: BlockId,
    ) -> Result<(ValueId, BlockId), SsaConstructionError> {
        let mut block = block;
        let mut values = vec![];
        for arg in args {
            let (value, next) = self.expr(arg, block)?;
            values.push(value);
            block = next;
        }
        let then = self.proc.add_block("cthen");
        self.proc.set_call(block, ident, values, then);
        let ret = self.proc.param(then);
        self.seal(then)?;
        Ok((ret, then))
    }
}
