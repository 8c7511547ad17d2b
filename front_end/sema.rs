// Semantic analysis: name resolution and the symbol table handed to the SSA
// builder.

use super::ast::*;
use crate::commons::{Map, SemanticError};

// SECTION: public interface

/// Classification of a resolved name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VarClass {
    /// A named constant with its initialiser; materialised at each use site.
    ConstVar(i64),
    /// A plain local: flows through SSA construction.
    LocalVar,
    /// A procedure parameter: arrives as an entry-block parameter.
    ParamVar,
    /// The procedure's own name inside its body, carrying the return value.
    ReturnVar,
    /// A local promoted to memory because a nested procedure references it.
    GlobalVar,
    /// A procedure name; callable only.
    Proc,
}

impl VarClass {
    fn readable(&self) -> bool {
        !matches!(self, VarClass::Proc)
    }

    fn writeable(&self) -> bool {
        !matches!(self, VarClass::ConstVar(_) | VarClass::Proc)
    }

    fn callable(&self) -> bool {
        matches!(self, VarClass::Proc)
    }
}

/// Symbol table for one `Decl`, with the tables of its nested procedures.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Symbols {
    pub declared: Map<String, VarClass>,
    pub used: Map<String, VarClass>,
    pub procs: Map<String, Symbols>,
}

pub fn analyze(prog: &Decl) -> Result<Symbols, SemanticError> {
    let mut sema = Sema::prelude();
    sema.visit_decl(prog, Map::new())
}

// SECTION: implementation

// One frame per `Decl` plus the prelude at the bottom; resolution walks the
// stack innermost-first.
#[derive(Clone, Debug)]
struct Frame {
    declared: Map<String, VarClass>,
    used: Map<String, VarClass>,
}

struct Sema {
    frames: Vec<Frame>,
}

impl Sema {
    fn prelude() -> Self {
        let mut declared = Map::new();
        declared.insert("print".to_string(), VarClass::Proc);
        Sema {
            frames: vec![Frame {
                declared,
                used: Map::new(),
            }],
        }
    }

    fn innermost(&mut self) -> &mut Frame {
        self.frames.last_mut().unwrap()
    }

    fn declare(&mut self, ident: &str, class: VarClass) {
        self.innermost().declared.insert(ident.to_string(), class);
    }

    // Resolve ident to the frame index declaring it, promoting an outer
    // LocalVar to GlobalVar on the way (it escapes into this procedure).
    // Captured parameters and return slots have no memory home, so those are
    // rejected rather than silently miscompiled.
    fn resolve(&mut self, ident: &str) -> Result<usize, SemanticError> {
        let top = self.frames.len() - 1;
        for i in (0..self.frames.len()).rev() {
            let Some(class) = self.frames[i].declared.get(ident).cloned() else {
                continue;
            };
            if i < top && i > 0 {
                match class {
                    VarClass::LocalVar => {
                        self.frames[i]
                            .declared
                            .insert(ident.to_string(), VarClass::GlobalVar);
                    }
                    VarClass::ParamVar | VarClass::ReturnVar => {
                        return Err(SemanticError(format!(
                            "cannot capture `{ident}` from an enclosing procedure"
                        )));
                    }
                    _ => {}
                }
            }
            return Ok(i);
        }
        Err(SemanticError(format!("undeclared identifier `{ident}`")))
    }

    fn record_use(&mut self, ident: &str, frame: usize) {
        let class = self.frames[frame].declared[ident].clone();
        self.innermost().used.insert(ident.to_string(), class);
    }

    fn check_readable(&mut self, ident: &str) -> Result<(), SemanticError> {
        let frame = self.resolve(ident)?;
        if !self.frames[frame].declared[ident].readable() {
            return Err(SemanticError(format!(
                "cannot read from non-value identifier `{ident}`"
            )));
        }
        self.record_use(ident, frame);
        Ok(())
    }

    fn check_writeable(&mut self, ident: &str) -> Result<(), SemanticError> {
        let frame = self.resolve(ident)?;
        let class = &self.frames[frame].declared[ident];
        if !class.writeable() {
            if let VarClass::ConstVar(_) = class {
                return Err(SemanticError(format!(
                    "cannot write to constant identifier `{ident}`"
                )));
            }
            return Err(SemanticError(format!(
                "cannot write to non-value identifier `{ident}`"
            )));
        }
        self.record_use(ident, frame);
        Ok(())
    }

    // A call never targets the return slot, so ReturnVar bindings of the same
    // name are skipped; this is what lets a procedure call itself. The use is
    // recorded only if the name has no variable use yet, so a recursive call
    // does not clobber the ReturnVar classification the builder needs.
    fn check_callable(&mut self, ident: &str) -> Result<(), SemanticError> {
        for i in (0..self.frames.len()).rev() {
            match self.frames[i].declared.get(ident) {
                Some(VarClass::ReturnVar) => continue,
                Some(class) if class.callable() => {
                    let class = class.clone();
                    self.innermost()
                        .used
                        .entry(ident.to_string())
                        .or_insert(class);
                    return Ok(());
                }
                Some(_) => {
                    return Err(SemanticError(format!(
                        "cannot call non-procedure identifier `{ident}`"
                    )))
                }
                None => continue,
            }
        }
        Err(SemanticError(format!("no such procedure `{ident}`")))
    }

    // `presets` carries a procedure's ReturnVar and parameters into the frame
    // of its body `Decl`, so they live in the same scope as its locals.
    fn visit_decl(
        &mut self,
        decl: &Decl,
        presets: Map<String, VarClass>,
    ) -> Result<Symbols, SemanticError> {
        self.frames.push(Frame {
            declared: presets,
            used: Map::new(),
        });

        for (ident, number) in &decl.const_decls {
            self.declare(ident, VarClass::ConstVar(*number));
        }
        for ident in &decl.var_decls {
            self.declare(ident, VarClass::LocalVar);
        }

        // procedures are declared before their bodies are analysed so a
        // procedure can call itself and its earlier siblings; bodies are
        // analysed before the owner's statement so promotions are visible to
        // every later resolution.
        let mut procs = Map::new();
        for pdecl in &decl.proc_decls {
            self.declare(&pdecl.name, VarClass::Proc);
            let mut presets = Map::new();
            presets.insert(pdecl.name.clone(), VarClass::ReturnVar);
            for param in &pdecl.params {
                presets.insert(param.clone(), VarClass::ParamVar);
            }
            let symbols = self.visit_decl(&pdecl.body, presets)?;
            procs.insert(pdecl.name.clone(), symbols);
        }

        self.visit_stmt(&decl.stmt)?;

        let frame = self.frames.pop().unwrap();
        Ok(Symbols {
            declared: frame.declared,
            used: frame.used,
            procs,
        })
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> Result<(), SemanticError> {
        match stmt {
            Stmt::Assign(ident, expr) => {
                self.check_writeable(ident)?;
                self.visit_expr(expr)
            }
            Stmt::Call(ident) => self.check_callable(ident),
            Stmt::If(cond, body) => {
                self.visit_expr(cond)?;
                self.visit_stmt(body)
            }
            Stmt::IfElse(cond, body, alt) => {
                self.visit_expr(cond)?;
                self.visit_stmt(body)?;
                self.visit_stmt(alt)
            }
            Stmt::While(cond, body) => {
                self.visit_expr(cond)?;
                self.visit_stmt(body)
            }
            Stmt::Loop(body) => self.visit_stmt(body),
            Stmt::Statements(stmts) => {
                for s in stmts {
                    self.visit_stmt(s)?;
                }
                Ok(())
            }
            Stmt::Expr(expr) => self.visit_expr(expr),
        }
    }

    fn visit_expr(&mut self, expr: &Expr) -> Result<(), SemanticError> {
        match expr {
            Expr::Ident(ident) => self.check_readable(ident),
            Expr::Number(_) => Ok(()),
            Expr::Unary(_, e) => self.visit_expr(e),
            Expr::Binary(_, lhs, rhs) => {
                self.visit_expr(lhs)?;
                self.visit_expr(rhs)
            }
            Expr::Assign(ident, e) => {
                self.check_writeable(ident)?;
                self.visit_expr(e)
            }
            Expr::Call(ident, args) => {
                for arg in args {
                    self.visit_expr(arg)?;
                }
                self.check_callable(ident)
            }
        }
    }
}
