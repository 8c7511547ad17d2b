// AST for the source language: one sum type per layer.

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Odd,
    Unopt,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Expr {
    Ident(String),
    Number(i64),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Assignment is an expression; it evaluates to the assigned value.
    Assign(String, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Stmt {
    Assign(String, Expr),
    Call(String),
    If(Expr, Box<Stmt>),
    IfElse(Expr, Box<Stmt>, Box<Stmt>),
    While(Expr, Box<Stmt>),
    Loop(Box<Stmt>),
    Statements(Vec<Stmt>),
    Expr(Expr),
}

/// A block in the source sense: declarations plus one statement. The whole
/// program is a `Decl`, and so is every procedure body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Decl {
    pub name: String,
    pub const_decls: Vec<(String, i64)>,
    pub var_decls: Vec<String>,
    pub proc_decls: Vec<ProcDecl>,
    pub stmt: Stmt,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Decl,
}
