// Recursive descent parser for the source language.

use super::ast::*;
use super::lexer::{lex, Token, TokenKind};
use crate::commons::SyntaxError;
use TokenKind::*;

// SECTION: public interface

pub fn parse(code: &str) -> Result<Decl, SyntaxError> {
    let mut parser = Parser::new(code)?;
    let mut program = block_r(&mut parser)?;
    parser.expect(Dot)?;
    if !parser.end() {
        return parser.error_next("expected end of input");
    }
    program.name = "main".to_string();
    Ok(program)
}

// SECTION: parser functionality

#[derive(Clone, Debug)]
struct Parser {
    tokens: Vec<Token>, // the token stream
    pos: usize,         // the position in the token stream
}

// utility functions for traversing the token stream and creating error
// messages.
impl Parser {
    // always use this to create new Parsers.
    fn new(code: &str) -> Result<Self, SyntaxError> {
        let tokens = lex(code)?;
        if tokens.is_empty() {
            Err(SyntaxError("empty token stream".to_string()))
        } else {
            Ok(Parser { tokens, pos: 0 })
        }
    }

    // if the next token has the given kind advances the iterator and returns
    // true, otherwise returns false.
    fn eat(&mut self, kind: TokenKind) -> bool {
        match self.peek() {
            Some(k) if k == kind => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    // returns an Ok or Err result depending on whether the next token has the
    // given kind, advancing the iterator on an Ok result.
    fn expect(&mut self, kind: TokenKind) -> Result<(), SyntaxError> {
        if self.eat(kind) {
            Ok(())
        } else {
            self.error_next(&format!("expected `{kind}`"))
        }
    }

    // returns the next token (if it exists) without advancing the iterator.
    fn peek(&self) -> Option<TokenKind> {
        if !self.end() {
            Some(self.tokens[self.pos].kind)
        } else {
            None
        }
    }

    // returns the token after the next one, for the one place the grammar
    // needs two tokens of lookahead (ident followed by `:=`).
    fn peek2(&self) -> Option<TokenKind> {
        if self.pos + 1 < self.tokens.len() {
            Some(self.tokens[self.pos + 1].kind)
        } else {
            None
        }
    }

    // returns whether the next token has the given kind, without advancing
    // the iterator.
    fn next_is(&self, kind: TokenKind) -> bool {
        self.peek() == Some(kind)
    }

    // returns whether we're at the end of the token stream.
    fn end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    // returns the lexeme of the token immediately prior to the current token.
    fn slice_prev(&self) -> &str {
        &self.tokens[self.pos - 1].text
    }

    // returns a parse error knowing that the next token to be inspected
    // causes an error (based on a call to peek(), next_is(), etc).
    fn error_next<T>(&self, msg: &str) -> Result<T, SyntaxError> {
        if self.end() {
            Err(SyntaxError(format!("unexpected end of input ({msg})")))
        } else {
            Err(SyntaxError(format!(
                "unexpected token `{}` ({msg})",
                self.tokens[self.pos].text
            )))
        }
    }

    fn ident(&mut self) -> Result<String, SyntaxError> {
        self.expect(Ident)?;
        Ok(self.slice_prev().to_string())
    }

    fn number(&mut self) -> Result<i64, SyntaxError> {
        self.expect(Number)?;
        self.slice_prev()
            .parse()
            .map_err(|_| SyntaxError(format!("number `{}` out of range", self.slice_prev())))
    }
}

// SECTION: grammar rules

fn block_r(p: &mut Parser) -> Result<Decl, SyntaxError> {
    let mut const_decls = vec![];
    let mut var_decls = vec![];
    let mut proc_decls = vec![];

    if p.eat(Const) {
        loop {
            let i = p.ident()?;
            p.expect(Equals)?;
            let n = p.number()?;
            const_decls.push((i, n));
            if !p.eat(Comma) {
                break;
            }
        }
        p.expect(Semi)?;
    }
    if p.eat(Var) {
        loop {
            var_decls.push(p.ident()?);
            if !p.eat(Comma) {
                break;
            }
        }
        p.expect(Semi)?;
    }
    while p.eat(Procedure) {
        let name = p.ident()?;
        let mut params = vec![];
        if p.eat(LParen) {
            if !p.next_is(RParen) {
                loop {
                    params.push(p.ident()?);
                    if !p.eat(Comma) {
                        break;
                    }
                }
            }
            p.expect(RParen)?;
        }
        p.expect(Semi)?;
        let mut body = block_r(p)?;
        p.expect(Semi)?;
        body.name = name.clone();
        proc_decls.push(ProcDecl { name, params, body });
    }
    let stmt = statement_r(p)?;
    Ok(Decl {
        name: String::new(),
        const_decls,
        var_decls,
        proc_decls,
        stmt,
    })
}

fn statement_r(p: &mut Parser) -> Result<Stmt, SyntaxError> {
    if p.eat(Call) {
        return Ok(Stmt::Call(p.ident()?));
    }
    if p.eat(Begin) {
        let mut stmts = vec![statement_r(p)?];
        while p.eat(Semi) {
            stmts.push(statement_r(p)?);
        }
        p.expect(End)?;
        return Ok(Stmt::Statements(stmts));
    }
    if p.eat(If) {
        let cond = condition_r(p)?;
        p.expect(Then)?;
        let body = statement_r(p)?;
        if p.eat(Else) {
            let alt = statement_r(p)?;
            return Ok(Stmt::IfElse(cond, Box::new(body), Box::new(alt)));
        }
        return Ok(Stmt::If(cond, Box::new(body)));
    }
    if p.eat(While) {
        let cond = condition_r(p)?;
        p.expect(Do)?;
        let body = statement_r(p)?;
        return Ok(Stmt::While(cond, Box::new(body)));
    }
    if p.eat(Loop) {
        let body = statement_r(p)?;
        return Ok(Stmt::Loop(Box::new(body)));
    }
    // a plain assignment keeps the dedicated statement form; anything else is
    // an expression statement.
    match expression_r(p)? {
        Expr::Assign(ident, expr) => Ok(Stmt::Assign(ident, *expr)),
        e => Ok(Stmt::Expr(e)),
    }
}

fn condition_r(p: &mut Parser) -> Result<Expr, SyntaxError> {
    if p.eat(Odd) {
        let e = expression_r(p)?;
        return Ok(Expr::Unary(UnaryOp::Odd, Box::new(e)));
    }
    let lhs = expression_r(p)?;
    let op = match p.peek() {
        Some(Eq) => BinaryOp::Eq,
        Some(Ne) => BinaryOp::Ne,
        Some(Le) => BinaryOp::Le,
        Some(Ge) => BinaryOp::Ge,
        Some(Lt) => BinaryOp::Lt,
        Some(Gt) => BinaryOp::Gt,
        _ => return p.error_next("expected a comparison operator"),
    };
    p.pos += 1;
    let rhs = expression_r(p)?;
    Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
}

fn expression_r(p: &mut Parser) -> Result<Expr, SyntaxError> {
    // `x := e` is an expression; it needs two tokens of lookahead to tell it
    // apart from an additive expression starting with an identifier.
    if p.next_is(Ident) && p.peek2() == Some(Assign) {
        let ident = p.ident()?;
        p.expect(Assign)?;
        let e = expression_r(p)?;
        return Ok(Expr::Assign(ident, Box::new(e)));
    }

    let mut e = if p.eat(Add) {
        Expr::Unary(UnaryOp::Plus, Box::new(term_r(p)?))
    } else if p.eat(Sub) {
        Expr::Unary(UnaryOp::Minus, Box::new(term_r(p)?))
    } else {
        term_r(p)?
    };
    loop {
        let op = if p.eat(Add) {
            BinaryOp::Add
        } else if p.eat(Sub) {
            BinaryOp::Sub
        } else {
            break;
        };
        let t = term_r(p)?;
        e = Expr::Binary(op, Box::new(e), Box::new(t));
    }
    Ok(e)
}

fn term_r(p: &mut Parser) -> Result<Expr, SyntaxError> {
    let mut t = factor_r(p)?;
    loop {
        let op = if p.eat(Mul) {
            BinaryOp::Mul
        } else if p.eat(Div) {
            BinaryOp::Div
        } else {
            break;
        };
        let f = factor_r(p)?;
        t = Expr::Binary(op, Box::new(t), Box::new(f));
    }
    Ok(t)
}

fn factor_r(p: &mut Parser) -> Result<Expr, SyntaxError> {
    if p.eat(LParen) {
        let e = expression_r(p)?;
        p.expect(RParen)?;
        return Ok(e);
    }
    if p.eat(Unopt) {
        let f = factor_r(p)?;
        return Ok(Expr::Unary(UnaryOp::Unopt, Box::new(f)));
    }
    if p.next_is(Number) {
        return Ok(Expr::Number(p.number()?));
    }
    let ident = p.ident()?;
    if p.eat(LParen) {
        let mut args = vec![];
        if !p.next_is(RParen) {
            loop {
                args.push(expression_r(p)?);
                if !p.eat(Comma) {
                    break;
                }
            }
        }
        p.expect(RParen)?;
        return Ok(Expr::Call(ident, args));
    }
    Ok(Expr::Ident(ident))
}
