// Tokeniser for the source language.

use derive_more::Display;
use logos::Logos;

use crate::commons::SyntaxError;

/// A token together with the slice of source text it came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

#[derive(Clone, Copy, Debug, Display, Eq, Logos, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum TokenKind {
    #[token("const")]
    #[display(fmt = "const")]
    Const,
    #[token("var")]
    #[display(fmt = "var")]
    Var,
    #[token("procedure")]
    #[display(fmt = "procedure")]
    Procedure,
    #[token("call")]
    #[display(fmt = "call")]
    Call,
    #[token("begin")]
    #[display(fmt = "begin")]
    Begin,
    #[token("end")]
    #[display(fmt = "end")]
    End,
    #[token("if")]
    #[display(fmt = "if")]
    If,
    #[token("then")]
    #[display(fmt = "then")]
    Then,
    #[token("else")]
    #[display(fmt = "else")]
    Else,
    #[token("while")]
    #[display(fmt = "while")]
    While,
    #[token("do")]
    #[display(fmt = "do")]
    Do,
    #[token("odd")]
    #[display(fmt = "odd")]
    Odd,
    #[token("loop")]
    #[display(fmt = "loop")]
    Loop,
    #[token("unopt")]
    #[display(fmt = "unopt")]
    Unopt,

    #[regex("[a-zA-Z_][a-zA-Z0-9_]*")]
    #[display(fmt = "identifier")]
    Ident,
    #[regex("[0-9]+")]
    #[display(fmt = "number")]
    Number,

    #[token(":=")]
    #[display(fmt = ":=")]
    Assign,
    #[token("==")]
    #[display(fmt = "==")]
    Eq,
    #[token("!=")]
    #[display(fmt = "!=")]
    Ne,
    #[token("<=")]
    #[display(fmt = "<=")]
    Le,
    #[token(">=")]
    #[display(fmt = ">=")]
    Ge,
    #[token("<")]
    #[display(fmt = "<")]
    Lt,
    #[token(">")]
    #[display(fmt = ">")]
    Gt,
    #[token("=")]
    #[display(fmt = "=")]
    Equals,
    #[token("+")]
    #[display(fmt = "+")]
    Add,
    #[token("-")]
    #[display(fmt = "-")]
    Sub,
    #[token("*")]
    #[display(fmt = "*")]
    Mul,
    #[token("/")]
    #[display(fmt = "/")]
    Div,
    #[token("(")]
    #[display(fmt = "(")]
    LParen,
    #[token(")")]
    #[display(fmt = ")")]
    RParen,
    #[token(";")]
    #[display(fmt = ";")]
    Semi,
    #[token(",")]
    #[display(fmt = ",")]
    Comma,
    #[token(".")]
    #[display(fmt = ".")]
    Dot,
}

// Tokenise the whole input up front; the parser works on the token vector.
pub fn lex(code: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = vec![];
    for (result, span) in TokenKind::lexer(code).spanned() {
        match result {
            Ok(kind) => tokens.push(Token {
                kind,
                text: code[span].to_string(),
            }),
            Err(()) => {
                return Err(SyntaxError(format!(
                    "invalid token `{}`",
                    &code[span]
                )))
            }
        }
    }
    Ok(tokens)
}
