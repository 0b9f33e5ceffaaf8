//! Lexer for the textual program description using logos
//!
//! Supports tokens like:
//! - Value references: %tile_0_2, %lock
//! - Symbol references: @of_in, @sequence
//! - Identifiers and op names: aie.tile, sym_name, DMA
//! - Integers: 12, -3, 0x1F
//! - Strings: "buf_a"
//! - Punctuation: (, ), {, }, [, ], ,, =, :

use std::ops::Range;

use logos::Logos;

use crate::error::{CompileError, CompileResult};

/// Token types for the program description language
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    #[regex(r"%[a-zA-Z0-9_]+", |lex| lex.slice()[1..].to_string())]
    Value(String),

    #[regex(r"@[a-zA-Z0-9_.$]+", |lex| lex.slice()[1..].to_string())]
    Symbol(String),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    #[regex(r"0x[0-9a-fA-F]+", |lex| i64::from_str_radix(&lex.slice()[2..], 16).ok())]
    Int(i64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_$]*(\.[a-zA-Z_][a-zA-Z0-9_$]*)*", |lex| lex.slice().to_string())]
    Ident(String),

    #[token("=")]
    Equals,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,
}

fn unescape(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Value(s) => write!(f, "%{}", s),
            Token::Symbol(s) => write!(f, "@{}", s),
            Token::Int(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "{:?}", s),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Equals => write!(f, "="),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
        }
    }
}

/// A token together with its byte range in the source
pub type Spanned = (Token, Range<usize>);

/// Lexer wrapper that turns a whole source into a token list
pub struct Lexer<'source> {
    source: &'source str,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self { source }
    }

    /// Tokenize the full source, failing on the first unrecognised input
    pub fn tokenize(&self) -> CompileResult<Vec<Spanned>> {
        let mut tokens = Vec::new();
        for (result, span) in Token::lexer(self.source).spanned() {
            match result {
                Ok(tok) => tokens.push((tok, span)),
                Err(()) => {
                    return Err(CompileError::Lexer {
                        position: span.start,
                        message: format!("unexpected input {:?}", &self.source[span]),
                    })
                }
            }
        }
        Ok(tokens)
    }
}
