use logos::{Lexer, Logos};
use std::fmt;
use thiserror::Error;

use crate::Span;

/// A numeric literal, already classified as exact or inexact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberLiteral {
    Integer(i64),
    Float(f64),
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r\f\x0B]+")] // Skip whitespace
#[logos(skip r";[^\n]*")] // Skip comments
#[logos(error = LexerErrorKind)]
pub enum TokenKind {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(".")]
    Dot,
    #[token("'")]
    Quote,
    #[regex(r"[a-zA-Z*+\-/<>=?!][a-zA-Z0-9*+\-/<>=?!]*", |lex| lex.slice().to_string())]
    Symbol(String),
    // Wins over Symbol for `+5` / `-5`, which both patterns accept.
    #[regex(r"[+-]?[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", lex_number, priority = 10)]
    Number(NumberLiteral),
    #[token("#t", |_| true)]
    #[token("#f", |_| false)]
    Boolean(bool),
    #[token("#\\", lex_character)]
    Character(char),
    #[token("\"", lex_string)]
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Result is Float when a decimal point appeared or the exponent is
/// negative; otherwise the exponent is folded into an Integer.
fn lex_number(lex: &mut Lexer<TokenKind>) -> LexerResult<NumberLiteral> {
    let slice = lex.slice();
    let invalid = || LexerErrorKind::InvalidNumberFormat(slice.to_string());
    let (mantissa, exponent) = match slice.find(['e', 'E']) {
        Some(index) => (
            &slice[..index],
            slice[index + 1..].parse::<i32>().map_err(|_| invalid())?,
        ),
        None => (slice, 0),
    };

    if mantissa.contains('.') || exponent < 0 {
        return slice
            .parse::<f64>()
            .map(NumberLiteral::Float)
            .map_err(|_| invalid());
    }

    let base = mantissa.parse::<i64>().map_err(|_| invalid())?;
    let scale = u32::try_from(exponent)
        .ok()
        .and_then(|exponent| 10_i64.checked_pow(exponent))
        .ok_or_else(invalid)?;
    base.checked_mul(scale)
        .map(NumberLiteral::Integer)
        .ok_or_else(invalid)
}

fn lex_character(lex: &mut Lexer<TokenKind>) -> LexerResult<char> {
    let remainder = lex.remainder();
    for (name, value) in [("space", ' '), ("newline", '\n')] {
        if remainder.starts_with(name) {
            lex.bump(name.len());
            return Ok(value);
        }
    }
    match remainder.chars().next() {
        Some(c) => {
            lex.bump(c.len_utf8());
            Ok(c)
        }
        None => Err(LexerErrorKind::UnexpectedEof),
    }
}

// `\n` is the only escape with a meaning; a backslash before anything
// else yields that character unchanged.
fn lex_string(lex: &mut Lexer<TokenKind>) -> LexerResult<String> {
    let remainder = lex.remainder();
    let mut result = String::new();
    let mut chars = remainder.char_indices();
    while let Some((index, c)) = chars.next() {
        match c {
            '"' => {
                lex.bump(index + 1);
                return Ok(result);
            }
            '\\' => match chars.next() {
                Some((_, 'n')) => result.push('\n'),
                Some((_, escaped)) => result.push(escaped),
                None => break,
            },
            c => result.push(c),
        }
    }
    lex.bump(remainder.len());
    Err(LexerErrorKind::UnterminatedString)
}

// Implement Display for easy printing
impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Quote => write!(f, "'"),
            TokenKind::Symbol(s) => write!(f, "{}", s),
            TokenKind::Number(NumberLiteral::Integer(n)) => write!(f, "{}", n),
            TokenKind::Number(NumberLiteral::Float(n)) => write!(f, "{:?}", n),
            TokenKind::Boolean(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            TokenKind::Character(c) => write!(f, "#\\{}", c),
            TokenKind::String(s) => write!(f, "\"{}\"", s), // Display with quotes for clarity
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq, Error)]
pub enum LexerErrorKind {
    #[error("Unexpected end of input")]
    UnexpectedEof,
    #[error("Unterminated string literal")]
    UnterminatedString,
    #[error("Invalid number format: '{0}'")]
    InvalidNumberFormat(String),
    #[default]
    #[error("Invalid Token")]
    InvalidToken,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error}")]
pub struct LexerError {
    pub error: LexerErrorKind,
    pub span: Span,
}

// Result type alias for convenience
type LexerResult<T> = Result<T, LexerErrorKind>;

// Helper function to tokenize a string directly (used by tests and the REPL completer)
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexerError> {
    TokenKind::lexer(input)
        .spanned()
        .map(|(result, range)| {
            let span = Span::new(range.start, range.end);
            match result {
                Ok(kind) => Ok(Token { kind, span }),
                Err(error) => Err(LexerError { error, span }),
            }
        })
        .collect()
}
