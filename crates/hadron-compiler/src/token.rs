//! The `Token` model.

use hadron_core::{Slot, SymbolHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    IntegerLiteral,
    FloatLiteral,
    StringLiteral,
    SymbolLiteral,
    Identifier,
    ClassName,
    KeywordArgName,
    PrimitiveName,
    /// A generic run of `!@%&*-+=|<>?/` not equal to one of the named
    /// single/double-character operators below.
    BinaryOp,

    // Named operators, returned with distinct kinds even though they
    // are also valid binary operators.
    Plus,
    Minus,
    Star,
    Assign,
    LeftAngle,
    RightAngle,
    Pipe,
    ReadWriteVar, // <>
    LeftArrow,    // <-

    // Punctuation.
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    OpenBrace,
    CloseBrace,
    Comma,
    Semicolon,
    Colon,
    Caret,
    Tilde,
    Hash,
    Grave,
    Dot,
    DotDot,
    Ellipsis,

    // Keywords.
    Var,
    Arg,
    ClassVar,
    Const,
    NilLiteral,
    TrueLiteral,
    FalseLiteral,

    Eof,
}

/// `{kind, source-span, optional literal Slot, optional symbol hash,
/// flags}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub span: &'src str,
    /// Byte offset of `span`'s first byte into the original source,
    /// used for diagnostics (see `error::Diagnostic`).
    pub position: usize,
    pub literal: Option<Slot>,
    pub symbol_hash: Option<SymbolHash>,
    pub could_be_binary_operator: bool,
    /// Set when a string literal contains at least one backslash
    /// escape.
    pub escape_string: bool,
}

impl<'src> Token<'src> {
    pub fn new(kind: TokenKind, span: &'src str, position: usize) -> Token<'src> {
        Token {
            kind,
            span,
            position,
            literal: None,
            symbol_hash: None,
            could_be_binary_operator: false,
            escape_string: false,
        }
    }
}
