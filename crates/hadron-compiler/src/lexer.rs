//! Source text -> token stream.
//!
//! A single-pass, character-driven state machine, O(n) in source
//! length. Token spans borrow directly from the input `&str`; nothing
//! here allocates into managed heap. A zero-copy-span approach, with
//! the full punctuation/operator/keyword set the language requires.

use crate::error::{LexError, LexErrorKind};
use crate::token::{Token, TokenKind};
use hadron_core::{Slot, SymbolHash};

const BINARY_OP_CHARS: &str = "!@%&*-+=|<>?/";

pub struct Lexer<'src> {
    source: &'src str,
    pos: usize,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Lexer<'src> {
        Lexer { source, pos: 0 }
    }

    /// Lexes the entire source into a token stream, stopping at the
    /// first `LexError` (malformed numeric literal or invalid character
    /// sequence). Unterminated block comments are consumed silently and
    /// do not produce an error.
    pub fn tokenize(mut self) -> Result<Vec<Token<'src>>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let start = self.pos;
            let Some(ch) = self.peek() else {
                tokens.push(Token::new(TokenKind::Eof, "", start));
                break;
            };

            let token = if ch.is_ascii_digit() {
                self.lex_number(start)?
            } else if ch == '"' {
                self.lex_string(start)?
            } else if ch == '\'' {
                self.lex_quoted_symbol(start)?
            } else if ch == '\\' {
                self.lex_backslash_symbol(start)
            } else if ch == '_' && self.peek_at(1).is_some_and(is_ident_start) {
                self.lex_primitive_name(start)
            } else if is_ident_start(ch) {
                self.lex_word(start)
            } else if ch == '.' {
                self.lex_dots(start)?
            } else if BINARY_OP_CHARS.contains(ch) {
                self.lex_operator(start)
            } else if let Some(kind) = single_char_punctuation(ch) {
                self.advance();
                Token::new(kind, &self.source[start..self.pos], start)
            } else {
                return Err(LexError {
                    position: start,
                    kind: LexErrorKind::InvalidChar,
                });
            };
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_at(&self, chars_ahead: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(chars_ahead)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.advance();
                    self.advance();
                    let mut depth = 1usize;
                    while depth > 0 {
                        match self.peek() {
                            None => break, // unterminated: accepted silently
                            Some('/') if self.peek_at(1) == Some('*') => {
                                self.advance();
                                self.advance();
                                depth += 1;
                            }
                            Some('*') if self.peek_at(1) == Some('/') => {
                                self.advance();
                                self.advance();
                                depth -= 1;
                            }
                            Some(_) => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_number(&mut self, start: usize) -> Result<Token<'src>, LexError> {
        if self.peek() == Some('0') && self.peek_at(1) == Some('x') {
            // "0x" followed by no hex digit lexes as integer 0 plus
            // identifier "x...".
            if self
                .peek_at(2)
                .is_some_and(|c| c.is_ascii_hexdigit())
            {
                self.advance();
                self.advance();
                while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                    self.advance();
                }
                let span = &self.source[start..self.pos];
                let value = i32::from_str_radix(&span[2..], 16)
                    .map_err(|_| LexError { position: start, kind: LexErrorKind::MalformedNumber })?;
                let mut token = Token::new(TokenKind::IntegerLiteral, span, start);
                token.literal = Some(Slot::Int(value));
                return Ok(token);
            }
            self.advance(); // consume '0'
            let span = &self.source[start..self.pos];
            let mut token = Token::new(TokenKind::IntegerLiteral, span, start);
            token.literal = Some(Slot::Int(0));
            return Ok(token);
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        // digit-dot-digit required for a float; otherwise stop before
        // the dot and let it lex separately — a number followed by
        // `.identifier` must lex as integer then dot then identifier.
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance(); // '.'
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
            let span = &self.source[start..self.pos];
            let value: f64 = span
                .parse()
                .map_err(|_| LexError { position: start, kind: LexErrorKind::MalformedNumber })?;
            let mut token = Token::new(TokenKind::FloatLiteral, span, start);
            token.literal = Some(Slot::Float(value));
            return Ok(token);
        }

        // "digits directly followed by letters split into integer +
        // identifier" — stop the integer here and let the next call
        // lex the identifier; we must not consume letters.
        let span = &self.source[start..self.pos];
        let value: i32 = span
            .parse()
            .map_err(|_| LexError { position: start, kind: LexErrorKind::MalformedNumber })?;
        let mut token = Token::new(TokenKind::IntegerLiteral, span, start);
        token.literal = Some(Slot::Int(value));
        Ok(token)
    }

    fn lex_string(&mut self, start: usize) -> Result<Token<'src>, LexError> {
        self.advance(); // opening quote
        let mut escaped = false;
        loop {
            match self.advance() {
                None => {
                    return Err(LexError {
                        position: start,
                        kind: LexErrorKind::UnterminatedString,
                    });
                }
                Some('\\') => {
                    escaped = true;
                    if self.advance().is_none() {
                        return Err(LexError {
                            position: start,
                            kind: LexErrorKind::UnterminatedString,
                        });
                    }
                }
                Some('"') => break,
                Some(_) => {}
            }
        }
        let span = &self.source[start..self.pos];
        let mut token = Token::new(TokenKind::StringLiteral, span, start);
        token.escape_string = escaped;
        Ok(token)
    }

    fn lex_quoted_symbol(&mut self, start: usize) -> Result<Token<'src>, LexError> {
        self.advance(); // opening quote
        loop {
            match self.advance() {
                None => {
                    return Err(LexError {
                        position: start,
                        kind: LexErrorKind::UnterminatedSymbol,
                    });
                }
                Some('\\') => {
                    if self.advance().is_none() {
                        return Err(LexError {
                            position: start,
                            kind: LexErrorKind::UnterminatedSymbol,
                        });
                    }
                }
                Some('\'') => break,
                Some(_) => {}
            }
        }
        let span = &self.source[start..self.pos];
        let text = &span[1..span.len() - 1];
        let mut token = Token::new(TokenKind::SymbolLiteral, span, start);
        token.symbol_hash = Some(SymbolHash::of(text));
        Ok(token)
    }

    /// `\name` or a bare `\`.
    fn lex_backslash_symbol(&mut self, start: usize) -> Token<'src> {
        self.advance(); // backslash
        while self.peek().is_some_and(is_ident_continue) {
            self.advance();
        }
        let span = &self.source[start..self.pos];
        let text = &span[1..];
        let mut token = Token::new(TokenKind::SymbolLiteral, span, start);
        token.symbol_hash = Some(SymbolHash::of(text));
        token
    }

    fn lex_primitive_name(&mut self, start: usize) -> Token<'src> {
        self.advance(); // underscore
        while self.peek().is_some_and(is_ident_continue) {
            self.advance();
        }
        let span = &self.source[start..self.pos];
        let mut token = Token::new(TokenKind::PrimitiveName, span, start);
        token.symbol_hash = Some(SymbolHash::of(span));
        token
    }

    fn lex_word(&mut self, start: usize) -> Token<'src> {
        let leading = self.peek().unwrap();
        while self.peek().is_some_and(is_ident_continue) {
            self.advance();
        }
        let mut span = &self.source[start..self.pos];

        // keyword-argument-name: immediately followed by `:` with no
        // intervening whitespace becomes a single token.
        if self.peek() == Some(':') && self.peek_at(1) != Some(':') {
            self.advance();
            span = &self.source[start..self.pos];
            let mut token = Token::new(TokenKind::KeywordArgName, span, start);
            token.symbol_hash = Some(SymbolHash::of(&span[..span.len() - 1]));
            token.could_be_binary_operator = true;
            return token;
        }

        if let Some(kind) = keyword_kind(span) {
            let mut token = Token::new(kind, span, start);
            token.literal = match kind {
                TokenKind::NilLiteral => Some(Slot::Nil),
                TokenKind::TrueLiteral => Some(Slot::Bool(true)),
                TokenKind::FalseLiteral => Some(Slot::Bool(false)),
                _ => None,
            };
            return token;
        }

        let kind = if leading.is_uppercase() {
            TokenKind::ClassName
        } else {
            TokenKind::Identifier
        };
        let mut token = Token::new(kind, span, start);
        token.symbol_hash = Some(SymbolHash::of(span));
        token
    }

    /// `.`, `..`, `...` are distinct tokens; `....` is an error.
    fn lex_dots(&mut self, start: usize) -> Result<Token<'src>, LexError> {
        let mut count = 0;
        while self.peek() == Some('.') {
            self.advance();
            count += 1;
            if count > 3 {
                // keep consuming the run so the caller sees one error
                // spanning the whole offending run, not a cascade.
                while self.peek() == Some('.') {
                    self.advance();
                }
                return Err(LexError {
                    position: start,
                    kind: LexErrorKind::InvalidDotRun,
                });
            }
        }
        let span = &self.source[start..self.pos];
        let kind = match count {
            1 => TokenKind::Dot,
            2 => TokenKind::DotDot,
            3 => TokenKind::Ellipsis,
            _ => unreachable!("handled above"),
        };
        Ok(Token::new(kind, span, start))
    }

    fn lex_operator(&mut self, start: usize) -> Token<'src> {
        while self.peek().is_some_and(|c| BINARY_OP_CHARS.contains(c)) {
            self.advance();
        }
        let span = &self.source[start..self.pos];
        let kind = match span {
            "+" => TokenKind::Plus,
            "-" => TokenKind::Minus,
            "*" => TokenKind::Star,
            "=" => TokenKind::Assign,
            "<" => TokenKind::LeftAngle,
            ">" => TokenKind::RightAngle,
            "|" => TokenKind::Pipe,
            "<>" => TokenKind::ReadWriteVar,
            "<-" => TokenKind::LeftArrow,
            _ => TokenKind::BinaryOp,
        };
        let mut token = Token::new(kind, span, start);
        token.could_be_binary_operator = true;
        token.symbol_hash = Some(SymbolHash::of(span));
        token
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn keyword_kind(span: &str) -> Option<TokenKind> {
    Some(match span {
        "var" => TokenKind::Var,
        "arg" => TokenKind::Arg,
        "classvar" => TokenKind::ClassVar,
        "const" => TokenKind::Const,
        "nil" => TokenKind::NilLiteral,
        "true" => TokenKind::TrueLiteral,
        "false" => TokenKind::FalseLiteral,
        _ => return None,
    })
}

fn single_char_punctuation(c: char) -> Option<TokenKind> {
    Some(match c {
        '(' => TokenKind::OpenParen,
        ')' => TokenKind::CloseParen,
        '[' => TokenKind::OpenBracket,
        ']' => TokenKind::CloseBracket,
        '{' => TokenKind::OpenBrace,
        '}' => TokenKind::CloseBrace,
        ',' => TokenKind::Comma,
        ';' => TokenKind::Semicolon,
        ':' => TokenKind::Colon,
        '^' => TokenKind::Caret,
        '~' => TokenKind::Tilde,
        '#' => TokenKind::Hash,
        '`' => TokenKind::Grave,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn empty_and_whitespace_source_lex_to_eof_only() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
        assert_eq!(kinds("   \n\t  "), vec![TokenKind::Eof]);
    }

    #[test]
    fn hex_zero_without_digits_splits_into_zero_and_identifier() {
        let toks = Lexer::new("0x").tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::IntegerLiteral);
        assert_eq!(toks[0].literal, Some(Slot::Int(0)));
        assert_eq!(toks[1].kind, TokenKind::Identifier);
        assert_eq!(toks[1].span, "x");
    }

    #[test]
    fn hex_with_digits_lexes_as_one_integer() {
        let toks = Lexer::new("0x1F").tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::IntegerLiteral);
        assert_eq!(toks[0].literal, Some(Slot::Int(31)));
        assert_eq!(toks[1].kind, TokenKind::Eof);
    }

    #[test]
    fn digits_followed_by_letters_split() {
        let toks = Lexer::new("3x").tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::IntegerLiteral);
        assert_eq!(toks[1].kind, TokenKind::Identifier);
        assert_eq!(toks[1].span, "x");
    }

    #[test]
    fn float_requires_digit_after_dot() {
        let toks = Lexer::new("3.foo").tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::IntegerLiteral);
        assert_eq!(toks[1].kind, TokenKind::Dot);
        assert_eq!(toks[2].kind, TokenKind::Identifier);
    }

    #[test]
    fn proper_float_lexes_as_one_token() {
        let toks = Lexer::new("3.5").tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::FloatLiteral);
        assert_eq!(toks[0].literal, Some(Slot::Float(3.5)));
    }

    #[test]
    fn dot_runs() {
        assert_eq!(kinds("."), vec![TokenKind::Dot, TokenKind::Eof]);
        assert_eq!(kinds(".."), vec![TokenKind::DotDot, TokenKind::Eof]);
        assert_eq!(kinds("..."), vec![TokenKind::Ellipsis, TokenKind::Eof]);
        let err = Lexer::new("....").tokenize().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::InvalidDotRun);
    }

    #[test]
    fn keyword_argument_name_requires_immediate_colon() {
        let toks = Lexer::new("foo: 1").tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::KeywordArgName);
        assert_eq!(toks[0].span, "foo:");
        assert!(toks[0].could_be_binary_operator);
    }

    #[test]
    fn identifiers_and_class_names() {
        let toks = Lexer::new("foo Bar").tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::Identifier);
        assert_eq!(toks[1].kind, TokenKind::ClassName);
    }

    #[test]
    fn primitive_name() {
        let toks = Lexer::new("_primDoIt").tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::PrimitiveName);
    }

    #[test]
    fn named_operators_are_distinct_but_flagged_as_binop() {
        let toks = Lexer::new("+ - * = < > | <> <-").tokenize().unwrap();
        let expected = [
            TokenKind::Plus,
            TokenKind::Minus,
            TokenKind::Star,
            TokenKind::Assign,
            TokenKind::LeftAngle,
            TokenKind::RightAngle,
            TokenKind::Pipe,
            TokenKind::ReadWriteVar,
            TokenKind::LeftArrow,
        ];
        for (tok, kind) in toks.iter().zip(expected.iter()) {
            assert_eq!(tok.kind, *kind);
            assert!(tok.could_be_binary_operator);
        }
    }

    #[test]
    fn generic_binary_operator_run() {
        let toks = Lexer::new("!=").tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::BinaryOp);
        assert_eq!(toks[0].span, "!=");
    }

    #[test]
    fn string_literal_tracks_escape_flag() {
        let toks = Lexer::new(r#""a\"b" "plain""#).tokenize().unwrap();
        assert!(toks[0].escape_string);
        assert!(!toks[1].escape_string);
    }

    #[test]
    fn adjacent_string_literals_do_not_merge() {
        let toks = Lexer::new(r#""a""b""#).tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::StringLiteral);
        assert_eq!(toks[0].span, "\"a\"");
        assert_eq!(toks[1].kind, TokenKind::StringLiteral);
        assert_eq!(toks[1].span, "\"b\"");
    }

    #[test]
    fn unterminated_string_is_lex_error() {
        let err = Lexer::new("\"abc").tokenize().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
    }

    #[test]
    fn unterminated_block_comment_is_accepted_silently() {
        let toks = Lexer::new("1 /* never closes").tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::IntegerLiteral);
        assert_eq!(toks[1].kind, TokenKind::Eof);
    }

    #[test]
    fn nested_block_comments() {
        let toks = Lexer::new("1 /* outer /* inner */ still-comment */ 2")
            .tokenize()
            .unwrap();
        assert_eq!(toks[0].literal, Some(Slot::Int(1)));
        assert_eq!(toks[1].literal, Some(Slot::Int(2)));
    }

    #[test]
    fn line_comment_runs_to_eol() {
        let toks = Lexer::new("1 // comment\n2").tokenize().unwrap();
        assert_eq!(toks[0].literal, Some(Slot::Int(1)));
        assert_eq!(toks[1].literal, Some(Slot::Int(2)));
    }

    #[test]
    fn bare_backslash_is_a_symbol() {
        let toks = Lexer::new("\\ \\foo").tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::SymbolLiteral);
        assert_eq!(toks[0].span, "\\");
        assert_eq!(toks[1].kind, TokenKind::SymbolLiteral);
        assert_eq!(toks[1].span, "\\foo");
    }

    #[test]
    fn quoted_symbol() {
        let toks = Lexer::new("'hello world'").tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::SymbolLiteral);
    }

    #[test]
    fn keywords_lex_distinctly() {
        assert_eq!(
            kinds("var arg classvar const nil true false"),
            vec![
                TokenKind::Var,
                TokenKind::Arg,
                TokenKind::ClassVar,
                TokenKind::Const,
                TokenKind::NilLiteral,
                TokenKind::TrueLiteral,
                TokenKind::FalseLiteral,
                TokenKind::Eof,
            ]
        );
    }
}
