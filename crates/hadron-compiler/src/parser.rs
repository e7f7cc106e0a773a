//! Tokens -> AST.
//!
//! Recursive-descent with a small lookahead: a `Parser` holding a
//! token slice and a cursor, with one `parse_*` method per production,
//! over the dynamically-typed Hadron grammar: class definitions,
//! `var`/`arg` declarations with accessor markers, binary operators at
//! a single precedence level, `if`/`while` sugar, and the
//! array/event/series/copy-series literal forms.

use crate::ast::{ArgList, KeywordArg, Node, NodeKind, VarDef};
use crate::error::{Expected, ParseError};
use crate::token::{Token, TokenKind};
use hadron_core::SymbolHash;

pub struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
}

type PResult<T> = Result<T, ParseError>;

impl<'src> Parser<'src> {
    pub fn new(tokens: Vec<Token<'src>>) -> Parser<'src> {
        Parser { tokens, pos: 0 }
    }

    /// Entry point for interpreted code: root is a block, or the empty
    /// block node if the token stream is just EOF.
    pub fn parse(&mut self) -> PResult<Node> {
        if self.at(TokenKind::Eof) {
            return Ok(Node::new(0, NodeKind::Block {
                arguments: ArgList { args: vec![], var_args: None },
                locals: vec![],
                body: vec![],
            }));
        }
        self.parse_block_contents(0)
    }

    /// Entry point for class-library files: root is a chain of class
    /// definitions and class extensions.
    pub fn parse_class(&mut self) -> PResult<Node> {
        let start = self.pos;
        let mut classes = Vec::new();
        while !self.at(TokenKind::Eof) {
            classes.push(self.parse_class_def_or_extension()?);
        }
        if classes.len() == 1 {
            return Ok(classes.into_iter().next().unwrap());
        }
        // Multiple top-level classes: wrap in a block body so callers
        // still get a single root Node (mirrors how interpreted code's
        // root is also a single Block).
        Ok(Node::new(start, NodeKind::Block {
            arguments: ArgList { args: vec![], var_args: None },
            locals: vec![],
            body: classes,
        }))
    }

    // ----- class definitions -----------------------------------------

    fn parse_class_def_or_extension(&mut self) -> PResult<Node> {
        let start = self.pos;

        if self.matches(TokenKind::Plus) {
            self.expect_class_name_keyword()?;
            let name = self.previous_symbol_hash()?;
            self.expect(TokenKind::OpenBrace, "{")?;
            let mut methods = Vec::new();
            while !self.at(TokenKind::CloseBrace) {
                methods.push(self.parse_method()?);
            }
            self.expect(TokenKind::CloseBrace, "}")?;
            return Ok(Node::new(start, NodeKind::ClassExtension { name, methods }));
        }

        self.expect_class_name_keyword()?; // consumes leading ClassName token position marker
        let name = self.previous_symbol_hash()?;

        if self.matches(TokenKind::OpenBracket) {
            // `[metaclassName]` — metaclass override, rarely used.
            self.expect(TokenKind::ClassName, "metaclass name")?;
            self.expect(TokenKind::CloseBracket, "]")?;
        }

        let superclass = if self.matches(TokenKind::Colon) {
            self.expect(TokenKind::ClassName, "superclass name")?;
            Some(self.previous_symbol_hash()?)
        } else {
            None
        };

        self.expect(TokenKind::OpenBrace, "{")?;
        let mut class_vars = Vec::new();
        let mut instance_vars = Vec::new();
        let mut methods = Vec::new();
        while !self.at(TokenKind::CloseBrace) {
            if self.matches(TokenKind::ClassVar) {
                class_vars.extend(self.parse_var_def_list()?);
                self.expect(TokenKind::Semicolon, ";")?;
            } else if self.matches(TokenKind::Var) {
                instance_vars.extend(self.parse_var_def_list()?);
                self.expect(TokenKind::Semicolon, ";")?;
            } else {
                methods.push(self.parse_method()?);
            }
        }
        self.expect(TokenKind::CloseBrace, "}")?;

        Ok(Node::new(start, NodeKind::ClassDef {
            name,
            metaclass_name: None,
            superclass,
            class_vars,
            instance_vars,
            methods,
        }))
    }

    fn parse_method(&mut self) -> PResult<Node> {
        let start = self.pos;
        let is_class_method = self.matches(TokenKind::Star);
        let name = self.current_method_name_hash()?;
        self.advance();

        // Primitive-index pragmas (`<primitiveName>`) are a class-library
        // loader concern, out of scope here; methods are always
        // non-primitive.
        let primitive_index = None;

        let body = self.parse_block_literal()?;
        Ok(Node::new(start, NodeKind::Method {
            name,
            is_class_method,
            primitive_index,
            body: Box::new(body),
        }))
    }

    fn current_method_name_hash(&self) -> PResult<SymbolHash> {
        let tok = self.peek();
        tok.symbol_hash.ok_or_else(|| self.err(Expected::Description("method name".into())))
    }

    // ----- declarations -------------------------------------------------

    fn parse_var_def_list(&mut self) -> PResult<Vec<VarDef>> {
        let mut defs = vec![self.parse_var_def()?];
        while self.matches(TokenKind::Comma) {
            defs.push(self.parse_var_def()?);
        }
        Ok(defs)
    }

    fn parse_var_def(&mut self) -> PResult<VarDef> {
        let name = self.current_identifier_hash()?;
        self.advance();
        let initial = if self.matches(TokenKind::Assign) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        Ok(VarDef { name, initial })
    }

    // ----- blocks ---------------------------------------------------

    /// Parses `arg`/`|...|` declarations, `var` declarations, and a
    /// statement sequence, without the surrounding braces (used for the
    /// implicit top-level block of `parse()`).
    fn parse_block_contents(&mut self, start: usize) -> PResult<Node> {
        let arguments = self.parse_optional_arg_decl()?;
        let mut locals = Vec::new();
        while self.matches(TokenKind::Var) {
            locals.extend(self.parse_var_def_list()?);
            self.expect(TokenKind::Semicolon, ";")?;
        }
        let body = self.parse_statement_sequence(TokenKind::Eof)?;
        Ok(Node::new(start, NodeKind::Block { arguments, locals, body }))
    }

    fn parse_block_literal(&mut self) -> PResult<Node> {
        let start = self.pos;
        self.expect(TokenKind::OpenBrace, "{")?;
        let node = self.parse_block_contents_braced(start)?;
        self.expect(TokenKind::CloseBrace, "}")?;
        Ok(node)
    }

    fn parse_block_contents_braced(&mut self, start: usize) -> PResult<Node> {
        let arguments = self.parse_optional_arg_decl()?;
        let mut locals = Vec::new();
        while self.matches(TokenKind::Var) {
            locals.extend(self.parse_var_def_list()?);
            self.expect(TokenKind::Semicolon, ";")?;
        }
        let body = self.parse_statement_sequence(TokenKind::CloseBrace)?;
        Ok(Node::new(start, NodeKind::Block { arguments, locals, body }))
    }

    fn parse_optional_arg_decl(&mut self) -> PResult<ArgList> {
        if self.matches(TokenKind::Arg) {
            let args = self.parse_var_def_list()?;
            self.expect(TokenKind::Semicolon, ";")?;
            return Ok(ArgList { args, var_args: None });
        }
        if self.matches(TokenKind::Pipe) {
            let mut args = Vec::new();
            let mut var_args = None;
            if !self.at(TokenKind::Pipe) {
                loop {
                    if self.matches(TokenKind::Ellipsis) {
                        var_args = Some(self.current_identifier_hash()?);
                        self.advance();
                        break;
                    }
                    args.push(self.parse_var_def()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::Pipe, "|")?;
            return Ok(ArgList { args, var_args });
        }
        Ok(ArgList { args: vec![], var_args: None })
    }

    fn parse_statement_sequence(&mut self, terminator: TokenKind) -> PResult<Vec<Node>> {
        let mut statements = Vec::new();
        while !self.at(terminator) && !self.at(TokenKind::Eof) {
            statements.push(self.parse_statement()?);
            if !self.matches(TokenKind::Semicolon) {
                break;
            }
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> PResult<Node> {
        if self.at(TokenKind::Caret) {
            let start = self.pos;
            self.advance();
            let expr = self.parse_expr()?;
            return Ok(Node::new(start, NodeKind::Return(Box::new(expr))));
        }
        self.parse_expr()
    }

    // ----- expressions -------------------------------------------------

    fn parse_expr(&mut self) -> PResult<Node> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> PResult<Node> {
        let start = self.pos;
        let lhs = self.parse_binary()?;
        if self.matches(TokenKind::Assign) {
            let value = Box::new(self.parse_assign()?);
            return match lhs.kind {
                NodeKind::Name { hash, is_global, is_class_name } => {
                    Ok(Node::new(start, NodeKind::Assign { name: hash, is_global, is_class_name, value }))
                }
                NodeKind::Call { target: Some(target), selector, positional_args, .. }
                    if positional_args.is_empty() =>
                {
                    Ok(Node::new(start, NodeKind::Setter { target, name: selector, value }))
                }
                NodeKind::ArrayRead { target, index } => {
                    Ok(Node::new(start, NodeKind::ArrayWrite { target, index, value }))
                }
                _ => Err(self.err(Expected::Description("assignable target".into()))),
            };
        }
        Ok(lhs)
    }

    fn parse_binary(&mut self) -> PResult<Node> {
        let mut lhs = self.parse_postfix()?;
        while self.current_binop_selector().is_some() {
            let start = self.pos;
            let selector = self.current_binop_selector().unwrap();
            self.advance();
            let rhs = self.parse_postfix()?;
            lhs = Node::new(start, NodeKind::BinopCall {
                selector,
                left: Box::new(lhs),
                right: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn current_binop_selector(&self) -> Option<SymbolHash> {
        let tok = self.peek();
        if tok.could_be_binary_operator {
            Some(tok.symbol_hash.unwrap_or_else(|| SymbolHash::of(tok.span)))
        } else {
            None
        }
    }

    fn parse_postfix(&mut self) -> PResult<Node> {
        let mut node = self.parse_primary()?;
        loop {
            if self.matches(TokenKind::Dot) {
                let start = self.pos;
                let selector = self.current_identifier_or_method_hash()?;
                self.advance();
                let (positional_args, keyword_args) = self.parse_optional_call_args()?;
                node = Node::new(start, NodeKind::Call {
                    target: Some(Box::new(node)),
                    selector,
                    positional_args,
                    keyword_args,
                });
            } else if self.at(TokenKind::OpenBracket) {
                let start = self.pos;
                self.advance();
                let index = self.parse_expr()?;
                if self.matches(TokenKind::DotDot) {
                    let end = self.parse_expr()?;
                    self.expect(TokenKind::CloseBracket, "]")?;
                    node = Node::new(start, NodeKind::CopySeries {
                        target: Box::new(node),
                        start: Box::new(index),
                        end: Box::new(end),
                    });
                } else {
                    self.expect(TokenKind::CloseBracket, "]")?;
                    node = Node::new(start, NodeKind::ArrayRead {
                        target: Box::new(node),
                        index: Box::new(index),
                    });
                }
            } else {
                break;
            }
        }
        Ok(node)
    }

    fn parse_optional_call_args(&mut self) -> PResult<(Vec<Node>, Vec<KeywordArg>)> {
        if !self.matches(TokenKind::OpenParen) {
            return Ok((vec![], vec![]));
        }
        let mut positional = Vec::new();
        let mut keyword = Vec::new();
        if !self.at(TokenKind::CloseParen) {
            loop {
                if self.at(TokenKind::KeywordArgName) {
                    let name = self.peek().symbol_hash.unwrap();
                    self.advance();
                    let value = self.parse_expr()?;
                    keyword.push(KeywordArg { name, value: Box::new(value) });
                } else {
                    positional.push(self.parse_expr()?);
                }
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::CloseParen, ")")?;
        Ok((positional, keyword))
    }

    fn parse_primary(&mut self) -> PResult<Node> {
        let start = self.pos;
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::IntegerLiteral | TokenKind::FloatLiteral | TokenKind::NilLiteral
            | TokenKind::TrueLiteral | TokenKind::FalseLiteral => {
                self.advance();
                Ok(Node::new(start, NodeKind::Literal(tok.literal.unwrap())))
            }
            TokenKind::StringLiteral => {
                self.advance();
                let text = unescape_string(tok.span);
                Ok(Node::new(start, NodeKind::Str(text)))
            }
            TokenKind::SymbolLiteral => {
                self.advance();
                Ok(Node::new(start, NodeKind::Symbol(tok.symbol_hash.unwrap())))
            }
            TokenKind::Tilde => {
                self.advance();
                let hash = self.current_identifier_hash()?;
                self.advance();
                Ok(Node::new(start, NodeKind::Name { hash, is_global: true, is_class_name: false }))
            }
            TokenKind::Identifier if tok.span == "_" => {
                self.advance();
                Ok(Node::new(start, NodeKind::CurryArgument))
            }
            TokenKind::Identifier if tok.span == "if" => {
                self.advance();
                self.parse_if(start)
            }
            TokenKind::Identifier if tok.span == "while" => {
                self.advance();
                self.parse_while(start)
            }
            TokenKind::Identifier => {
                self.advance();
                let hash = tok.symbol_hash.unwrap();
                let (positional_args, keyword_args) = self.parse_optional_call_args()?;
                if positional_args.is_empty() && keyword_args.is_empty() && !self.at(TokenKind::OpenParen) {
                    Ok(Node::new(start, NodeKind::Name { hash, is_global: false, is_class_name: false }))
                } else {
                    Ok(Node::new(start, NodeKind::Call {
                        target: None,
                        selector: hash,
                        positional_args,
                        keyword_args,
                    }))
                }
            }
            TokenKind::ClassName => {
                self.advance();
                let hash = tok.symbol_hash.unwrap();
                if self.at(TokenKind::OpenParen) {
                    let (positional_args, keyword_args) = self.parse_optional_call_args()?;
                    Ok(Node::new(start, NodeKind::New {
                        class_name: hash,
                        positional_args,
                        keyword_args,
                        block_arg: None,
                    }))
                } else if self.at(TokenKind::OpenBrace) {
                    let block = self.parse_block_literal()?;
                    Ok(Node::new(start, NodeKind::New {
                        class_name: hash,
                        positional_args: vec![],
                        keyword_args: vec![],
                        block_arg: Some(Box::new(block)),
                    }))
                } else {
                    Ok(Node::new(start, NodeKind::Name { hash, is_global: false, is_class_name: true }))
                }
            }
            TokenKind::OpenBrace => self.parse_block_literal(),
            TokenKind::OpenBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.at(TokenKind::CloseBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::CloseBracket, "]")?;
                Ok(Node::new(start, NodeKind::ArrayLiteral(items)))
            }
            TokenKind::OpenParen => self.parse_paren_form(start),
            TokenKind::Minus => {
                // unary negation sugar: `-expr` desugars to the `neg`
                // selector call on `expr`, same as sclang's `-3` -> `3.neg`.
                self.advance();
                let operand = self.parse_postfix()?;
                Ok(Node::new(start, NodeKind::Call {
                    target: Some(Box::new(operand)),
                    selector: SymbolHash::of("neg"),
                    positional_args: vec![],
                    keyword_args: vec![],
                }))
            }
            _ => Err(self.err(Expected::Description("an expression".into()))),
        }
    }

    /// Disambiguates `(expr)` grouping, event literals `(key: value,
    /// ...)`, and arithmetic series `(a, b .. c)` — all share the `(`
    /// lead token.
    fn parse_paren_form(&mut self, start: usize) -> PResult<Node> {
        self.advance(); // '('
        if self.at(TokenKind::KeywordArgName) {
            let mut pairs = Vec::new();
            loop {
                let name = self.peek().symbol_hash.unwrap();
                self.advance();
                let value = self.parse_expr()?;
                pairs.push(KeywordArg { name, value: Box::new(value) });
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::CloseParen, ")")?;
            return Ok(Node::new(start, NodeKind::Event(pairs)));
        }

        let first = self.parse_expr()?;
        if self.matches(TokenKind::DotDot) {
            let end = self.parse_expr()?;
            self.expect(TokenKind::CloseParen, ")")?;
            return Ok(Node::new(start, NodeKind::Series {
                start: Box::new(first),
                step: None,
                end: Box::new(end),
            }));
        }
        if self.matches(TokenKind::Comma) {
            let second = self.parse_expr()?;
            if self.matches(TokenKind::DotDot) {
                let end = self.parse_expr()?;
                self.expect(TokenKind::CloseParen, ")")?;
                return Ok(Node::new(start, NodeKind::Series {
                    start: Box::new(first),
                    step: Some(Box::new(second)),
                    end: Box::new(end),
                }));
            }
            return Err(self.err(Expected::Token("..")));
        }
        self.expect(TokenKind::CloseParen, ")")?;
        Ok(first)
    }

    fn parse_if(&mut self, start: usize) -> PResult<Node> {
        self.expect(TokenKind::OpenParen, "(")?;
        let condition = self.parse_expr()?;
        self.expect(TokenKind::CloseParen, ")")?;
        let then_branch = self.parse_block_literal()?;
        let else_branch = if self.at(TokenKind::OpenBrace) {
            Some(Box::new(self.parse_block_literal()?))
        } else {
            None
        };
        Ok(Node::new(start, NodeKind::If {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch,
        }))
    }

    fn parse_while(&mut self, start: usize) -> PResult<Node> {
        let condition = self.parse_block_literal()?;
        let body = self.parse_block_literal()?;
        Ok(Node::new(start, NodeKind::While {
            condition: Box::new(condition),
            body: Box::new(body),
        }))
    }

    // ----- token-stream helpers -----------------------------------------

    fn peek(&self) -> &Token<'src> {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &'static str) -> PResult<()> {
        if self.at(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.err(Expected::Token(what)))
        }
    }

    fn expect_class_name_keyword(&mut self) -> PResult<()> {
        self.expect(TokenKind::ClassName, "class name")
    }

    fn previous_symbol_hash(&self) -> PResult<SymbolHash> {
        let idx = self.pos.saturating_sub(1);
        self.tokens[idx]
            .symbol_hash
            .ok_or_else(|| self.err(Expected::Description("symbol".into())))
    }

    fn current_identifier_hash(&self) -> PResult<SymbolHash> {
        self.peek()
            .symbol_hash
            .ok_or_else(|| self.err(Expected::Description("identifier".into())))
    }

    fn current_identifier_or_method_hash(&self) -> PResult<SymbolHash> {
        self.current_identifier_hash()
    }

    fn err(&self, expected: Expected) -> ParseError {
        ParseError {
            token_index: self.pos,
            expected,
            found: format!("{:?} ({:?})", self.peek().kind, self.peek().span),
        }
    }
}

fn unescape_string(span: &str) -> String {
    let inner = &span[1..span.len() - 1];
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(src: &str) -> Node {
        let tokens = Lexer::new(src).tokenize().unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    #[test]
    fn empty_source_parses_to_empty_block() {
        let node = parse("");
        match node.kind {
            NodeKind::Block { body, .. } => assert!(body.is_empty()),
            _ => panic!("expected block"),
        }
    }

    #[test]
    fn nil_literal() {
        let node = parse("nil");
        match node.kind {
            NodeKind::Block { body, .. } => {
                assert_eq!(body.len(), 1);
                assert!(matches!(body[0].kind, NodeKind::Literal(hadron_core::Slot::Nil)));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn binary_add_of_integers() {
        let node = parse("1 + 2");
        match node.kind {
            NodeKind::Block { body, .. } => {
                assert_eq!(body.len(), 1);
                assert!(matches!(body[0].kind, NodeKind::BinopCall { .. }));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn var_decl_and_self_reference() {
        let node = parse("var x = 3; x + x");
        match node.kind {
            NodeKind::Block { locals, body, .. } => {
                assert_eq!(locals.len(), 1);
                assert_eq!(body.len(), 1);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn if_with_two_branches() {
        let node = parse("var a = true; if (a) {1} {2}");
        match node.kind {
            NodeKind::Block { body, .. } => {
                assert!(matches!(body[0].kind, NodeKind::If { else_branch: Some(_), .. }));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn while_loop() {
        let node = parse("var i = 0; while {i < 10} {i = i + 1}");
        match node.kind {
            NodeKind::Block { body, .. } => {
                assert!(matches!(body[0].kind, NodeKind::While { .. }));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn setter_call() {
        let node = parse("var a = 1; a.value = 5");
        match node.kind {
            NodeKind::Block { body, .. } => {
                assert!(matches!(body[0].kind, NodeKind::Setter { .. }));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn array_literal_and_index() {
        let node = parse("var a = [1, 2, 3]; a[0]");
        match node.kind {
            NodeKind::Block { body, .. } => {
                assert!(matches!(body[0].kind, NodeKind::ArrayRead { .. }));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn class_definition() {
        let tokens = Lexer::new("Foo : Object { var x; doit { ^x } }").tokenize().unwrap();
        let node = Parser::new(tokens).parse_class().unwrap();
        assert!(matches!(node.kind, NodeKind::ClassDef { .. }));
    }
}
