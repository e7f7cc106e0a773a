//! AST validation pass between the parser and the block builder.
//!
//! Parser-level sugar (setters, array-writes, unary negation) is
//! already rewritten into canonical `Call`/`Assign`/`Setter`/
//! `ArrayWrite` forms by `parser::Parser` itself, since that
//! disambiguation is naturally part of recursive-descent grammar
//! resolution, and the parser rejects anything outside that shape as a
//! `ParseError` before this stage ever runs. New-expression and
//! copy-series sugar (`NodeKind::New`, `NodeKind::CopySeries`) are
//! *not* rewritten here: both stay distinct node kinds through to the
//! block builder, which lowers each directly to its own dispatch-call
//! sequence alongside every other message send, so there is no
//! intermediate canonical-call shape for this stage to produce. What's
//! left for this stage is redefinition of a `var`/`arg` name within one
//! scope, and `InvalidAssignTarget` for a target that is shape-valid
//! but not semantically assignable — a bare `ClassName` reference
//! parses to the same `Name` shape as a variable read, so `Foo = 3`
//! only this stage can catch.

use crate::ast::{Node, NodeKind};
use crate::error::{SemanticError, SemanticErrorKind};
use hadron_core::SymbolHash;
use std::collections::HashSet;

pub fn analyze(root: &Node) -> Result<(), Vec<SemanticError>> {
    let mut errors = Vec::new();
    check_node(root, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_node(node: &Node, errors: &mut Vec<SemanticError>) {
    match &node.kind {
        NodeKind::Block { arguments, locals, body } => {
            let mut seen: HashSet<SymbolHash> = HashSet::new();
            for arg in &arguments.args {
                check_redefinition(arg.name, node.token_index, &mut seen, errors);
            }
            for local in locals {
                check_redefinition(local.name, node.token_index, &mut seen, errors);
                if let Some(initial) = &local.initial {
                    check_node(initial, errors);
                }
            }
            for stmt in body {
                check_node(stmt, errors);
            }
        }
        NodeKind::Assign { is_class_name, .. } => {
            // The parser already rejects a structurally-invalid target
            // shape (anything that isn't a name/setter/array-write) as
            // a `ParseError` before this stage ever runs (parser.rs's
            // `parse_assign`). What the parser's shape check can't see
            // is that a bare `ClassName` reference parses to the exact
            // same `Name` shape as a variable read — so `Foo = 3`
            // builds a structurally well-formed `Assign` whose target
            // is nonetheless invalid: class bindings aren't
            // assignable. That's this stage's actual job for
            // `InvalidAssignTarget`.
            if *is_class_name {
                errors.push(SemanticError {
                    position: node.token_index,
                    kind: SemanticErrorKind::InvalidAssignTarget,
                });
            }
            for child in children(node) {
                check_node(child, errors);
            }
        }
        NodeKind::Setter { .. } | NodeKind::ArrayWrite { .. } => {
            for child in children(node) {
                check_node(child, errors);
            }
        }
        NodeKind::ClassDef { class_vars, instance_vars, methods, .. } => {
            let mut seen: HashSet<SymbolHash> = HashSet::new();
            for v in class_vars.iter().chain(instance_vars.iter()) {
                check_redefinition(v.name, node.token_index, &mut seen, errors);
            }
            for m in methods {
                check_node(m, errors);
            }
        }
        NodeKind::ClassExtension { methods, .. } => {
            for m in methods {
                check_node(m, errors);
            }
        }
        _ => {
            for child in children(node) {
                check_node(child, errors);
            }
        }
    }
}

fn check_redefinition(
    name: SymbolHash,
    position: usize,
    seen: &mut HashSet<SymbolHash>,
    errors: &mut Vec<SemanticError>,
) {
    if !seen.insert(name) {
        errors.push(SemanticError {
            position,
            kind: SemanticErrorKind::Redefinition(format!("{name:?}")),
        });
    }
}

/// Yields this node's immediate AST children for a generic recursive
/// walk. Declarative rather than exhaustive pattern matching inline at
/// every call site, keeping this as one match-and-recurse function
/// rather than a visitor base class.
fn children(node: &Node) -> Vec<&Node> {
    match &node.kind {
        NodeKind::Literal(_)
        | NodeKind::Symbol(_)
        | NodeKind::Str(_)
        | NodeKind::Name { .. }
        | NodeKind::CurryArgument => vec![],
        NodeKind::VarDef(v) => v.initial.iter().map(Box::as_ref).collect(),
        NodeKind::VarList(vs) => vs.iter().filter_map(|v| v.initial.as_deref()).collect(),
        NodeKind::ArgList(_) => vec![],
        NodeKind::Block { body, .. } => body.iter().collect(),
        NodeKind::Method { body, .. } => vec![body],
        NodeKind::ClassDef { methods, .. } => methods.iter().collect(),
        NodeKind::ClassExtension { methods, .. } => methods.iter().collect(),
        NodeKind::Assign { value, .. } => vec![value],
        NodeKind::Setter { target, value, .. } => vec![target, value],
        NodeKind::ArrayLiteral(items) => items.iter().collect(),
        NodeKind::Event(pairs) => pairs.iter().map(|kv| kv.value.as_ref()).collect(),
        NodeKind::Series { start, step, end } => {
            let mut v = vec![start.as_ref()];
            if let Some(s) = step {
                v.push(s.as_ref());
            }
            v.push(end.as_ref());
            v
        }
        NodeKind::CopySeries { target, start, end } => vec![target, start, end],
        NodeKind::Call { target, positional_args, keyword_args, .. } => {
            let mut v: Vec<&Node> = target.iter().map(Box::as_ref).collect();
            v.extend(positional_args.iter());
            v.extend(keyword_args.iter().map(|kv| kv.value.as_ref()));
            v
        }
        NodeKind::BinopCall { left, right, .. } => vec![left, right],
        NodeKind::New { positional_args, keyword_args, block_arg, .. } => {
            let mut v: Vec<&Node> = positional_args.iter().collect();
            v.extend(keyword_args.iter().map(|kv| kv.value.as_ref()));
            if let Some(b) = block_arg {
                v.push(b);
            }
            v
        }
        NodeKind::ArrayRead { target, index } => vec![target, index],
        NodeKind::ArrayWrite { target, index, value } => vec![target, index, value],
        NodeKind::If { condition, then_branch, else_branch } => {
            let mut v = vec![condition.as_ref(), then_branch.as_ref()];
            if let Some(e) = else_branch {
                v.push(e);
            }
            v
        }
        NodeKind::While { condition, body } => vec![condition, body],
        NodeKind::Return(value) => vec![value],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn parse(src: &str) -> Node {
        let tokens = Lexer::new(src).tokenize().unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    #[test]
    fn accepts_well_formed_block() {
        let node = parse("var x = 1; x + x");
        assert!(analyze(&node).is_ok());
    }

    #[test]
    fn rejects_redefined_local() {
        let node = parse("var x = 1; var x = 2; x");
        let errs = analyze(&node).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(matches!(errs[0].kind, SemanticErrorKind::Redefinition(_)));
    }

    /// A bare class-name reference parses to the same shape as a
    /// variable read, so the parser's shape check lets `Foo = 3`
    /// through as a structurally valid `Assign` — this stage is the
    /// only place that can reject it.
    #[test]
    fn rejects_assignment_to_a_class_name() {
        let node = parse("Foo = 3");
        let errs = analyze(&node).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(matches!(errs[0].kind, SemanticErrorKind::InvalidAssignTarget));
    }

    #[test]
    fn accepts_assignment_to_a_plain_variable() {
        let node = parse("var x = 1; x = 2");
        assert!(analyze(&node).is_ok());
    }
}
