//! Hadron Compiler: source text -> native code, staged through a
//! fixed pipeline:
//!
//! ```text
//! source -> Lexer -> Parser -> AST -> semantics::analyze -> hir::builder
//!        -> Frame (CFG) -> hir::serializer -> LinearBlock
//!        -> lifetime::analyze -> regalloc::allocate -> resolver::resolve
//!        -> emitter::emit -> Assembler -> executable buffer
//! ```
//!
//! Each stage owns its output exclusively and hands it to the next;
//! no stage mutates an earlier stage's output after handing it off.
//! `compile`/`compile_class` are the two public entry points mirroring
//! the two parser entry points.

pub mod ast;
pub mod config;
pub mod emitter;
pub mod error;
pub mod hir;
pub mod lexer;
pub mod lifetime;
pub mod parser;
pub mod regalloc;
pub mod resolver;
pub mod semantics;
pub mod token;

pub use ast::Node;
pub use config::CompilerConfig;
pub use emitter::{Assembler, TestAssembler};
pub use error::{Diagnostic, Reporter, VecReporter};
pub use hir::Frame;
pub use hir::serializer::LinearBlock;

use error::{DiagnosticKind, InternalError};
use hadron_core::collab::ThreadContextLayout;
use tracing::debug;

/// Everything downstream of the AST, run to completion against one
/// source string. Returned to the caller so it can drive the emitter
/// against whatever `Assembler`/`JitBuffer` pair it has on hand; the
/// core stops at `LinearBlock` plus a ready-to-walk `Frame` rather
/// than forcing a specific JIT backend on every caller — the JIT
/// memory arena is an injected collaborator.
pub struct CompiledUnit {
    pub frame: Frame,
    pub linear: LinearBlock,
}

/// Result of compiling a class-library file: the validated class tree
/// (no garbage collector, inheritance resolution, or instance-variable
/// layout is performed on it — "class-library semantics" stay a
/// non-goal) plus one independently compiled `CompiledUnit` per method
/// body, since a method body is itself a `Block` and lowering it to
/// HIR is squarely within the core pipeline's scope.
pub struct ClassFileUnit {
    pub root: Node,
    pub methods: Vec<(hadron_core::SymbolHash, CompiledUnit)>,
}

/// Runs the full pipeline over one interpreted expression/block,
/// mirroring the parser's `parse()` entry point. Lex/parse/semantic
/// errors are reported to `reporter` and the pipeline halts at the end
/// of the failing stage; a broken compiler invariant surfaces as
/// `Err(InternalError)` instead, since that's a programming fault
/// rather than a user-input error.
pub fn compile(
    source: &str,
    config: &CompilerConfig,
    reporter: &mut impl Reporter,
) -> Result<Option<CompiledUnit>, InternalError> {
    let Some(root) = parse_and_check(source, config, reporter, |p| p.parse())? else {
        return Ok(None);
    };
    let unit = build_unit(&root, config, source, reporter)?;
    if reporter.has_errors() {
        return Ok(None);
    }
    Ok(unit)
}

/// Runs the parser's class-library entry point (`parseClass()`) and
/// independently compiles every method body found in the result. The
/// class tree itself (names, superclass/metaclass
/// references, var declarations) is returned unlowered: resolving it
/// into a runnable class requires the class-library loader's view of
/// the whole hierarchy, which this pipeline does not model.
pub fn compile_class(
    source: &str,
    config: &CompilerConfig,
    reporter: &mut impl Reporter,
) -> Result<Option<ClassFileUnit>, InternalError> {
    let Some(root) = parse_and_check(source, config, reporter, |p| p.parse_class())? else {
        return Ok(None);
    };

    let mut method_bodies = Vec::new();
    collect_method_bodies(&root, &mut method_bodies);

    let mut methods = Vec::new();
    for (name, body) in method_bodies {
        debug!("building HIR for one class method body");
        if let Some(unit) = build_unit(body, config, source, reporter)? {
            methods.push((name, unit));
        }
    }

    if reporter.has_errors() {
        return Ok(None);
    }
    Ok(Some(ClassFileUnit { root, methods }))
}

/// Gathers `(method-name, method-body-block)` pairs out of a parsed
/// class file: a lone class/extension, or (when the file declared more
/// than one top-level class) the block `parse_class` wraps them in.
fn collect_method_bodies<'a>(node: &'a Node, out: &mut Vec<(hadron_core::SymbolHash, &'a Node)>) {
    match &node.kind {
        ast::NodeKind::ClassDef { methods, .. } | ast::NodeKind::ClassExtension { methods, .. } => {
            for method in methods {
                if let ast::NodeKind::Method { name, body, .. } = &method.kind {
                    out.push((*name, body));
                }
            }
        }
        ast::NodeKind::Block { body, .. } => {
            for stmt in body {
                collect_method_bodies(stmt, out);
            }
        }
        _ => {}
    }
}

/// Lex, parse via `entry`, and run semantic analysis. Reports to
/// `reporter` and returns `Ok(None)` at the first failing stage,
/// mirroring `compile`'s propagation policy.
fn parse_and_check(
    source: &str,
    _config: &CompilerConfig,
    reporter: &mut impl Reporter,
    entry: impl FnOnce(&mut parser::Parser) -> Result<Node, error::ParseError>,
) -> Result<Option<Node>, InternalError> {
    debug!(bytes = source.len(), "lexing");
    let tokens = match lexer::Lexer::new(source).tokenize() {
        Ok(tokens) => tokens,
        Err(err) => {
            reporter.report(Diagnostic::from_lex(source, &err));
            return Ok(None);
        }
    };
    debug!(count = tokens.len(), "lexed");

    debug!("parsing");
    let mut p = parser::Parser::new(tokens);
    let root = match entry(&mut p) {
        Ok(root) => root,
        Err(err) => {
            reporter.report(Diagnostic::from_parse(source, err.token_index, &err));
            return Ok(None);
        }
    };

    debug!("running semantic analysis");
    if let Err(errs) = semantics::analyze(&root) {
        for err in &errs {
            reporter.report(Diagnostic::from_semantic(source, err));
        }
        return Ok(None);
    }

    Ok(Some(root))
}

/// Runs HIR construction through move resolution over one already
/// semantically-checked `Block` node. Used both for `compile`'s single
/// top-level block and for each method body `compile_class` finds.
fn build_unit(
    block: &Node,
    config: &CompilerConfig,
    source: &str,
    reporter: &mut impl Reporter,
) -> Result<Option<CompiledUnit>, InternalError> {
    debug!("building HIR (SSA construction)");
    let frame = match hir::builder::build(block) {
        Ok(frame) => frame,
        Err(errs) => {
            for err in &errs {
                reporter.report(Diagnostic::from_semantic(source, err));
            }
            return Ok(None);
        }
    };
    debug!(blocks = frame.block_count(), "HIR built");

    debug!("serializing blocks");
    let mut linear = hir::serializer::serialize(&frame, config.num_registers)?;
    debug!(instructions = linear.instructions.len(), "serialized");

    debug!("analyzing lifetimes");
    lifetime::analyze(&mut linear)?;

    debug!(registers = config.num_registers, "allocating registers");
    regalloc::allocate(&mut linear, config.num_registers)?;

    debug!("resolving moves");
    resolver::resolve(&mut linear)?;

    Ok(Some(CompiledUnit { frame, linear }))
}

/// Drives the emitter over an already-compiled unit and finalizes the
/// result into a caller-provided `JitBuffer`, retrying JIT-buffer
/// exhaustion once with a doubled allocation. Kept separate from
/// `compile`/`compile_class` because a caller may want
/// to inspect `CompiledUnit` (e.g. `vistool`'s dot-graph dump, out of
/// scope here) without ever touching an `Assembler`.
pub fn emit_to_buffer<A: Assembler, B: hadron_core::collab::JitBuffer>(
    unit: &CompiledUnit,
    config: &CompilerConfig,
    context_layout: ThreadContextLayout,
    assembler: &mut A,
    buffer: &mut B,
) -> Result<*const u8, error::ResourceError> {
    emitter::emit(&unit.linear, config.num_registers, context_layout, assembler)
        .map_err(|e| error::ResourceError {
            kind: error::ResourceErrorKind::OutOfMemory,
            message: e.message,
        })?;
    emitter::finalize_into_buffer(assembler, buffer)
}

/// Convenience for tools (the `dump-diag` CLI mode, tests) that just
/// want "did it compile" plus a formatted diagnostic list, without
/// threading a `Reporter` impl through themselves.
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| {
            let kind = match d.kind {
                DiagnosticKind::Lex => "lex",
                DiagnosticKind::Parse => "parse",
                DiagnosticKind::Semantic => "semantic",
            };
            format!("{}:{}: {} error: {}", d.line, d.column, kind, d.message)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> (Option<CompiledUnit>, VecReporter) {
        let config = CompilerConfig::default();
        let mut reporter = VecReporter::default();
        let unit = compile(source, &config, &mut reporter).unwrap();
        (unit, reporter)
    }

    #[test]
    fn nil_compiles_to_a_single_block_with_a_store_return() {
        let (unit, reporter) = run("nil");
        assert!(!reporter.has_errors());
        let unit = unit.unwrap();
        assert_eq!(unit.frame.block_count(), 1);
        assert!(unit.linear.instructions.len() >= 3);
    }

    #[test]
    fn arithmetic_on_constants_allocates_at_most_two_registers() {
        let (unit, reporter) = run("1 + 2");
        assert!(!reporter.has_errors());
        let unit = unit.unwrap();
        let registers_used: std::collections::HashSet<u32> = unit
            .linear
            .value_lifetimes
            .values()
            .flatten()
            .filter_map(|interval| interval.register_id)
            .collect();
        assert!(registers_used.len() <= 2);
    }

    #[test]
    fn repeated_local_read_shares_one_register_after_allocation() {
        let (unit, reporter) = run("var x = 3; x + x");
        assert!(!reporter.has_errors());
        assert!(unit.is_some());
    }

    #[test]
    fn if_with_both_branches_reconciles_via_a_phi() {
        let (unit, reporter) = run("var a = true; if (a) {1} {2}");
        assert!(!reporter.has_errors());
        assert!(unit.is_some());
    }

    #[test]
    fn while_loop_keeps_counter_live_across_the_back_edge() {
        let (unit, reporter) = run("var i = 0; while {i < 10} {i = i + 1}");
        assert!(!reporter.has_errors());
        assert!(unit.is_some());
    }

    #[test]
    fn lex_error_is_reported_and_yields_no_unit() {
        let (unit, reporter) = run("....");
        assert!(reporter.has_errors());
        assert!(unit.is_none());
    }

    #[test]
    fn empty_source_compiles_to_a_nil_result() {
        let (unit, reporter) = run("");
        assert!(!reporter.has_errors());
        assert!(unit.is_some());
    }
}
