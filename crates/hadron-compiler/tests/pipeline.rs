//! End-to-end tests driving the full pipeline (lex through emit) over
//! small concrete programs: a pure-constant expression, a shared
//! local, an if/else join, a while loop, register pressure forcing a
//! spill, and a failing lex so the "no unit on error" path gets
//! exercised at the crate boundary rather than only per-stage.

use hadron_compiler::emitter::{EmittedOp, TestAssembler};
use hadron_compiler::{compile, CompilerConfig, Reporter, VecReporter};
use hadron_core::collab::{NullJitBuffer, ThreadContextLayout};

fn compile_ok(source: &str) -> hadron_compiler::CompiledUnit {
    let config = CompilerConfig::default();
    let mut reporter = VecReporter::default();
    let unit = compile(source, &config, &mut reporter).expect("no internal error");
    assert!(!reporter.has_errors(), "unexpected diagnostics: {:?}", reporter.diagnostics);
    unit.expect("successful compile produces a unit")
}

#[test]
fn constant_arithmetic_compiles_and_emits_to_a_buffer() {
    let unit = compile_ok("1 + 2");

    let mut asm = TestAssembler::new();
    let config = CompilerConfig::default();
    hadron_compiler::emit_to_buffer(&unit, &config, ThreadContextLayout::default(), &mut asm, &mut NullJitBuffer::default())
        .expect("emission into a fresh buffer should not exhaust it");

    assert!(asm.ops.iter().any(|op| matches!(op, EmittedOp::LoadImmediate { .. })));
}

#[test]
fn shared_local_reaches_emission_with_a_single_store_return() {
    let unit = compile_ok("var x = 3; x + x");
    assert_eq!(unit.frame.block_count(), 1);

    let mut asm = TestAssembler::new();
    let config = CompilerConfig::default();
    hadron_compiler::emit_to_buffer(&unit, &config, ThreadContextLayout::default(), &mut asm, &mut NullJitBuffer::default()).unwrap();
    assert!(asm.ops.iter().any(|op| matches!(op, EmittedOp::StoreIndirect { .. })));
}

#[test]
fn if_else_reconciles_via_phi_and_has_no_critical_edges_left_unresolved() {
    let unit = compile_ok("var a = true; if (a) {1} {2}");
    assert!(unit.frame.block_count() >= 3, "expects a head, then/else, and join block at minimum");

    let mut asm = TestAssembler::new();
    let config = CompilerConfig::default();
    hadron_compiler::emit_to_buffer(&unit, &config, ThreadContextLayout::default(), &mut asm, &mut NullJitBuffer::default()).expect("resolved moves must emit cleanly");
}

#[test]
fn while_loop_compiles_with_a_back_edge_and_emits() {
    let unit = compile_ok("var i = 0; while {i < 10} {i = i + 1}");
    assert!(unit.frame.block_count() >= 4, "expects header, body, and exit blocks at minimum");

    let mut asm = TestAssembler::new();
    let config = CompilerConfig::default();
    hadron_compiler::emit_to_buffer(&unit, &config, ThreadContextLayout::default(), &mut asm, &mut NullJitBuffer::default()).expect("loop back-edge moves must resolve and emit");
}

#[test]
fn register_starved_arithmetic_compiles_and_emits_with_spills() {
    let config = CompilerConfig::default().with_num_registers(1);
    let mut reporter = VecReporter::default();
    let unit = compile("var a = 1; var b = 2; var c = 3; var d = 4; a + b + c + d", &config, &mut reporter)
        .expect("no internal error")
        .expect("successful compile produces a unit");
    assert!(!reporter.has_errors(), "unexpected diagnostics: {:?}", reporter.diagnostics);
    assert!(
        unit.linear.value_lifetimes.values().flatten().any(|iv| iv.is_spill),
        "one physical register should force at least one spill"
    );

    let mut asm = TestAssembler::new();
    hadron_compiler::emit_to_buffer(&unit, &config, ThreadContextLayout::default(), &mut asm, &mut NullJitBuffer::default())
        .expect("a spilled value must still resolve to a real location at emission time");
}

#[test]
fn unterminated_dot_run_is_reported_without_reaching_hir() {
    let config = CompilerConfig::default();
    let mut reporter = VecReporter::default();
    let unit = compile("....", &config, &mut reporter).unwrap();
    assert!(unit.is_none());
    assert!(reporter.has_errors());
    let report = hadron_compiler::format_diagnostics(&reporter.diagnostics);
    assert!(report.contains("lex error"));
}

#[test]
fn class_file_entry_point_parses_a_minimal_class_definition() {
    let config = CompilerConfig::default();
    let mut reporter = VecReporter::default();
    let class_file = hadron_compiler::compile_class("Foo { }", &config, &mut reporter).unwrap();
    assert!(!reporter.has_errors());
    let class_file = class_file.unwrap();
    assert!(class_file.methods.is_empty());
}

#[test]
fn class_file_method_bodies_are_each_compiled_independently() {
    let config = CompilerConfig::default();
    let mut reporter = VecReporter::default();
    let class_file = hadron_compiler::compile_class("Foo { bar { ^1 + 2 } }", &config, &mut reporter).unwrap();
    assert!(!reporter.has_errors(), "unexpected diagnostics: {:?}", reporter.diagnostics);
    let class_file = class_file.unwrap();
    assert_eq!(class_file.methods.len(), 1);
    assert!(class_file.methods[0].1.linear.instructions.len() >= 2);
}
