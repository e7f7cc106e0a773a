//! `hadronc`: command-line driver for the compiler core. Only the
//! flags the core itself can satisfy are implemented here; the
//! REPL/class-library-loader driven tools (`hlang`, `htest`,
//! `vistool`, `schemac`, `dump-diag`) are out of scope and would be
//! separate binaries built on top of this crate's public
//! `compile`/`compile_class` API.

use clap::{CommandFactory, Parser as ClapParser};
use clap_complete::{generate, Shell};
use hadron_compiler::lexer::Lexer;
use hadron_compiler::parser::Parser;
use hadron_compiler::{compile, compile_class, semantics, CompilerConfig, Node, Reporter, VecReporter};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

#[derive(ClapParser)]
#[command(name = "hadronc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hadron compiler core: lex, parse, and build HIR/lifetimes/allocation for a .sc source file", long_about = None)]
struct Cli {
    /// Input source file. Required unless `--completions` is given.
    #[arg(long = "sourceFile")]
    source_file: Option<PathBuf>,

    /// Output file (reserved for future vistool/schemac-style dumps;
    /// with no flag the diagnostic summary goes to stdout).
    #[arg(long = "outputFile")]
    output_file: Option<PathBuf>,

    /// Parse as a class-library file (`parseClass()`) instead of an
    /// interpreted expression (`parse()`).
    #[arg(long = "class-file")]
    class_file: bool,

    /// Print the raw parse tree (lex + parse only, no semantic
    /// checking) instead of running the full pipeline.
    #[arg(long = "parseTree")]
    parse_tree: bool,

    /// Print the AST after semantic analysis (name-redefinition and
    /// assignment-target checks) instead of running the full pipeline.
    #[arg(long = "syntaxTree")]
    syntax_tree: bool,

    /// Number of physical registers available to the register allocator.
    #[arg(long = "registers", default_value_t = hadron_compiler::config::DEFAULT_NUM_REGISTERS)]
    num_registers: u32,

    /// Raise the tracing verbosity (stackable: -v, -vv, -vvv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Report diagnostics as JSON instead of the human-readable text
    /// format (one object per diagnostic, machine-consumable by an
    /// editor/IDE integration).
    #[arg(long = "json")]
    json: bool,

    /// Print a shell completion script for the named shell and exit,
    /// without requiring `--sourceFile`.
    #[arg(long = "completions", value_enum)]
    completions: Option<Shell>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Some(shell) = cli.completions {
        run_completions(shell);
        return;
    }

    let source_file = cli.source_file.clone().unwrap_or_else(|| {
        eprintln!("error: --sourceFile is required unless --completions is given");
        process::exit(1);
    });

    let source = match fs::read_to_string(&source_file) {
        Ok(source) => source,
        Err(e) => {
            error!(path = %source_file.display(), error = %e, "failed to read source file");
            process::exit(1);
        }
    };

    if cli.parse_tree {
        let root = parse_only(&source, cli.class_file);
        dump_and_maybe_write(&root, &cli.output_file);
        return;
    }
    if cli.syntax_tree {
        let root = parse_only(&source, cli.class_file);
        if let Err(errs) = semantics::analyze(&root) {
            for err in &errs {
                eprintln!("semantic error: {err}");
            }
            process::exit(1);
        }
        dump_and_maybe_write(&root, &cli.output_file);
        return;
    }

    let config = CompilerConfig::new().with_num_registers(cli.num_registers);
    let mut reporter = VecReporter::default();

    if cli.class_file {
        let class_file = match compile_class(&source, &config, &mut reporter) {
            Ok(class_file) => class_file,
            Err(internal) => {
                error!(%internal, "internal compiler error");
                process::exit(1);
            }
        };
        report_and_exit_on_error(&reporter, cli.json);
        let class_file = class_file.expect("no diagnostics recorded but no class unit produced");

        info!(methods = class_file.methods.len(), "compiled successfully");

        if let Some(output) = &cli.output_file {
            write_output_or_exit(output, &format!("{:#?}", class_file.root));
        }
        return;
    }

    let unit = match compile(&source, &config, &mut reporter) {
        Ok(unit) => unit,
        Err(internal) => {
            error!(%internal, "internal compiler error");
            process::exit(1);
        }
    };
    report_and_exit_on_error(&reporter, cli.json);
    let unit = unit.expect("no diagnostics recorded but no compiled unit produced");

    info!(
        blocks = unit.frame.block_count(),
        instructions = unit.linear.instructions.len(),
        spill_slots = unit.linear.number_of_spill_slots,
        "compiled successfully"
    );

    if let Some(output) = &cli.output_file {
        write_output_or_exit(output, &format!("{:#?}", unit.frame));
    }
}

/// Lexes and parses `source` only (no semantic checking, no HIR),
/// exiting with a reported error on a lex or parse failure. Shared by
/// `--parseTree` and `--syntaxTree`, which both need the bare AST
/// before deciding whether to run semantic analysis over it.
fn parse_only(source: &str, class_file: bool) -> Node {
    let tokens = match Lexer::new(source).tokenize() {
        Ok(tokens) => tokens,
        Err(err) => {
            eprintln!("lex error: {err}");
            process::exit(1);
        }
    };
    let mut parser = Parser::new(tokens);
    let result = if class_file { parser.parse_class() } else { parser.parse() };
    match result {
        Ok(root) => root,
        Err(err) => {
            eprintln!("parse error: {err}");
            process::exit(1);
        }
    }
}

fn dump_and_maybe_write(root: &Node, output_file: &Option<PathBuf>) {
    println!("{root:#?}");
    if let Some(output) = output_file {
        write_output_or_exit(output, &format!("{root:#?}"));
    }
}

fn report_and_exit_on_error(reporter: &VecReporter, json: bool) {
    if reporter.has_errors() {
        if json {
            match serde_json::to_string_pretty(&reporter.diagnostics) {
                Ok(report) => eprintln!("{report}"),
                Err(e) => error!(error = %e, "failed to serialize diagnostics as JSON"),
            }
        } else {
            let report = hadron_compiler::format_diagnostics(&reporter.diagnostics);
            eprintln!("{report}");
        }
        process::exit(1);
    }
}

/// Prints a shell completion script to stdout.
fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

fn write_output_or_exit(output: &PathBuf, contents: &str) {
    if let Err(e) = fs::write(output, contents) {
        error!(path = %output.display(), error = %e, "failed to write output file");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_output_or_exit_writes_the_given_contents() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("out.txt");
        write_output_or_exit(&path, "hello hadron");
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello hadron");
    }

    #[test]
    fn dump_and_maybe_write_also_writes_to_the_output_file_when_given() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("tree.txt");
        let tokens = Lexer::new("1 + 2").tokenize().unwrap();
        let root = Parser::new(tokens).parse().unwrap();
        dump_and_maybe_write(&root, &Some(path.clone()));
        assert!(fs::read_to_string(&path).unwrap().contains("BinopCall"));
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "hadron_compiler=info",
        1 => "hadron_compiler=debug",
        _ => "hadron_compiler=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}
