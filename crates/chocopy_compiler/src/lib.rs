//! ChocoPy code generator: symbol tables, stack frames, translation to RV32IM
//! instruction records, runtime support, and the data segment.

mod analysis;
mod consts;
mod data;
mod frame;
mod lower;
mod runtime;
mod symbols;

pub use analysis::analyze;
pub use symbols::{ProgramInfo, SymbolInfo};

use chocopy_config::CodegenConfig;
use chocopy_syntax::diagnostics::{format_diagnostic, Diagnostic};
use chocopy_syntax::{AsmProgram, CodegenError, Program, Span};
use consts::ConstPool;
use log::debug;
use std::path::Path;

/// Print diagnostics to stderr, prefixed with the input file.
pub fn print_diagnostics(file: &str, diags: &[Diagnostic]) {
    for d in diags {
        eprintln!("{}", format_diagnostic(file, d));
    }
}

/// Parse a typed AST from its JSON form.
pub fn parse_program(source: &str) -> Result<Program, Vec<Diagnostic>> {
    serde_json::from_str(source).map_err(|e| {
        let (line, col) = (e.line() as u32, e.column() as u32);
        vec![Diagnostic::error(
            format!("malformed AST: {}", e),
            Some(Span::new(line, col, line, col)),
        )]
    })
}

/// Translate a validated program: `main`, then every function and method,
/// then the runtime routines; data segment alongside.
pub fn compile_program(
    program: &Program,
    config: &CodegenConfig,
) -> Result<AsmProgram, Vec<Diagnostic>> {
    generate(program, config).map_err(|e| vec![e.into()])
}

/// Read a typed AST (JSON) from `path` and translate it.
pub fn compile_file(path: &Path, config: &CodegenConfig) -> Result<AsmProgram, Vec<Diagnostic>> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        vec![Diagnostic::error(
            format!("failed to read file: {}", e),
            None,
        )]
    })?;
    let program = parse_program(&source)?;
    debug!(
        "{}: {} declarations, {} top-level statements",
        path.display(),
        program.declarations.len(),
        program.statements.len()
    );
    compile_program(&program, config)
}

fn generate(program: &Program, config: &CodegenConfig) -> Result<AsmProgram, CodegenError> {
    let info = analyze(program)?;
    let mut consts = ConstPool::new();
    let mut text = lower::lower_top_level(&info, &mut consts, config)?;
    for id in info.translated_funcs() {
        text.extend(lower::lower_function(&info, id, &mut consts, config)?);
    }
    runtime::emit(&info, &mut consts, &mut text)?;
    let data = data::emit(&info, &mut consts);
    debug!(
        "generated {} text items, {} data items ({:?} registers)",
        text.len(),
        data.len(),
        config.registers
    );
    Ok(AsmProgram { text, data })
}
