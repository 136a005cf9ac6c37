//! The emitter: walks an AST and drives a [`CodeBuilder`].
//!
//! One [`Compiler`] exists per scope (module, function, class, lambda,
//! comprehension). A child compiler is spun up for each nested scope and
//! discarded once its code object is finalized; the symbol tables it
//! threads through live in a single [`SymbolTableArena`] shared for the
//! whole compilation, since name resolution walks outward across scope
//! boundaries.

mod exc;
mod expr;
mod funcdef;
mod pattern;
mod stmt;
mod with_stmt;

use ruff_python_ast::ModModule;

use crate::bytecode::{Code, CodeBuilder, CodeFlags};
use crate::diagnostics::{CodeRange, CompileError, LineIndex};
use crate::intern::{Interner, StringId};
use crate::symtab::{ScopeKind, SymbolTableArena, SymbolTableId};

/// Parameterizes a compilation. Threaded through every child compiler
/// unchanged, aside from `filename`, which is fixed for the whole unit.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    pub optimize: bool,
    pub max_nesting_depth: u32,
    pub filename: StringId,
}

impl CompilerOptions {
    #[must_use]
    pub fn new(filename: StringId) -> Self {
        Self {
            optimize: true,
            max_nesting_depth: 200,
            filename,
        }
    }
}

/// The result of a compilation: a code object plus every diagnostic
/// collected along the way. A non-empty `diagnostics` means `code` must
/// not be executed.
#[derive(Debug)]
pub struct CompileOutput {
    pub code: Code,
    pub diagnostics: Vec<CompileError>,
}

/// A pending forward jump collected for a `break` or end-of-case/end-of-
/// handler join point, to be patched once the joining address is known.
pub(crate) type PendingJump = crate::bytecode::builder::JumpLabel;

/// Per-loop bookkeeping for `break`/`continue` patching.
pub(crate) struct LoopRecord {
    pub start_pc: usize,
    pub break_sites: Vec<PendingJump>,
    pub is_for_loop: bool,
}

/// One scope's worth of emission state.
pub struct Compiler<'a> {
    pub(crate) scope: SymbolTableId,
    pub(crate) scope_kind: ScopeKind,
    pub(crate) builder: CodeBuilder,
    pub(crate) interner: Interner,
    pub(crate) loop_stack: Vec<LoopRecord>,
    pub(crate) finally_depth: u32,
    pub(crate) diagnostics: Vec<CompileError>,
    pub(crate) filename: StringId,
    pub(crate) options: &'a CompilerOptions,
    pub(crate) line_index: &'a LineIndex,
    pub(crate) depth: u32,
    pub(crate) name: StringId,
    pub(crate) arg_count: u32,
    pub(crate) kw_only_arg_count: u32,
    pub(crate) flags: CodeFlags,
}

impl<'a> Compiler<'a> {
    fn new(
        scope: SymbolTableId,
        scope_kind: ScopeKind,
        options: &'a CompilerOptions,
        line_index: &'a LineIndex,
        name: StringId,
        depth: u32,
    ) -> Self {
        Self {
            scope,
            scope_kind,
            builder: CodeBuilder::new(),
            interner: Interner::new(),
            loop_stack: Vec::new(),
            finally_depth: 0,
            diagnostics: Vec::new(),
            filename: options.filename,
            options,
            line_index,
            depth,
            name,
            arg_count: 0,
            kw_only_arg_count: 0,
            flags: CodeFlags::empty(),
        }
    }

    /// Converts a ruff text range into a `CodeRange` using this compiler's
    /// line index, and records it as the builder's current position.
    pub(crate) fn position(&mut self, range: ruff_text_size::TextRange) -> CodeRange {
        let pos = self.line_index.code_range(self.filename, range);
        self.builder.set_position(pos);
        pos
    }

    pub(crate) fn error(&mut self, err: CompileError) {
        self.diagnostics.push(err);
    }

    /// Finalizes this compiler's code object from its scope's symbol
    /// table, per §4.11.
    fn finish(self, arena: &SymbolTableArena) -> (Code, Vec<CompileError>) {
        let table = arena.get(self.scope);
        let mut var_names = vec![StringId::default(); 0];
        // `var_names` is ordered by Local slot; collect by walking the
        // scope's own symbols rather than tracking a side list, since the
        // arena already owns that mapping.
        var_names.resize(
            table.local_count(),
            self.interner.intern(""),
        );
        for (name, sym) in table.iter_locals() {
            var_names[sym.index as usize] = name;
        }
        let code = self.builder.build(
            var_names,
            table.free_vars.clone(),
            table.cell_vars.clone(),
            self.arg_count,
            self.kw_only_arg_count,
            self.flags,
            self.name,
            self.filename,
        );
        let code = if self.options.optimize {
            crate::optimizer::optimize_code(code)
        } else {
            code
        };
        (code, self.diagnostics)
    }
}

/// Compiles a parsed module into a code object plus diagnostics.
#[must_use]
pub fn compile_module(module: &ModModule, source: &str, options: &CompilerOptions) -> CompileOutput {
    let line_index = LineIndex::from_source(source);
    let mut arena = SymbolTableArena::new();
    let module_scope = arena.push(ScopeKind::Module, None);

    let interner = Interner::new();
    let optimized_body;
    let body: &[ruff_python_ast::Stmt] = if options.optimize {
        optimized_body = crate::optimizer::optimize_stmts(&module.body);
        &optimized_body
    } else {
        &module.body
    };
    crate::prescan::run_pass_a(&mut arena, module_scope, body, &interner);
    crate::prescan::run_pass_b(&mut arena, module_scope, body, &interner);

    let module_name = interner.intern("<module>");
    let mut compiler = Compiler::new(module_scope, ScopeKind::Module, options, &line_index, module_name, 0);
    for stmt in body {
        compiler.compile_stmt(&mut arena, stmt);
    }
    compiler.builder.emit(crate::bytecode::Opcode::LoadNone);
    compiler.builder.emit(crate::bytecode::Opcode::Return);

    let (code, diagnostics) = compiler.finish(&arena);
    CompileOutput { code, diagnostics }
}

/// Convenience entry point that parses `source` itself before compiling.
#[must_use]
pub fn compile_source(source: &str, filename: &str) -> CompileOutput {
    let interner = Interner::new();
    let filename_id = interner.intern(filename);
    let options = CompilerOptions::new(filename_id);
    match ruff_python_parser::parse_module(source) {
        Ok(parsed) => compile_module(&parsed.into_syntax(), source, &options),
        Err(err) => {
            let line_index = LineIndex::from_source(source);
            let position = line_index.code_range(filename_id, ruff_text_size::TextRange::default());
            CompileOutput {
                code: empty_code(filename_id, interner.intern("<module>")),
                diagnostics: vec![CompileError::unsupported(format!("parse error: {err}"), position)],
            }
        }
    }
}

fn empty_code(filename: StringId, name: StringId) -> Code {
    Code {
        code: vec![crate::bytecode::Opcode::Return as u8],
        constants: vec![],
        names: vec![],
        var_names: vec![],
        free_vars: vec![],
        cell_vars: vec![],
        arg_count: 0,
        kw_only_arg_count: 0,
        flags: CodeFlags::empty(),
        stack_size: 0,
        first_line: 1,
        line_table: vec![],
        name,
        filename,
    }
}
