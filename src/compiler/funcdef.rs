//! `def` and `class` statement emission (§4.9). The shared child-compiler
//! machinery (parameter binding, pre-scan, finalization) lives in
//! `compiler::expr`, since lambdas and comprehensions need the same
//! plumbing; this module only covers what's specific to the two
//! statement forms: decorator application, qualified naming, and (for
//! classes) the `LOAD_BUILD_CLASS` protocol.

use ruff_python_ast::{self as ast, Stmt};
use ruff_text_size::Ranged;

use crate::bytecode::{ConstValue, Opcode};
use crate::symtab::SymbolTableArena;

use super::Compiler;

impl<'a> Compiler<'a> {
    pub(crate) fn compile_function_def(&mut self, arena: &mut SymbolTableArena, s: &ast::StmtFunctionDef) {
        let pos = self.position(s.range());
        for decorator in &s.decorator_list {
            self.compile_expr(arena, &decorator.expression);
        }

        let name = self.interner.intern(s.name.as_str());
        let params = Some(s.parameters.as_ref());
        let (code, flags) = self.compile_child_function(arena, params, &s.body, name, s.is_async, false);

        let defaults = self.collect_defaults(&s.parameters);
        self.emit_make_function(arena, code, flags, name, pos, &defaults);

        for _ in &s.decorator_list {
            self.emit_arg_or_error(Opcode::Call, 1, pos);
        }
        self.compile_store_name(arena, name, pos);
    }

    /// Pairs each parameter with its default expression (if any) and
    /// whether it's keyword-only, for [`Compiler::emit_make_function`].
    fn collect_defaults<'p>(&self, params: &'p ast::Parameters) -> Vec<(&'p ast::Expr, bool)> {
        let mut out = Vec::new();
        for param in &params.args {
            if let Some(default) = &param.default {
                out.push((default.as_ref(), false));
            }
        }
        for param in &params.kwonlyargs {
            if let Some(default) = &param.default {
                out.push((default.as_ref(), true));
            }
        }
        out
    }

    pub(crate) fn compile_class_def(&mut self, arena: &mut SymbolTableArena, s: &ast::StmtClassDef) {
        let pos = self.position(s.range());
        for decorator in &s.decorator_list {
            self.compile_expr(arena, &decorator.expression);
        }
        self.builder.emit(Opcode::LoadBuildClass);

        let name = self.interner.intern(s.name.as_str());
        let (code, _flags) = self.compile_class_body(arena, name, &s.body);
        self.emit_make_function(arena, code, crate::bytecode::CodeFlags::empty(), name, pos, &[]);

        let name_idx = self.const_or_error(ConstValue::Str(self.interner.resolve(name).to_string()), pos);
        self.emit_load_const(name_idx, pos);

        let mut positional = 2u32;
        if let Some(arguments) = &s.arguments {
            for base in &arguments.args {
                self.compile_expr(arena, base);
            }
            positional += u32::try_from(arguments.args.len()).unwrap_or(0);

            let has_star_kwargs = arguments.keywords.iter().any(|k| k.arg.is_none());
            if arguments.keywords.is_empty() {
                self.emit_arg_or_error(Opcode::Call, positional, pos);
            } else if !has_star_kwargs {
                let mut names = Vec::with_capacity(arguments.keywords.len());
                for kw in &arguments.keywords {
                    self.compile_expr(arena, &kw.value);
                    let arg_name = kw.arg.as_ref().expect("checked: no star-kwargs here");
                    names.push(ConstValue::Str(arg_name.to_string()));
                }
                let names_idx = self.const_or_error(ConstValue::Tuple(names), pos);
                self.emit_load_const(names_idx, pos);
                let total = positional + u32::try_from(arguments.keywords.len()).unwrap_or(0);
                self.emit_arg_or_error(Opcode::CallKw, total, pos);
            } else {
                self.compile_class_call_ex(arena, positional, &arguments.keywords, pos);
            }
        } else {
            self.emit_arg_or_error(Opcode::Call, positional, pos);
        }

        for _ in &s.decorator_list {
            self.emit_arg_or_error(Opcode::Call, 1, pos);
        }
        self.compile_store_name(arena, name, pos);
    }

    /// `class Foo(*bases, **extra)`-shaped keyword arguments: the positional
    /// run (build-class, name, bases) is already on the stack, so it's
    /// packed into a tuple and `CALL_EX`'d the same way a call expression
    /// with `**` unpacking is (§4.4).
    fn compile_class_call_ex(&mut self, arena: &mut SymbolTableArena, positional: u32, keywords: &[ast::Keyword], pos: crate::diagnostics::CodeRange) {
        self.emit_arg_or_error(Opcode::BuildTuple, positional, pos);
        let mut first = true;
        for kw in keywords {
            match &kw.arg {
                Some(name) => {
                    let k = self.const_or_error(ConstValue::Str(name.to_string()), pos);
                    self.emit_load_const(k, pos);
                    self.compile_expr(arena, &kw.value);
                    self.emit_arg_or_error(Opcode::BuildMap, 1, pos);
                }
                None => self.compile_expr(arena, &kw.value),
            }
            if !first {
                self.builder.emit(Opcode::BinaryOr);
            }
            first = false;
        }
        self.emit_arg_or_error(Opcode::CallEx, 1, pos);
    }

    /// Compiles a class body into its own code object: a class-scoped
    /// compiler that, unlike a function, stores locals by name
    /// (`STORE_NAME`/`LOAD_NAME`) and ends by returning its own namespace.
    fn compile_class_body(&mut self, arena: &mut SymbolTableArena, name: crate::intern::StringId, body: &[Stmt]) -> (crate::bytecode::Code, crate::bytecode::CodeFlags) {
        let child_scope = arena.push(crate::symtab::ScopeKind::Class, Some(self.scope));
        let mut child = Compiler::new(child_scope, crate::symtab::ScopeKind::Class, self.options, self.line_index, name, self.depth + 1);

        // A method's own `__class__`/`super()` usage is detected and the
        // cell synthesized when that method's `FunctionDef` is compiled
        // (`compile_child_function` checks `scope_kind == Class` against
        // its own body) — nothing to scan for upfront here, since
        // `references_super_or_class_cell` doesn't cross a nested `def`
        // boundary.
        let optimized_body;
        let body = if self.options.optimize {
            optimized_body = crate::optimizer::optimize_stmts(body);
            optimized_body.as_slice()
        } else {
            body
        };

        crate::prescan::run_pass_a(arena, child_scope, body, &child.interner);
        crate::prescan::run_pass_b(arena, child_scope, body, &child.interner);

        if crate::ast_walk::any_stmt(body, &mut |s| matches!(s, Stmt::AnnAssign(_))) {
            child.builder.emit(Opcode::SetupAnnotations);
        }
        for stmt in body {
            child.compile_stmt(arena, stmt);
        }
        child.builder.emit(Opcode::LoadLocals);
        child.builder.emit(Opcode::Return);

        let (code, mut child_diagnostics) = child.finish(arena);
        self.diagnostics.append(&mut child_diagnostics);
        (code, crate::bytecode::CodeFlags::empty())
    }
}
