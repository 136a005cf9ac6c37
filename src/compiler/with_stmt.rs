//! `with` statement emission (§4.7). A multi-item `with` is lowered
//! recursively so each item forms its own nested `SETUP_WITH` block,
//! rather than flattening all items' cleanup into one frame.

use ruff_python_ast as ast;
use ruff_text_size::Ranged;

use crate::bytecode::Opcode;
use crate::diagnostics::CodeRange;
use crate::symtab::SymbolTableArena;

use super::Compiler;

impl<'a> Compiler<'a> {
    pub(crate) fn compile_with(&mut self, arena: &mut SymbolTableArena, s: &ast::StmtWith) {
        let pos = self.position(s.range());
        if s.is_async {
            self.error(crate::diagnostics::CompileError::unsupported("'async with' is not supported", pos));
            return;
        }
        self.compile_with_items(arena, &s.items, &s.body, pos);
    }

    /// `cm` stays on the operand stack for the whole block (`SETUP_WITH`'s
    /// stack effect is zero — it only registers a runtime cleanup block), so
    /// the exit sequence below finds it exactly where the entry sequence
    /// left it, with no re-evaluation of the context expression.
    fn compile_with_items(&mut self, arena: &mut SymbolTableArena, items: &[ast::WithItem], body: &[ast::Stmt], pos: CodeRange) {
        let Some((item, rest)) = items.split_first() else {
            for stmt in body {
                self.compile_stmt(arena, stmt);
            }
            return;
        };

        self.compile_expr(arena, &item.context_expr);
        self.builder.emit(Opcode::Dup);
        let enter = self.interner.intern("__enter__");
        let enter_idx = self.name_or_error(enter, pos);
        self.emit_arg_or_error(Opcode::LoadMethod, enter_idx, pos);
        self.emit_arg_or_error(Opcode::CallMethod, 0, pos);

        match &item.optional_vars {
            Some(target) => self.compile_store(arena, target),
            None => self.builder.emit(Opcode::Pop),
        }

        let cleanup = self.builder.emit_jump(Opcode::SetupWith);
        self.compile_with_items(arena, rest, body, pos);

        self.builder.emit(Opcode::PopExcept);
        self.compile_exit_call(pos);
        self.builder.emit(Opcode::Pop);
        let skip_cleanup = self.builder.emit_jump(Opcode::Jump);

        self.builder.patch_jump(cleanup, pos).unwrap_or_else(|e| self.error(e));
        self.builder.emit(Opcode::WithCleanup);
        self.builder.emit(Opcode::EndFinally);

        self.builder.patch_jump(skip_cleanup, pos).unwrap_or_else(|e| self.error(e));
    }

    /// `cm.__exit__(None, None, None)`, leaving `cm` on the stack still
    /// (popped by the caller once the call is emitted).
    fn compile_exit_call(&mut self, pos: CodeRange) {
        self.builder.emit(Opcode::Dup);
        let exit = self.interner.intern("__exit__");
        let exit_idx = self.name_or_error(exit, pos);
        self.emit_arg_or_error(Opcode::LoadMethod, exit_idx, pos);
        for _ in 0..3 {
            self.builder.emit(Opcode::LoadNone);
        }
        self.emit_arg_or_error(Opcode::CallMethod, 3, pos);
        self.builder.emit(Opcode::Pop);
    }
}
